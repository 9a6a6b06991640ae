use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    paginate, Chat, ChatPage, ChatStore, DbMessage, Document, StoreError, StoreResult,
    StreamRecord, Suggestion, Vote,
};
use crate::models::role::Role;
use crate::usage::AppUsage;

#[derive(Default)]
struct Tables {
    chats: Vec<Chat>,
    messages: Vec<DbMessage>,
    streams: Vec<StreamRecord>,
    documents: Vec<Document>,
    suggestions: Vec<Suggestion>,
    votes: Vec<Vote>,
}

/// Process local store; everything is lost on restart
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn save_chat(&self, chat: &Chat) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.chats.iter().position(|c| c.id == chat.id) {
            Some(position) => tables.chats[position] = chat.clone(),
            None => tables.chats.push(chat.clone()),
        }
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> StoreResult<Option<Chat>> {
        let tables = self.tables.read().await;
        Ok(tables.chats.iter().find(|c| c.id == id).cloned())
    }

    async fn delete_chat(&self, id: &str) -> StoreResult<Option<Chat>> {
        let mut tables = self.tables.write().await;
        let Some(position) = tables.chats.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let chat = tables.chats.remove(position);
        tables.messages.retain(|m| m.chat_id != id);
        tables.votes.retain(|v| v.chat_id != id);
        tables.streams.retain(|s| s.chat_id != id);
        Ok(Some(chat))
    }

    async fn list_chats(
        &self,
        user_id: &str,
        limit: usize,
        starting_after: Option<&str>,
        ending_before: Option<&str>,
    ) -> StoreResult<ChatPage> {
        let tables = self.tables.read().await;
        // later inserts win ties on creation time
        let mut chats: Vec<Chat> = tables
            .chats
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(chats, limit, starting_after, ending_before)
    }

    async fn update_chat_last_context(&self, id: &str, usage: &AppUsage) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let chat = tables
            .chats
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Chat with id {} not found", id)))?;
        chat.last_context = Some(usage.clone());
        Ok(())
    }

    async fn save_messages(&self, messages: &[DbMessage]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.messages.extend(messages.iter().cloned());
        Ok(())
    }

    async fn get_messages(&self, chat_id: &str) -> StoreResult<Vec<DbMessage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn count_user_messages_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let tables = self.tables.read().await;
        let owned: Vec<&str> = tables
            .chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id.as_str())
            .collect();
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.role == Role::User && m.created_at >= since)
            .filter(|m| owned.contains(&m.chat_id.as_str()))
            .count())
    }

    async fn save_stream_id(&self, stream_id: &str, chat_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.streams.push(StreamRecord {
            id: stream_id.to_string(),
            chat_id: chat_id.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_stream_ids(&self, chat_id: &str) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .streams
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .map(|s| s.id.clone())
            .collect())
    }

    async fn save_document(&self, document: &Document) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.documents.push(document.clone());
        Ok(())
    }

    async fn get_documents(&self, id: &str) -> StoreResult<Vec<Document>> {
        let tables = self.tables.read().await;
        let mut versions: Vec<Document> = tables
            .documents
            .iter()
            .filter(|d| d.id == id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(versions)
    }

    async fn save_suggestions(&self, suggestions: &[Suggestion]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.suggestions.extend(suggestions.iter().cloned());
        Ok(())
    }

    async fn get_suggestions(&self, document_id: &str) -> StoreResult<Vec<Suggestion>> {
        let tables = self.tables.read().await;
        Ok(tables
            .suggestions
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn vote_message(&self, vote: &Vote) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables
            .votes
            .iter()
            .position(|v| v.chat_id == vote.chat_id && v.message_id == vote.message_id)
        {
            Some(position) => tables.votes[position].is_upvoted = vote.is_upvoted,
            None => tables.votes.push(vote.clone()),
        }
        Ok(())
    }

    async fn get_votes(&self, chat_id: &str) -> StoreResult<Vec<Vote>> {
        let tables = self.tables.read().await;
        Ok(tables
            .votes
            .iter()
            .filter(|v| v.chat_id == chat_id)
            .cloned()
            .collect())
    }
}
