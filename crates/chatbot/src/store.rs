//! Persistence of chats, messages, stream ids, documents, suggestions and votes.
//!
//! [`ChatStore`] is the seam; [`memory::MemoryStore`] backs tests and single process
//! deployments, [`sqlite::SqliteStore`] keeps data across restarts.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::models::message::{Attachment, Message, MessageContent};
use crate::models::role::Role;
use crate::usage::AppUsage;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: Visibility,
    pub last_context: Option<AppUsage>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            visibility,
            last_context: None,
            created_at: Utc::now(),
        }
    }
}

/// A stored message. The store keeps insertion order, which is the order history is replayed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub parts: Vec<MessageContent>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl DbMessage {
    pub fn from_message(chat_id: &str, message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            chat_id: chat_id.to_string(),
            role: message.role,
            parts: message.content.clone(),
            attachments: message.attachments.clone(),
            created_at: DateTime::from_timestamp(message.created, 0).unwrap_or_else(Utc::now),
        }
    }

    pub fn to_message(&self) -> Message {
        Message {
            id: self.id.clone(),
            role: self.role,
            created: self.created_at.timestamp(),
            content: self.parts.clone(),
            attachments: self.attachments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub id: String,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Code,
    Sheet,
}

/// One version of a document; versions share the id and differ by creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub document_id: String,
    pub original_text: String,
    pub suggested_text: String,
    pub description: Option<String>,
    pub is_resolved: bool,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub chat_id: String,
    pub message_id: String,
    pub is_upvoted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub chats: Vec<Chat>,
    pub has_more: bool,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn save_chat(&self, chat: &Chat) -> StoreResult<()>;
    async fn get_chat(&self, id: &str) -> StoreResult<Option<Chat>>;
    /// Remove a chat with its messages, votes and stream ids, returning what was removed
    async fn delete_chat(&self, id: &str) -> StoreResult<Option<Chat>>;
    /// A user's chats, newest first, paged by chat id cursors
    async fn list_chats(
        &self,
        user_id: &str,
        limit: usize,
        starting_after: Option<&str>,
        ending_before: Option<&str>,
    ) -> StoreResult<ChatPage>;
    async fn update_chat_last_context(&self, id: &str, usage: &AppUsage) -> StoreResult<()>;

    async fn save_messages(&self, messages: &[DbMessage]) -> StoreResult<()>;
    /// Messages of a chat in insertion order
    async fn get_messages(&self, chat_id: &str) -> StoreResult<Vec<DbMessage>>;
    /// User authored messages across all of a user's chats created at or after `since`
    async fn count_user_messages_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<usize>;

    async fn save_stream_id(&self, stream_id: &str, chat_id: &str) -> StoreResult<()>;
    /// Stream ids of a chat, oldest first
    async fn get_stream_ids(&self, chat_id: &str) -> StoreResult<Vec<String>>;

    async fn save_document(&self, document: &Document) -> StoreResult<()>;
    /// Every version of a document, oldest first
    async fn get_documents(&self, id: &str) -> StoreResult<Vec<Document>>;
    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.get_documents(id).await?.pop())
    }

    async fn save_suggestions(&self, suggestions: &[Suggestion]) -> StoreResult<()>;
    async fn get_suggestions(&self, document_id: &str) -> StoreResult<Vec<Suggestion>>;

    async fn vote_message(&self, vote: &Vote) -> StoreResult<()>;
    async fn get_votes(&self, chat_id: &str) -> StoreResult<Vec<Vote>>;
}

/// Cut one page out of a user's chats, which must already be ordered newest first.
///
/// `starting_after` yields chats newer than the cursor, `ending_before` chats older than it.
pub(crate) fn paginate(
    chats: Vec<Chat>,
    limit: usize,
    starting_after: Option<&str>,
    ending_before: Option<&str>,
) -> StoreResult<ChatPage> {
    let window: Vec<Chat> = match (starting_after, ending_before) {
        (Some(cursor), _) => {
            let position = chats
                .iter()
                .position(|c| c.id == cursor)
                .ok_or_else(|| StoreError::NotFound(format!("Chat with id {} not found", cursor)))?;
            chats.into_iter().take(position).collect()
        }
        (None, Some(cursor)) => {
            let position = chats
                .iter()
                .position(|c| c.id == cursor)
                .ok_or_else(|| StoreError::NotFound(format!("Chat with id {} not found", cursor)))?;
            chats.into_iter().skip(position + 1).collect()
        }
        (None, None) => chats,
    };

    let has_more = window.len() > limit;
    Ok(ChatPage {
        chats: window.into_iter().take(limit).collect(),
        has_more,
    })
}
