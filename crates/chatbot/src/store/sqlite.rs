use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use super::{
    paginate, Chat, ChatPage, ChatStore, DbMessage, Document, DocumentKind, StoreError,
    StoreResult, Suggestion, Visibility, Vote,
};
use crate::models::role::Role;
use crate::usage::AppUsage;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        visibility TEXT NOT NULL,
        last_context TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        chat_id TEXT NOT NULL,
        role TEXT NOT NULL,
        parts TEXT NOT NULL,
        attachments TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS streams (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL,
        chat_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS documents (
        id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        PRIMARY KEY (id, created_at)
    )",
    "CREATE TABLE IF NOT EXISTS suggestions (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        original_text TEXT NOT NULL,
        suggested_text TEXT NOT NULL,
        description TEXT,
        is_resolved BOOLEAN NOT NULL,
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS votes (
        chat_id TEXT NOT NULL,
        message_id TEXT NOT NULL,
        is_upvoted BOOLEAN NOT NULL,
        PRIMARY KEY (chat_id, message_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages (chat_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_chats_user ON chats (user_id, created_at)",
];

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

// fixed width so text comparison orders like time
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("invalid timestamp {}: {}", value, e)))
}

fn parse_enum<T: FromStr>(value: &str) -> StoreResult<T> {
    T::from_str(value).map_err(|_| StoreError::Database(format!("unexpected value {}", value)))
}

fn row_to_chat(row: &SqliteRow) -> StoreResult<Chat> {
    let last_context: Option<String> = row.try_get("last_context")?;
    Ok(Chat {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        visibility: parse_enum::<Visibility>(row.try_get("visibility")?)?,
        last_context: last_context
            .map(|raw| serde_json::from_str::<AppUsage>(&raw))
            .transpose()?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn row_to_message(row: &SqliteRow) -> StoreResult<DbMessage> {
    Ok(DbMessage {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        role: parse_enum::<Role>(row.try_get("role")?)?,
        parts: serde_json::from_str(row.try_get("parts")?)?,
        attachments: serde_json::from_str(row.try_get("attachments")?)?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn row_to_document(row: &SqliteRow) -> StoreResult<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        kind: parse_enum::<DocumentKind>(row.try_get("kind")?)?,
        content: row.try_get("content")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn row_to_suggestion(row: &SqliteRow) -> StoreResult<Suggestion> {
    Ok(Suggestion {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        original_text: row.try_get("original_text")?,
        suggested_text: row.try_get("suggested_text")?,
        description: row.try_get("description")?,
        is_resolved: row.try_get("is_resolved")?,
        user_id: row.try_get("user_id")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

/// Store backed by a sqlite database; the schema is created on connect
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://chat.db` or `sqlite::memory:`)
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // one long lived connection keeps an in-memory database alive for the pool's lifetime
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(*statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn save_chat(&self, chat: &Chat) -> StoreResult<()> {
        let last_context = chat
            .last_context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO chats (id, user_id, title, visibility, last_context, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                visibility = excluded.visibility,
                last_context = excluded.last_context",
        )
        .bind(&chat.id)
        .bind(&chat.user_id)
        .bind(&chat.title)
        .bind(chat.visibility.to_string())
        .bind(last_context)
        .bind(timestamp(&chat.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> StoreResult<Option<Chat>> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chat).transpose()
    }

    async fn delete_chat(&self, id: &str) -> StoreResult<Option<Chat>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(chat) = row.as_ref().map(row_to_chat).transpose()? else {
            return Ok(None);
        };

        for statement in [
            "DELETE FROM votes WHERE chat_id = ?",
            "DELETE FROM messages WHERE chat_id = ?",
            "DELETE FROM streams WHERE chat_id = ?",
            "DELETE FROM chats WHERE id = ?",
        ] {
            sqlx::query(statement).bind(id).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(Some(chat))
    }

    async fn list_chats(
        &self,
        user_id: &str,
        limit: usize,
        starting_after: Option<&str>,
        ending_before: Option<&str>,
    ) -> StoreResult<ChatPage> {
        let rows = sqlx::query(
            "SELECT * FROM chats WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let chats = rows.iter().map(row_to_chat).collect::<StoreResult<Vec<_>>>()?;
        paginate(chats, limit, starting_after, ending_before)
    }

    async fn update_chat_last_context(&self, id: &str, usage: &AppUsage) -> StoreResult<()> {
        let result = sqlx::query("UPDATE chats SET last_context = ? WHERE id = ?")
            .bind(serde_json::to_string(usage)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Chat with id {} not found", id)));
        }
        Ok(())
    }

    async fn save_messages(&self, messages: &[DbMessage]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for message in messages {
            sqlx::query(
                "INSERT INTO messages (id, chat_id, role, parts, attachments, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&message.id)
            .bind(&message.chat_id)
            .bind(message.role.to_string())
            .bind(serde_json::to_string(&message.parts)?)
            .bind(serde_json::to_string(&message.attachments)?)
            .bind(timestamp(&message.created_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_messages(&self, chat_id: &str) -> StoreResult<Vec<DbMessage>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE chat_id = ? ORDER BY seq ASC")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn count_user_messages_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM messages m
             JOIN chats c ON c.id = m.chat_id
             WHERE c.user_id = ? AND m.role = 'user' AND m.created_at >= ?",
        )
        .bind(user_id)
        .bind(timestamp(&since))
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as usize)
    }

    async fn save_stream_id(&self, stream_id: &str, chat_id: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO streams (id, chat_id, created_at) VALUES (?, ?, ?)")
            .bind(stream_id)
            .bind(chat_id)
            .bind(timestamp(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_stream_ids(&self, chat_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM streams WHERE chat_id = ? ORDER BY seq ASC")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(StoreError::from))
            .collect()
    }

    async fn save_document(&self, document: &Document) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO documents (id, created_at, user_id, title, kind, content)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(timestamp(&document.created_at))
        .bind(&document.user_id)
        .bind(&document.title)
        .bind(document.kind.to_string())
        .bind(&document.content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_documents(&self, id: &str) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE id = ? ORDER BY created_at ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn save_suggestions(&self, suggestions: &[Suggestion]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for suggestion in suggestions {
            sqlx::query(
                "INSERT INTO suggestions
                    (id, document_id, original_text, suggested_text, description, is_resolved, user_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&suggestion.id)
            .bind(&suggestion.document_id)
            .bind(&suggestion.original_text)
            .bind(&suggestion.suggested_text)
            .bind(&suggestion.description)
            .bind(suggestion.is_resolved)
            .bind(&suggestion.user_id)
            .bind(timestamp(&suggestion.created_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_suggestions(&self, document_id: &str) -> StoreResult<Vec<Suggestion>> {
        let rows = sqlx::query(
            "SELECT * FROM suggestions WHERE document_id = ? ORDER BY created_at ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_suggestion).collect()
    }

    async fn vote_message(&self, vote: &Vote) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO votes (chat_id, message_id, is_upvoted) VALUES (?, ?, ?)
             ON CONFLICT(chat_id, message_id) DO UPDATE SET is_upvoted = excluded.is_upvoted",
        )
        .bind(&vote.chat_id)
        .bind(&vote.message_id)
        .bind(vote.is_upvoted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_votes(&self, chat_id: &str) -> StoreResult<Vec<Vote>> {
        let rows = sqlx::query("SELECT * FROM votes WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> StoreResult<Vote> {
                Ok(Vote {
                    chat_id: row.try_get("chat_id")?,
                    message_id: row.try_get("message_id")?,
                    is_upvoted: row.try_get("is_upvoted")?,
                })
            })
            .collect()
    }
}
