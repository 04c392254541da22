//! SQLite-backed [`ChatStore`].
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use crate::error::ChatError;
use crate::util::unix_now_millis;

use super::store::{
    ChatStore, FeedbackKind, NewMessage, SessionSummary, StoredMessage, StoredSession,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_session (
    id TEXT PRIMARY KEY,
    label TEXT,
    title TEXT,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS chat_message (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES chat_session(id),
    question TEXT NOT NULL,
    request_payload TEXT NOT NULL,
    response_payload TEXT NOT NULL,
    final_text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS chat_message_session_idx ON chat_message (session_id, id);
CREATE TABLE IF NOT EXISTS message_feedback (
    message_id INTEGER NOT NULL REFERENCES chat_message(id),
    user_id TEXT NOT NULL,
    feedback_type TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (message_id, user_id)
);
";

fn persistence_err(err: impl std::fmt::Display) -> ChatError {
    ChatError::Persistence(err.to_string())
}

pub struct SqliteChatStore {
    db: Connection,
}

impl SqliteChatStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Persistence`] when the file cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, ChatError> {
        let db = Connection::open(path).await.map_err(persistence_err)?;
        Self::with_connection(db).await
    }

    /// In-memory database, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Persistence`] when the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, ChatError> {
        let db = Connection::open_in_memory()
            .await
            .map_err(persistence_err)?;
        Self::with_connection(db).await
    }

    async fn with_connection(db: Connection) -> Result<Self, ChatError> {
        db.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(persistence_err)?;
        Ok(Self { db })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn create_session_if_absent(
        &self,
        id: &str,
        label: Option<&str>,
    ) -> Result<bool, ChatError> {
        let id = id.to_owned();
        let label = label.map(str::to_owned);
        let created_at = to_i64(unix_now_millis());
        let inserted = self
            .db
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO chat_session (id, label, created_at) VALUES (?1, ?2, ?3)",
                    params![id, label, created_at],
                )?;
                Ok(changed)
            })
            .await
            .map_err(persistence_err)?;
        Ok(inserted > 0)
    }

    async fn append_message(&self, message: NewMessage) -> Result<i64, ChatError> {
        let request_payload = message.request_payload.to_string();
        let response_payload = message.response_payload.to_string();
        let created_at = to_i64(unix_now_millis());
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO chat_message \
                     (session_id, question, request_payload, response_payload, final_text, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        message.session_id,
                        message.question,
                        request_payload,
                        response_payload,
                        message.final_text,
                        created_at
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(persistence_err)
    }

    async fn update_session_title(&self, id: &str, title: &str) -> Result<(), ChatError> {
        let id = id.to_owned();
        let title = title.to_owned();
        let changed = self
            .db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE chat_session SET title = ?1 WHERE id = ?2",
                    params![title, id],
                )?;
                Ok(changed)
            })
            .await
            .map_err(persistence_err)?;
        if changed == 0 {
            return Err(ChatError::Persistence(
                "title update matched no session".to_string(),
            ));
        }
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<Option<StoredSession>, ChatError> {
        let id = id.to_owned();
        self.db
            .call(move |conn| {
                let session = conn
                    .query_row(
                        "SELECT id, label, title, created_at FROM chat_session WHERE id = ?1",
                        [id],
                        |row| {
                            Ok(StoredSession {
                                id: row.get(0)?,
                                label: row.get(1)?,
                                title: row.get(2)?,
                                created_at: to_u64(row.get(3)?),
                            })
                        },
                    )
                    .optional()?;
                Ok(session)
            })
            .await
            .map_err(persistence_err)
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, ChatError> {
        let session_id = session_id.to_owned();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, question, request_payload, response_payload, final_text, created_at \
                     FROM chat_message WHERE session_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([session_id], |row| {
                        let request: String = row.get(3)?;
                        let response: String = row.get(4)?;
                        Ok(StoredMessage {
                            id: row.get(0)?,
                            session_id: row.get(1)?,
                            question: row.get(2)?,
                            request_payload: serde_json::from_str(&request)
                                .unwrap_or(serde_json::Value::String(request)),
                            response_payload: serde_json::from_str(&response)
                                .unwrap_or(serde_json::Value::String(response)),
                            final_text: row.get(5)?,
                            created_at: to_u64(row.get(6)?),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(persistence_err)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT s.id, s.label, s.title, s.created_at, \
                     (SELECT COUNT(*) FROM chat_message m WHERE m.session_id = s.id) \
                     FROM chat_session s ORDER BY s.created_at DESC, s.rowid DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(SessionSummary {
                            id: row.get(0)?,
                            label: row.get(1)?,
                            title: row.get(2)?,
                            created_at: to_u64(row.get(3)?),
                            message_count: to_usize(row.get(4)?),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(persistence_err)
    }

    async fn set_feedback(
        &self,
        message_id: i64,
        user_id: &str,
        kind: FeedbackKind,
    ) -> Result<bool, ChatError> {
        let user_id = user_id.to_owned();
        let now = to_i64(unix_now_millis());
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existed = tx
                    .query_row(
                        "SELECT 1 FROM message_feedback WHERE message_id = ?1 AND user_id = ?2",
                        params![message_id, user_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                tx.execute(
                    "INSERT INTO message_feedback \
                     (message_id, user_id, feedback_type, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4) \
                     ON CONFLICT (message_id, user_id) DO UPDATE SET \
                     feedback_type = excluded.feedback_type, updated_at = excluded.updated_at",
                    params![message_id, user_id, kind.as_str(), now],
                )?;
                tx.commit()?;
                Ok(!existed)
            })
            .await
            .map_err(persistence_err)
    }

    async fn load_feedback(
        &self,
        message_id: i64,
        user_id: &str,
    ) -> Result<Option<FeedbackKind>, ChatError> {
        let user_id = user_id.to_owned();
        let stored = self
            .db
            .call(move |conn| {
                let kind: Option<String> = conn
                    .query_row(
                        "SELECT feedback_type FROM message_feedback \
                         WHERE message_id = ?1 AND user_id = ?2",
                        params![message_id, user_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(kind)
            })
            .await
            .map_err(persistence_err)?;
        stored.map(|kind| kind.parse::<FeedbackKind>()).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_or_ignore_session() {
        let store = SqliteChatStore::open_in_memory().await.unwrap();
        assert!(store.create_session_if_absent("42", Some("Physics")).await.unwrap());
        assert!(!store.create_session_if_absent("42", None).await.unwrap());

        store.update_session_title("42", "Kinematics").await.unwrap();
        let session = store.load_session("42").await.unwrap().unwrap();
        assert_eq!(session.label.as_deref(), Some("Physics"));
        assert_eq!(session.title.as_deref(), Some("Kinematics"));
        assert!(store.load_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_and_load_messages() {
        let store = SqliteChatStore::open_in_memory().await.unwrap();
        store.create_session_if_absent("s", None).await.unwrap();
        for question in ["first", "second"] {
            store
                .append_message(NewMessage {
                    session_id: "s".to_string(),
                    question: question.to_string(),
                    request_payload: json!({"question": question}),
                    response_payload: json!([{"output": "answer"}]),
                    final_text: format!("answer to {question}"),
                })
                .await
                .unwrap();
        }
        let messages = store.load_messages("s").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].question, "first");
        assert_eq!(messages[1].final_text, "answer to second");
        assert_eq!(messages[0].response_payload, json!([{"output": "answer"}]));
    }

    #[tokio::test]
    async fn test_message_for_unknown_session_rejected() {
        let store = SqliteChatStore::open_in_memory().await.unwrap();
        let err = store
            .append_message(NewMessage {
                session_id: "missing".to_string(),
                question: "q".to_string(),
                request_payload: json!({}),
                response_payload: json!({}),
                final_text: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Persistence(_)));
    }

    fn answer(session_id: &str, question: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.to_string(),
            question: question.to_string(),
            request_payload: json!({}),
            response_payload: json!({}),
            final_text: "a".to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_sessions_counts_messages() {
        let store = SqliteChatStore::open_in_memory().await.unwrap();
        store.create_session_if_absent("3", None).await.unwrap();
        store.create_session_if_absent("42", Some("Physics")).await.unwrap();
        store.update_session_title("42", "Kinematics").await.unwrap();
        store.append_message(answer("3", "one")).await.unwrap();
        store.append_message(answer("3", "two")).await.unwrap();
        store.append_message(answer("42", "three")).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "42");
        assert_eq!(sessions[0].message_count, 1);
        assert_eq!(sessions[0].display_name(), "Kinematics");
        assert_eq!(sessions[1].id, "3");
        assert_eq!(sessions[1].message_count, 2);
        assert_eq!(sessions[1].display_name(), "Session 000003");
    }

    #[tokio::test]
    async fn test_feedback_upsert() {
        let store = SqliteChatStore::open_in_memory().await.unwrap();
        store.create_session_if_absent("s", None).await.unwrap();
        let id = store.append_message(answer("s", "q")).await.unwrap();

        assert!(store.set_feedback(id, "u-1", FeedbackKind::Helpful).await.unwrap());
        assert!(!store
            .set_feedback(id, "u-1", FeedbackKind::NeedsImprovement)
            .await
            .unwrap());
        assert_eq!(
            store.load_feedback(id, "u-1").await.unwrap(),
            Some(FeedbackKind::NeedsImprovement)
        );
        assert_eq!(store.load_feedback(id, "u-2").await.unwrap(), None);

        let err = store
            .set_feedback(id + 100, "u-1", FeedbackKind::Helpful)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Persistence(_)));
    }
}
