//! SQLite-backed `CallLogStore` (§6 Persistent storage interface)
//!
//! Grounded on the teacher's `SqliteMemoryStore`: a single connection
//! behind an async mutex, WAL mode, schema created via one
//! `execute_batch`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use super::{CallLogStore, CallMetadata, FinalizedCallLog};
use crate::error::GatewayError;

pub struct SqliteCallLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCallLogStore {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| GatewayError::fatal(format!("failed to create call log directory: {e}")))?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| GatewayError::fatal(format!("failed to open call log db: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| GatewayError::fatal(format!("failed to set pragmas: {e}")))?;
        Self::init_schema(&conn)?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<(), GatewayError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS call_logs (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL,
                stream_id TEXT NOT NULL,
                account_sid TEXT,
                caller_number TEXT,
                called_number TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                transcript TEXT,
                duration_ms INTEGER,
                lead_status TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .map_err(|e| GatewayError::fatal(format!("failed to init call log schema: {e}")))
    }
}

#[async_trait]
impl CallLogStore for SqliteCallLogStore {
    async fn insert(&self, metadata: &CallMetadata) -> Result<String, GatewayError> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO call_logs (id, call_id, stream_id, account_sid, caller_number, called_number, started_at, lead_status, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'not_connected', 1)",
            params![
                id,
                metadata.call_id,
                metadata.stream_id,
                metadata.account_sid,
                metadata.caller_number,
                metadata.called_number,
                metadata.started_at.to_rfc3339(),
            ],
        )
        .map_err(|e| GatewayError::transient("call_log", e))?;
        Ok(id)
    }

    async fn append_batch(&self, call_log_id: &str, entries: &[crate::types::TranscriptEntry]) -> Result<(), GatewayError> {
        if entries.is_empty() {
            return Ok(());
        }
        let addition: String = entries.iter().map(crate::types::TranscriptEntry::render_line).collect::<Vec<_>>().join("\n");
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE call_logs SET transcript = COALESCE(transcript || char(10), '') || ?1 WHERE id = ?2",
            params![addition, call_log_id],
        )
        .map_err(|e| GatewayError::transient("call_log", e))?;
        Ok(())
    }

    async fn finalize(&self, call_log_id: &str, finalized: &FinalizedCallLog) -> Result<(), GatewayError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE call_logs SET transcript = ?1, duration_ms = ?2, lead_status = ?3, is_active = 0, ended_at = datetime('now') WHERE id = ?4",
            params![
                finalized.transcript,
                finalized.duration.as_millis() as i64,
                finalized.lead_status.to_string(),
                call_log_id,
            ],
        )
        .map_err(|e| GatewayError::transient("call_log", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_log::CallMetadata;
    use crate::types::{LeadStatus, SpeakerType, TranscriptEntry, TranscriptSource};
    use chrono::Utc;

    async fn store() -> SqliteCallLogStore {
        let dir = tempfile::tempdir().unwrap();
        SqliteCallLogStore::new(dir.path().join("calls.sqlite3")).await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_finalize_round_trips() {
        let store = store().await;
        let id = store
            .insert(&CallMetadata {
                call_id: "C1".to_string(),
                stream_id: "S1".to_string(),
                account_sid: Some("A1".to_string()),
                caller_number: None,
                called_number: None,
                started_at: Utc::now(),
            })
            .await
            .unwrap();

        store
            .append_batch(
                &id,
                &[TranscriptEntry {
                    speaker: SpeakerType::User,
                    text: "hi".to_string(),
                    language: "en".to_string(),
                    timestamp: Utc::now(),
                    source: TranscriptSource::Stt,
                }],
            )
            .await
            .unwrap();

        store
            .finalize(
                &id,
                &FinalizedCallLog {
                    call_log_id: id.clone(),
                    transcript: "final transcript".to_string(),
                    duration: std::time::Duration::from_secs(30),
                    lead_status: LeadStatus::Maybe,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_call_log_id_on_append_is_a_noop_not_error() {
        let store = store().await;
        // Updating a nonexistent row affects zero rows; rusqlite does not error on that.
        store.append_batch("missing-id", &[]).await.unwrap();
    }
}
