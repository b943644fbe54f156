//! CallLogger (§4.7)
//!
//! Keeps the live in-memory transcript for a call, batches appends into
//! the durable `CallLogStore`, and finalizes the record when the call
//! ends.

pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::GatewayError;
use crate::types::{LeadStatus, TranscriptEntry};

/// Metadata supplied when a call log is opened (§4.7 `open`).
#[derive(Debug, Clone)]
pub struct CallMetadata {
    pub call_id: String,
    pub stream_id: String,
    pub account_sid: Option<String>,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// The finalized record written when a call ends.
#[derive(Debug, Clone)]
pub struct FinalizedCallLog {
    pub call_log_id: String,
    pub transcript: String,
    pub duration: Duration,
    pub lead_status: LeadStatus,
}

/// Opaque persistence port (§6 Persistent storage interface). This
/// crate ships an in-memory implementation for tests/standalone runs
/// and a SQLite-backed one; the production backend is out of scope.
#[async_trait]
pub trait CallLogStore: Send + Sync {
    async fn insert(&self, metadata: &CallMetadata) -> Result<String, GatewayError>;
    async fn append_batch(&self, call_log_id: &str, entries: &[TranscriptEntry]) -> Result<(), GatewayError>;
    async fn finalize(&self, call_log_id: &str, finalized: &FinalizedCallLog) -> Result<(), GatewayError>;
}

/// Batches transcript entries (N=5 or 3s timer, §4.7) and owns the live
/// in-memory transcript for one call.
pub struct CallLogger<S: CallLogStore> {
    store: S,
    call_log_id: String,
    started_at: DateTime<Utc>,
    transcript: Vec<TranscriptEntry>,
    pending: Vec<TranscriptEntry>,
    batch_size: usize,
}

impl<S: CallLogStore> CallLogger<S> {
    pub async fn open(store: S, metadata: CallMetadata, batch_size: usize) -> Result<Self, GatewayError> {
        let call_log_id = store.insert(&metadata).await?;
        Ok(Self {
            store,
            call_log_id,
            started_at: metadata.started_at,
            transcript: Vec::new(),
            pending: Vec::new(),
            batch_size,
        })
    }

    pub fn call_log_id(&self) -> &str {
        &self.call_log_id
    }

    /// Append one transcript entry; flushes the pending batch once it
    /// reaches `batch_size`. The 3-second timer flush (§4.7) is driven
    /// separately by the telephony handler's event loop calling `flush`
    /// directly on a tick.
    pub async fn append(&mut self, entry: TranscriptEntry) -> Result<(), GatewayError> {
        self.transcript.push(entry.clone());
        self.pending.push(entry);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), GatewayError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        self.store.append_batch(&self.call_log_id, &batch).await
    }

    /// Render the transcript sorted by timestamp (§4.7, §3 Invariant 3).
    pub fn render_transcript(&self) -> String {
        let mut ordered = self.transcript.clone();
        ordered.sort_by_key(|e| e.timestamp);
        ordered.iter().map(TranscriptEntry::render_line).collect::<Vec<_>>().join("\n")
    }

    pub async fn finalize(mut self, lead_status: LeadStatus) -> Result<(), GatewayError> {
        self.flush().await?;
        let duration = (Utc::now() - self.started_at).to_std().unwrap_or_default();
        let finalized = FinalizedCallLog {
            call_log_id: self.call_log_id.clone(),
            transcript: self.render_transcript(),
            duration,
            lead_status,
        };
        self.store.finalize(&self.call_log_id, &finalized).await
    }
}

/// In-memory `CallLogStore`, used in tests and when no external backend
/// is configured.
#[derive(Default)]
pub struct InMemoryCallLogStore {
    inner: tokio::sync::Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    next_id: u64,
    records: std::collections::HashMap<String, InMemoryRecord>,
}

#[derive(Debug, Clone)]
pub struct InMemoryRecord {
    pub metadata_call_id: String,
    pub entries: Vec<TranscriptEntry>,
    pub finalized: Option<FinalizedCallLog>,
}

impl InMemoryCallLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, call_log_id: &str) -> Option<InMemoryRecord> {
        self.inner.lock().await.records.get(call_log_id).cloned()
    }
}

#[async_trait]
impl CallLogStore for InMemoryCallLogStore {
    async fn insert(&self, metadata: &CallMetadata) -> Result<String, GatewayError> {
        let mut state = self.inner.lock().await;
        state.next_id += 1;
        let id = format!("call-{}", state.next_id);
        state.records.insert(
            id.clone(),
            InMemoryRecord { metadata_call_id: metadata.call_id.clone(), entries: Vec::new(), finalized: None },
        );
        Ok(id)
    }

    async fn append_batch(&self, call_log_id: &str, entries: &[TranscriptEntry]) -> Result<(), GatewayError> {
        let mut state = self.inner.lock().await;
        if let Some(record) = state.records.get_mut(call_log_id) {
            record.entries.extend_from_slice(entries);
            Ok(())
        } else {
            Err(GatewayError::protocol(format!("unknown call log id {call_log_id}")))
        }
    }

    async fn finalize(&self, call_log_id: &str, finalized: &FinalizedCallLog) -> Result<(), GatewayError> {
        let mut state = self.inner.lock().await;
        if let Some(record) = state.records.get_mut(call_log_id) {
            record.finalized = Some(finalized.clone());
            debug!(call_log_id, "call log finalized");
            Ok(())
        } else {
            Err(GatewayError::protocol(format!("unknown call log id {call_log_id}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SpeakerType, TranscriptSource};

    fn entry(text: &str) -> TranscriptEntry {
        TranscriptEntry {
            speaker: SpeakerType::User,
            text: text.to_string(),
            language: "en".to_string(),
            timestamp: Utc::now(),
            source: TranscriptSource::Stt,
        }
    }

    fn metadata() -> CallMetadata {
        CallMetadata {
            call_id: "C1".to_string(),
            stream_id: "S1".to_string(),
            account_sid: None,
            caller_number: None,
            called_number: None,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_flushes_at_batch_size() {
        let mut logger = CallLogger::open(InMemoryCallLogStore::new(), metadata(), 2).await.unwrap();
        logger.append(entry("one")).await.unwrap();
        logger.append(entry("two")).await.unwrap();
        // Batch of 2 flushed on the second append; pending is empty again.
        logger.append(entry("three")).await.unwrap();
        assert_eq!(logger.transcript.len(), 3);
    }

    #[tokio::test]
    async fn finalize_persists_rendered_transcript() {
        let mut logger = CallLogger::open(InMemoryCallLogStore::new(), metadata(), 5).await.unwrap();
        logger.append(entry("hello")).await.unwrap();
        let rendered = logger.render_transcript();
        assert!(rendered.contains("hello"));
        logger.finalize(LeadStatus::Maybe).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_lead_status_collapses_to_maybe() {
        assert_eq!(LeadStatus::parse_or_maybe("not-a-real-status"), LeadStatus::Maybe);
    }
}
