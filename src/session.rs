//! CallSession and the call registry (§3, §5)
//!
//! `CallSession` is the per-call state the TurnController and the
//! telephony handler close over. `Supervisor` is the single allowed
//! piece of global mutable state (§9): one `stream_id -> CallSession`
//! map behind a mutex, used for admin lookups and external
//! termination.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::pacer::InterruptHandle;
use crate::types::{AgentConfig, Direction, HistoryEntry, LeadStatus, Role, SessionUser, TurnState};

/// Opaque agent-config lookup port (§6, §9): "treated as an opaque
/// `AgentConfig` fetcher keyed by account/caller identifiers". The
/// actual directory/admin service is out of scope; this crate ships an
/// in-memory implementation for tests and standalone runs.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn resolve(&self, account_sid: Option<&str>, caller_number: Option<&str>) -> AgentConfig;
}

/// Keyed by `accountSid`, falling back to a single default agent.
#[derive(Default)]
pub struct InMemoryAgentDirectory {
    by_account: HashMap<String, AgentConfig>,
    default_agent: Option<AgentConfig>,
}

impl InMemoryAgentDirectory {
    pub fn new(default_agent: AgentConfig) -> Self {
        Self { by_account: HashMap::new(), default_agent: Some(default_agent) }
    }

    pub fn with_account(mut self, account_sid: impl Into<String>, agent: AgentConfig) -> Self {
        self.by_account.insert(account_sid.into(), agent);
        self
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn resolve(&self, account_sid: Option<&str>, _caller_number: Option<&str>) -> AgentConfig {
        if let Some(sid) = account_sid {
            if let Some(agent) = self.by_account.get(sid) {
                return agent.clone();
            }
        }
        self.default_agent.clone().unwrap_or_else(|| AgentConfig::inactive_stub("default"))
    }
}

/// Bound on conversation history kept in memory (§3 Invariant: history
/// never exceeds N=10 entries).
const MAX_HISTORY: usize = 10;

/// Per-call state (§3 `CallSession`).
pub struct CallSession {
    pub call_id: String,
    pub stream_id: String,
    pub account_sid: Option<String>,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub direction: Direction,
    pub agent: AgentConfig,
    pub user: SessionUser,
    pub language: String,
    pub history: Vec<HistoryEntry>,
    pub turn_state: TurnState,
    pub active_turn_id: u64,
    pub call_log_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub lead_status: LeadStatus,
    /// Cancels whatever is currently playing through the AudioPacer.
    pub interrupt: InterruptHandle,
    /// Woken by the admin API or shutdown drain to tell the telephony
    /// handler's event loop to start the Ending sequence (§4.1, §5
    /// External termination).
    pub terminate: Arc<Notify>,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        stream_id: impl Into<String>,
        direction: Direction,
        agent: AgentConfig,
    ) -> Self {
        let language = agent.default_language.clone();
        Self {
            call_id: call_id.into(),
            stream_id: stream_id.into(),
            account_sid: None,
            caller_number: None,
            called_number: None,
            direction,
            agent,
            user: SessionUser::default(),
            language,
            history: Vec::new(),
            turn_state: TurnState::Idle,
            active_turn_id: 0,
            call_log_id: None,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            lead_status: LeadStatus::NotConnected,
            interrupt: InterruptHandle::new(),
            terminate: Arc::new(Notify::new()),
        }
    }

    /// Append a history entry, dropping the oldest once the cap is
    /// exceeded. Strict user/assistant alternation is the caller's
    /// responsibility (§3 Invariant 4); this only enforces the bound.
    pub fn push_history(&mut self, role: Role, text: impl Into<String>) {
        self.history.push(HistoryEntry { role, text: text.into() });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }
    }

    pub fn mark_answered(&mut self) {
        if self.answered_at.is_none() {
            self.answered_at = Some(Utc::now());
        }
    }

    pub fn mark_ended(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// Handle to one live call, shared between the telephony handler, any
/// background worker tasks, and the admin API.
pub type SharedSession = Arc<Mutex<CallSession>>;

/// The single in-process call registry (§5, §9 "only one allowed" piece
/// of shared mutable state). Keyed by `streamId` since that's the PBX
/// identifier present on every frame.
#[derive(Default)]
pub struct Supervisor {
    calls: Mutex<HashMap<String, SharedSession>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: CallSession) -> SharedSession {
        let stream_id = session.stream_id.clone();
        let shared = Arc::new(Mutex::new(session));
        self.calls.lock().await.insert(stream_id, shared.clone());
        shared
    }

    pub async fn get(&self, stream_id: &str) -> Option<SharedSession> {
        self.calls.lock().await.get(stream_id).cloned()
    }

    pub async fn remove(&self, stream_id: &str) -> Option<SharedSession> {
        self.calls.lock().await.remove(stream_id)
    }

    pub async fn stream_ids(&self) -> Vec<String> {
        self.calls.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Terminate one call by `streamId`. Returns `false` if no such
    /// call is currently registered.
    pub async fn terminate(&self, stream_id: &str) -> bool {
        match self.get(stream_id).await {
            Some(session) => {
                let guard = session.lock().await;
                guard.interrupt.trigger();
                guard.terminate.notify_one();
                true
            }
            None => false,
        }
    }

    /// Trigger every live call's interrupt flag so in-flight playback
    /// stops; used on process shutdown (SPEC_FULL §B graceful drain).
    /// Does not itself emit the PBX `stop` frame — that is the
    /// telephony handler's job once it observes the flag.
    pub async fn interrupt_all(&self) {
        for session in self.calls.lock().await.values() {
            let guard = session.lock().await;
            guard.interrupt.trigger();
            guard.terminate.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentConfig {
        AgentConfig::inactive_stub("agent-1")
    }

    #[test]
    fn push_history_caps_at_ten_dropping_oldest() {
        let mut session = CallSession::new("C1", "S1", Direction::Inbound, agent());
        for i in 0..15 {
            session.push_history(Role::User, format!("turn {i}"));
        }
        assert_eq!(session.history.len(), MAX_HISTORY);
        assert_eq!(session.history.first().unwrap().text, "turn 5");
        assert_eq!(session.history.last().unwrap().text, "turn 14");
    }

    #[tokio::test]
    async fn supervisor_register_get_remove_round_trips() {
        let supervisor = Supervisor::new();
        let session = CallSession::new("C1", "S1", Direction::Inbound, agent());
        supervisor.register(session).await;

        assert_eq!(supervisor.len().await, 1);
        assert!(supervisor.get("S1").await.is_some());

        let removed = supervisor.remove("S1").await;
        assert!(removed.is_some());
        assert!(supervisor.is_empty().await);
    }

    #[tokio::test]
    async fn agent_directory_falls_back_to_default_for_unknown_account() {
        let directory = InMemoryAgentDirectory::new(AgentConfig::inactive_stub("default"))
            .with_account("A1", AgentConfig::inactive_stub("special"));

        assert_eq!(directory.resolve(Some("A1"), None).await.agent_id, "special");
        assert_eq!(directory.resolve(Some("unknown"), None).await.agent_id, "default");
        assert_eq!(directory.resolve(None, None).await.agent_id, "default");
    }

    #[tokio::test]
    async fn interrupt_all_sets_every_live_sessions_flag() {
        let supervisor = Supervisor::new();
        supervisor.register(CallSession::new("C1", "S1", Direction::Inbound, agent())).await;
        supervisor.register(CallSession::new("C2", "S2", Direction::Inbound, agent())).await;

        supervisor.interrupt_all().await;

        for stream_id in supervisor.stream_ids().await {
            let session = supervisor.get(&stream_id).await.unwrap();
            assert!(session.lock().await.interrupt.is_set());
        }
    }
}
