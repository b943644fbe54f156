//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message in the LLM conversation history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Convert to OpenAI-style role string.
    pub fn to_openai_string(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

/// A single turn in the bounded conversation history (§3 `history`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Call direction as reported by the PBX `start` frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// The TurnController's state machine states (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Ending,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Thinking => "thinking",
            TurnState::Speaking => "speaking",
            TurnState::Ending => "ending",
        };
        write!(f, "{s}")
    }
}

/// Source that produced a transcript entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSource {
    Stt,
    Tts,
}

/// Speaker type for a transcript entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerType {
    User,
    Assistant,
}

impl std::fmt::Display for SpeakerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeakerType::User => write!(f, "User"),
            SpeakerType::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One line of the call transcript (§3 `TranscriptEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: SpeakerType,
    pub text: String,
    pub language: String,
    pub timestamp: DateTime<Utc>,
    pub source: TranscriptSource,
}

impl TranscriptEntry {
    /// Render as `[<ISO-8601>] <Speaker> (<lang>): <text>` (§4.7).
    pub fn render_line(&self) -> String {
        format!(
            "[{}] {} ({}): {}",
            self.timestamp.to_rfc3339(),
            self.speaker,
            self.language,
            self.text
        )
    }
}

/// Closed enumeration of lead outcomes (§4.7, §6). Unknown inputs
/// collapse to `Maybe`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Vvi,
    Maybe,
    Enrolled,
    JunkLead,
    NotRequired,
    EnrolledOther,
    Decline,
    NotEligible,
    WrongNumber,
    HotFollowup,
    ColdFollowup,
    Schedule,
    NotConnected,
}

impl LeadStatus {
    /// Parse a free-form status string, collapsing anything unrecognized
    /// to `Maybe` per §4.7.
    pub fn parse_or_maybe(raw: &str) -> Self {
        match raw.to_lowercase().replace(['-', ' '], "_").as_str() {
            "vvi" => LeadStatus::Vvi,
            "maybe" => LeadStatus::Maybe,
            "enrolled" => LeadStatus::Enrolled,
            "junk_lead" => LeadStatus::JunkLead,
            "not_required" => LeadStatus::NotRequired,
            "enrolled_other" => LeadStatus::EnrolledOther,
            "decline" => LeadStatus::Decline,
            "not_eligible" => LeadStatus::NotEligible,
            "wrong_number" => LeadStatus::WrongNumber,
            "hot_followup" => LeadStatus::HotFollowup,
            "cold_followup" => LeadStatus::ColdFollowup,
            "schedule" => LeadStatus::Schedule,
            "not_connected" => LeadStatus::NotConnected,
            _ => LeadStatus::Maybe,
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LeadStatus::Vvi => "vvi",
            LeadStatus::Maybe => "maybe",
            LeadStatus::Enrolled => "enrolled",
            LeadStatus::JunkLead => "junk_lead",
            LeadStatus::NotRequired => "not_required",
            LeadStatus::EnrolledOther => "enrolled_other",
            LeadStatus::Decline => "decline",
            LeadStatus::NotEligible => "not_eligible",
            LeadStatus::WrongNumber => "wrong_number",
            LeadStatus::HotFollowup => "hot_followup",
            LeadStatus::ColdFollowup => "cold_followup",
            LeadStatus::Schedule => "schedule",
            LeadStatus::NotConnected => "not_connected",
        };
        write!(f, "{s}")
    }
}

/// Resolved agent configuration (§3 `agent`). The lookup itself is an
/// out-of-scope collaborator; this is the shape the gateway consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub system_prompt: String,
    pub first_message: String,
    pub default_language: String,
    pub voice: String,
    pub active: bool,
}

impl AgentConfig {
    /// A deliberately inert config used when no real agent store is wired
    /// in (tests, local runs without the admin config service).
    pub fn inactive_stub(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            system_prompt: String::new(),
            first_message: String::new(),
            default_language: "en".to_string(),
            voice: "default".to_string(),
            active: false,
        }
    }

    /// Generic active agent used as the `InMemoryAgentDirectory` fallback
    /// when no account-specific config has been registered.
    pub fn default_agent() -> Self {
        Self {
            agent_id: "default".to_string(),
            system_prompt: "You are a helpful phone assistant. Keep answers short.".to_string(),
            first_message: "Hello, thanks for calling. How can I help you today?".to_string(),
            default_language: "en".to_string(),
            voice: "default".to_string(),
            active: true,
        }
    }
}

/// Optional caller identity parsed from the `extraData`/`czdata` side
/// channel (§3 `user`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUser {
    pub name: Option<String>,
    pub custom_params: serde_json::Map<String, serde_json::Value>,
}
