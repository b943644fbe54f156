//! Error taxonomy (§7)
//!
//! Component clients return a narrow error where it helps callers match on
//! specific failure modes; everything funnels into `GatewayError` at the
//! point where the TurnController or Supervisor has to decide
//! `skip | speak-fallback | terminate`.

use thiserror::Error;

/// Crate-wide error type, mirroring the §7 taxonomy.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient network failure in a dependency (STT/TTS/LLM connect or
    /// mid-stream failure). Recoverable: retry or degrade.
    #[error("transient failure in {component}: {source}")]
    Transient {
        component: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed PBX frame, bad base64, unknown event. Recovery: log and
    /// ignore, never fatal.
    #[error("protocol error: {detail}")]
    Protocol { detail: String },

    /// HTTP 401/429 (or equivalent) from a dependency. Recovery: fail this
    /// turn only, do not terminate the call.
    #[error("upstream {component} rejected request: {status}")]
    Upstream { component: &'static str, status: String },

    /// A local invariant violation — stale turn output, playback race.
    /// Recovery: drop the stale output at emit time.
    #[error("stale turn: expected {expected}, got {got}")]
    StaleTurn { expected: u64, got: u64 },

    /// Missing API keys at startup, WS upgrade failure. Recovery: process
    /// exit (startup) or socket close (runtime).
    #[error("fatal: {detail}")]
    Fatal { detail: String },
}

impl GatewayError {
    pub fn transient(component: &'static str, source: impl Into<anyhow::Error>) -> Self {
        GatewayError::Transient { component, source: source.into() }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        GatewayError::Protocol { detail: detail.into() }
    }

    pub fn upstream(component: &'static str, status: impl Into<String>) -> Self {
        GatewayError::Upstream { component, status: status.into() }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        GatewayError::Fatal { detail: detail.into() }
    }

    /// Whether this error should end the call outright rather than just
    /// skip/degrade the current turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Fatal { .. })
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
