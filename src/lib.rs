//! Telephony voice-agent gateway
//!
//! Bridges a PBX WebSocket media stream to streaming STT, a chat LLM,
//! and streaming TTS, arbitrated by a turn-taking state machine
//! (`turn::TurnController`). See `SPEC_FULL.md` for the full module
//! breakdown.

pub mod call_log;
pub mod config;
pub mod error;
pub mod lang;
pub mod llm;
pub mod pacer;
pub mod server;
pub mod session;
pub mod stt;
pub mod telephony;
pub mod tts;
pub mod turn;
pub mod types;

pub use config::Config;
pub use error::GatewayError;
pub use server::{serve, ServerState};
pub use session::{CallSession, Supervisor};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
