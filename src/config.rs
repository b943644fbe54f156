//! Configuration management (§6, §9 Configuration, SPEC_FULL §A.3)
//!
//! Loads the required upstream API keys and the tunable thresholds the
//! TurnController and AudioPacer use, falling back to the defaults named in
//! the spec when an env var is absent or fails to parse.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `development` or `production` (SPEC_FULL §A.3's `ENV`, the
    /// `NODE_ENV`-style flag). Governs log format and panic behavior in
    /// `main.rs`; nothing in this struct itself branches on it.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProviderKeys,
    #[serde(default)]
    pub turn: TurnThresholds,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub call_log: CallLogConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// API keys for the three required upstream providers (§6). Never
/// serialized back out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderKeys {
    #[serde(skip)]
    pub deepgram_api_key: String,
    #[serde(skip)]
    pub sarvam_api_key: String,
    #[serde(skip)]
    pub openai_api_key: String,
}

/// Smart-interruption thresholds (§4.8). Defaults are the values named in
/// the spec; all are overridable via env vars for tuning without a
/// rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnThresholds {
    #[serde(default = "default_short_speech_threshold")]
    pub short_speech_threshold: usize,
    #[serde(default = "default_min_audio_bytes_for_completion")]
    pub min_audio_bytes_for_completion: usize,
    #[serde(default = "default_interim_speech_wait_ms")]
    pub interim_speech_wait_ms: u64,
    #[serde(default = "default_completion_wait_ms")]
    pub completion_wait_ms: u64,
    /// Whether `answer` is implied by `start` when the PBX variant never
    /// sends a distinct `answer` frame (Open Question, DESIGN.md).
    #[serde(default = "default_true")]
    pub answer_implied_by_start: bool,
}

fn default_short_speech_threshold() -> usize {
    20
}
fn default_min_audio_bytes_for_completion() -> usize {
    50_000
}
fn default_interim_speech_wait_ms() -> u64 {
    500
}
fn default_completion_wait_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

impl Default for TurnThresholds {
    fn default() -> Self {
        Self {
            short_speech_threshold: default_short_speech_threshold(),
            min_audio_bytes_for_completion: default_min_audio_bytes_for_completion(),
            interim_speech_wait_ms: default_interim_speech_wait_ms(),
            completion_wait_ms: default_completion_wait_ms(),
            answer_implied_by_start: default_true(),
        }
    }
}

/// Per-component timeouts (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_stt_connect_ms")]
    pub stt_connect_ms: u64,
    #[serde(default = "default_stt_max_reconnects")]
    pub stt_max_reconnects: u32,
    #[serde(default = "default_llm_request_ms")]
    pub llm_request_ms: u64,
    #[serde(default = "default_tts_warmup_ms")]
    pub tts_warmup_ms: u64,
    #[serde(default = "default_tts_http_ms")]
    pub tts_http_ms: u64,
    #[serde(default = "default_termination_ack_ms")]
    pub termination_ack_ms: u64,
    #[serde(default = "default_termination_force_ms")]
    pub termination_force_ms: u64,
}

fn default_stt_connect_ms() -> u64 {
    2_000
}
fn default_stt_max_reconnects() -> u32 {
    3
}
fn default_llm_request_ms() -> u64 {
    4_000
}
fn default_tts_warmup_ms() -> u64 {
    250
}
fn default_tts_http_ms() -> u64 {
    5_000
}
fn default_termination_ack_ms() -> u64 {
    500
}
fn default_termination_force_ms() -> u64 {
    1_500
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stt_connect_ms: default_stt_connect_ms(),
            stt_max_reconnects: default_stt_max_reconnects(),
            llm_request_ms: default_llm_request_ms(),
            tts_warmup_ms: default_tts_warmup_ms(),
            tts_http_ms: default_tts_http_ms(),
            termination_ack_ms: default_termination_ack_ms(),
            termination_force_ms: default_termination_force_ms(),
        }
    }
}

/// CallLogger batching parameters (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Path to the SQLite database file backing the default
    /// `CallLogStore`. `:memory:` for ephemeral/test runs.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_batch_size() -> usize {
    5
}
fn default_flush_interval_ms() -> u64 {
    3_000
}
fn default_db_path() -> String {
    "call_log.sqlite3".to_string()
}

impl Default for CallLogConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            db_path: default_db_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            providers: ProviderKeys::default(),
            turn: TurnThresholds::default(),
            timeouts: TimeoutConfig::default(),
            call_log: CallLogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment, applying the spec's
    /// defaults for anything unset or unparseable. Missing any of the
    /// three provider API keys is a fatal startup error (§6).
    pub fn load() -> Result<Self> {
        // Best-effort `.env` loading; absence is not an error.
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(env) = std::env::var("ENV") {
            config.environment = env;
        }
        if let Ok(host) = std::env::var("HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }

        config.providers.deepgram_api_key = std::env::var("DEEPGRAM_API_KEY").unwrap_or_default();
        config.providers.sarvam_api_key = std::env::var("SARVAM_API_KEY").unwrap_or_default();
        config.providers.openai_api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();

        apply_env_u64("TURN_INTERIM_SPEECH_WAIT_MS", &mut config.turn.interim_speech_wait_ms);
        apply_env_u64("TURN_COMPLETION_WAIT_MS", &mut config.turn.completion_wait_ms);
        apply_env_usize("TURN_SHORT_SPEECH_THRESHOLD", &mut config.turn.short_speech_threshold);
        apply_env_usize(
            "TURN_MIN_AUDIO_BYTES_FOR_COMPLETION",
            &mut config.turn.min_audio_bytes_for_completion,
        );

        apply_env_u64("STT_CONNECT_TIMEOUT_MS", &mut config.timeouts.stt_connect_ms);
        apply_env_u64("LLM_REQUEST_TIMEOUT_MS", &mut config.timeouts.llm_request_ms);
        apply_env_u64("TTS_WARMUP_TIMEOUT_MS", &mut config.timeouts.tts_warmup_ms);
        apply_env_u64("TTS_HTTP_TIMEOUT_MS", &mut config.timeouts.tts_http_ms);
        apply_env_u64("TERMINATION_ACK_TIMEOUT_MS", &mut config.timeouts.termination_ack_ms);
        apply_env_u64("TERMINATION_FORCE_TIMEOUT_MS", &mut config.timeouts.termination_force_ms);

        apply_env_usize("CALL_LOG_BATCH_SIZE", &mut config.call_log.batch_size);
        apply_env_u64("CALL_LOG_FLUSH_INTERVAL_MS", &mut config.call_log.flush_interval_ms);
        if let Ok(path) = std::env::var("CALL_LOG_DB_PATH") {
            config.call_log.db_path = path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Missing any of the three API keys MUST cause startup failure (§6).
    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.providers.deepgram_api_key.is_empty() {
            missing.push("DEEPGRAM_API_KEY");
        }
        if self.providers.sarvam_api_key.is_empty() {
            missing.push("SARVAM_API_KEY");
        }
        if self.providers.openai_api_key.is_empty() {
            missing.push("OPENAI_API_KEY");
        }
        if !missing.is_empty() {
            bail!("missing required environment variable(s): {}", missing.join(", "));
        }
        Ok(())
    }
}

fn apply_env_u64(key: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(v) = raw.parse() {
            *slot = v;
        }
    }
}

fn apply_env_usize(key: &str, slot: &mut usize) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(v) = raw.parse() {
            *slot = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let thresholds = TurnThresholds::default();
        assert_eq!(thresholds.short_speech_threshold, 20);
        assert_eq!(thresholds.min_audio_bytes_for_completion, 50_000);
        assert_eq!(thresholds.interim_speech_wait_ms, 500);
        assert_eq!(thresholds.completion_wait_ms, 1_000);
    }

    #[test]
    fn validate_rejects_missing_keys() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn environment_defaults_to_development() {
        let config = Config::default();
        assert_eq!(config.environment, "development");
        assert!(!config.is_production());
    }

    #[test]
    fn validate_accepts_all_keys_present() {
        let mut config = Config::default();
        config.providers.deepgram_api_key = "dg".to_string();
        config.providers.sarvam_api_key = "sv".to_string();
        config.providers.openai_api_key = "oa".to_string();
        assert!(config.validate().is_ok());
    }
}
