//! TTSClient (§4.5)
//!
//! Streaming WS session preferred, HTTP one-shot fallback. Output is
//! always normalized to 8 kHz mono 16-bit LE PCM before reaching the
//! AudioPacer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::telephony::pcm;

#[derive(Debug, Clone)]
pub struct Voice {
    pub locale: &'static str,
    pub speaker: &'static str,
}

/// `language -> {locale, voice}` mapping (§4.5 Voice selection).
/// Unknown languages collapse to the default entry.
static VOICE_TABLE: Lazy<Vec<(&'static str, Voice)>> = Lazy::new(|| {
    vec![
        ("en", Voice { locale: "en-IN", speaker: "meera" }),
        ("hi", Voice { locale: "hi-IN", speaker: "arvind" }),
        ("ta", Voice { locale: "ta-IN", speaker: "kavya" }),
        ("te", Voice { locale: "te-IN", speaker: "anjali" }),
        ("bn", Voice { locale: "bn-IN", speaker: "bani" }),
        ("mr", Voice { locale: "mr-IN", speaker: "maya" }),
        ("gu", Voice { locale: "gu-IN", speaker: "nisha" }),
        ("kn", Voice { locale: "kn-IN", speaker: "pavan" }),
        ("ml", Voice { locale: "ml-IN", speaker: "ananya" }),
    ]
});

const DEFAULT_VOICE: &str = "en";

/// Look up the voice for `language`, falling back to the default
/// per-language voice when the language or requested speaker is
/// unrecognized.
pub fn voice_for(language: &str) -> Voice {
    VOICE_TABLE
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, voice)| voice.clone())
        .unwrap_or_else(|| {
            VOICE_TABLE
                .iter()
                .find(|(lang, _)| *lang == DEFAULT_VOICE)
                .map(|(_, voice)| voice.clone())
                .expect("default voice always present")
        })
}

#[async_trait]
pub trait TTSClient: Send + Sync {
    /// Synthesize `text` in `language`, returning 8 kHz mono 16-bit LE
    /// PCM ready for the AudioPacer.
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, GatewayError>;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderFrame {
    Audio { data: String },
    End,
}

/// Streaming-WS-preferred / HTTP-fallback TTS client (§4.5).
pub struct SarvamTtsClient {
    ws_url: String,
    http_url: String,
    api_key: String,
    http: reqwest::Client,
    warmup: Duration,
    http_timeout: Duration,
}

impl SarvamTtsClient {
    /// `http` is the process-wide shared client (§5 "External HTTP
    /// client is shared (connection pooling)"), not one constructed
    /// per-call.
    pub fn new(http: reqwest::Client, ws_url: impl Into<String>, http_url: impl Into<String>, api_key: impl Into<String>, warmup_ms: u64, http_timeout_ms: u64) -> Self {
        Self {
            ws_url: ws_url.into(),
            http_url: http_url.into(),
            api_key: api_key.into(),
            http,
            warmup: Duration::from_millis(warmup_ms),
            http_timeout: Duration::from_millis(http_timeout_ms),
        }
    }

    async fn synthesize_streaming(&self, text: &str, voice: &Voice) -> Result<Vec<u8>, GatewayError> {
        let uri = format!("{}?target_language_code={}", self.ws_url, voice.locale);
        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(&uri)
            .header("api-subscription-key", &self.api_key)
            .body(())
            .map_err(|e| GatewayError::transient("tts", e))?;
        let connect_fut = connect_async(request);
        let (mut socket, _) = tokio::time::timeout(self.warmup, connect_fut)
            .await
            .map_err(|_| GatewayError::transient("tts", anyhow::anyhow!("warm-up timeout")))?
            .map_err(|e| GatewayError::transient("tts", e))?;

        let config_frame = json!({
            "type": "config",
            "target_language_code": voice.locale,
            "speaker": voice.speaker,
            "pitch": 0,
            "pace": 1.0,
            "loudness": 1.0,
            "output_audio_codec": "linear16",
            "speech_sample_rate": 8000,
        });
        socket.send(Message::Text(config_frame.to_string())).await.map_err(|e| GatewayError::transient("tts", e))?;
        socket
            .send(Message::Text(json!({"type": "text", "text": text}).to_string()))
            .await
            .map_err(|e| GatewayError::transient("tts", e))?;
        socket
            .send(Message::Text(json!({"type": "flush"}).to_string()))
            .await
            .map_err(|e| GatewayError::transient("tts", e))?;

        let mut pcm_out = Vec::new();
        let mut last_len = 0usize;
        let mut stable_polls = 0u32;

        loop {
            let next = tokio::time::timeout(Duration::from_millis(50), socket.next()).await;
            match next {
                Ok(Some(Ok(Message::Text(text)))) => {
                    match serde_json::from_str::<ProviderFrame>(&text) {
                        Ok(ProviderFrame::Audio { data }) => {
                            if let Ok(bytes) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &data) {
                                pcm_out.extend_from_slice(&bytes);
                            }
                        }
                        Ok(ProviderFrame::End) => break,
                        Err(_) => {}
                    }
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => {
                    // No frame within 50ms: check byte-count stability
                    // as a secondary completion signal (§4.5).
                    if pcm_out.len() == last_len && !pcm_out.is_empty() {
                        stable_polls += 1;
                        if stable_polls >= 3 {
                            break;
                        }
                    } else {
                        stable_polls = 0;
                    }
                    last_len = pcm_out.len();
                }
            }
        }

        let _ = socket.close(None).await;
        Ok(pcm_out)
    }

    async fn synthesize_http(&self, text: &str, voice: &Voice) -> Result<Vec<u8>, GatewayError> {
        let body = json!({
            "target_language_code": voice.locale,
            "speaker": voice.speaker,
            "output_audio_codec": "linear16",
            "speech_sample_rate": 8000,
            "text": text,
        });

        let response = self
            .http
            .post(&self.http_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.http_timeout)
            .send()
            .await
            .map_err(|e| GatewayError::transient("tts", e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::upstream("tts", response.status().to_string()));
        }
        if !response.status().is_success() {
            return Err(GatewayError::upstream("tts", response.status().to_string()));
        }

        let bytes = response.bytes().await.map_err(|e| GatewayError::transient("tts", e))?;
        Ok(pcm::strip_wav_header(&bytes).to_vec())
    }
}

#[async_trait]
impl TTSClient for SarvamTtsClient {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, GatewayError> {
        let voice = voice_for(language);
        let started = Instant::now();

        match self.synthesize_streaming(text, &voice).await {
            Ok(pcm) if !pcm.is_empty() => Ok(pcm),
            Ok(_) => {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "streaming tts returned empty, falling back to http");
                self.synthesize_http(text, &voice).await
            }
            Err(err) => {
                warn!(error = %err, "streaming tts failed, falling back to http");
                self.synthesize_http(text, &voice).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_language_resolves_expected_voice() {
        let voice = voice_for("hi");
        assert_eq!(voice.locale, "hi-IN");
    }

    #[test]
    fn unknown_language_falls_back_to_default() {
        let voice = voice_for("zz");
        assert_eq!(voice.locale, voice_for("en").locale);
    }
}
