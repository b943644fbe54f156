//! STTClient (§4.2)
//!
//! Maintains a streaming WebSocket to the STT provider, forwards raw PCM
//! frames, and emits interim/final transcript events. Reconnects with
//! backoff on failure; a bounded queue absorbs audio arriving before the
//! upstream socket is open.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::error::GatewayError;

/// Bound on the pre-connect audio queue; overflow drops the oldest
/// frame (§4.2 Buffering).
const MAX_QUEUED_FRAMES: usize = 64;

/// Confidence floor below which a `final` is not forwarded (§4.2).
pub const FINAL_CONFIDENCE_FLOOR: f32 = 0.5;

#[derive(Debug, Clone)]
pub enum SttEvent {
    Interim { text: String },
    Final { text: String, confidence: f32 },
    UtteranceEnd,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderMessage {
    Interim { text: String },
    Final { text: String, #[serde(default = "default_confidence")] confidence: f32 },
    UtteranceEnd,
}

fn default_confidence() -> f32 {
    1.0
}

/// Port boundary so the TurnController can be unit-tested against a
/// mock without a live provider connection.
#[async_trait]
pub trait STTClient: Send + Sync {
    async fn send_audio(&mut self, pcm: &[u8]);
    async fn next_event(&mut self) -> Option<SttEvent>;
    fn degraded(&self) -> bool;
}

/// Streaming-WS client for an STT provider negotiated per §4.2/§6:
/// `sample_rate=8000, channels=1, encoding=linear16, interim_results=true,
/// smart_format=true, endpointing≈300ms`.
pub struct StreamingSttClient {
    url: String,
    api_key: String,
    language: String,
    timeouts: TimeoutConfig,
    socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pending: VecDeque<Vec<u8>>,
    reconnect_attempts: u32,
    degraded: bool,
}

impl StreamingSttClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, language: impl Into<String>, timeouts: TimeoutConfig) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            language: language.into(),
            timeouts,
            socket: None,
            pending: VecDeque::new(),
            reconnect_attempts: 0,
            degraded: false,
        }
    }

    fn request_url(&self) -> String {
        format!(
            "{}?sample_rate=8000&channels=1&encoding=linear16&interim_results=true&smart_format=true&endpointing=300&model=nova&language={}",
            self.url, self.language
        )
    }

    async fn connect(&mut self) -> Result<(), GatewayError> {
        let uri = self.request_url();
        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(&uri)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .body(())
            .map_err(|e| GatewayError::transient("stt", e))?;
        let connect_fut = connect_async(request);
        let connected = tokio::time::timeout(Duration::from_millis(self.timeouts.stt_connect_ms), connect_fut)
            .await
            .map_err(|_| GatewayError::transient("stt", anyhow::anyhow!("connect timeout")))?
            .map_err(|e| GatewayError::transient("stt", e))?;
        self.socket = Some(connected.0);
        self.reconnect_attempts = 0;
        self.degraded = false;
        info!("stt connected");
        self.drain_pending().await;
        Ok(())
    }

    /// Reconnect with exponential backoff, up to `stt_max_reconnects`
    /// attempts (§4.2 Reconnection). On exhaustion, flips `degraded`.
    async fn reconnect(&mut self) {
        while self.reconnect_attempts < self.timeouts.stt_max_reconnects {
            self.reconnect_attempts += 1;
            let backoff_ms = 200u64 * 2u64.pow(self.reconnect_attempts.saturating_sub(1));
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            if self.connect().await.is_ok() {
                return;
            }
            warn!(attempt = self.reconnect_attempts, "stt reconnect failed");
        }
        self.degraded = true;
    }

    async fn drain_pending(&mut self) {
        while let Some(frame) = self.pending.pop_front() {
            self.write_frame(&frame).await;
        }
    }

    async fn write_frame(&mut self, pcm: &[u8]) {
        if let Some(socket) = self.socket.as_mut() {
            if socket.send(Message::Binary(pcm.to_vec())).await.is_err() {
                self.socket = None;
            }
        }
    }
}

#[async_trait]
impl STTClient for StreamingSttClient {
    async fn send_audio(&mut self, pcm: &[u8]) {
        if self.socket.is_none() {
            if self.pending.len() >= MAX_QUEUED_FRAMES {
                self.pending.pop_front();
                debug!("stt pre-connect queue overflow, dropped oldest frame");
            }
            self.pending.push_back(pcm.to_vec());
            return;
        }
        self.write_frame(pcm).await;
    }

    async fn next_event(&mut self) -> Option<SttEvent> {
        loop {
            if self.socket.is_none() {
                if self.connect().await.is_err() {
                    self.reconnect().await;
                    if self.degraded {
                        return None;
                    }
                }
                continue;
            }

            let socket = self.socket.as_mut()?;
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(msg) = serde_json::from_str::<ProviderMessage>(&text) {
                        match msg {
                            ProviderMessage::Interim { text } => return Some(SttEvent::Interim { text }),
                            ProviderMessage::Final { text, confidence } => {
                                if confidence >= FINAL_CONFIDENCE_FLOOR {
                                    return Some(SttEvent::Final { text, confidence });
                                }
                                debug!(confidence, "final below confidence floor, dropped");
                            }
                            ProviderMessage::UtteranceEnd => return Some(SttEvent::UtteranceEnd),
                        }
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => {
                    self.socket = None;
                    self.reconnect().await;
                    if self.degraded {
                        return None;
                    }
                }
            }
        }
    }

    fn degraded(&self) -> bool {
        self.degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_below_confidence_floor_is_filtered_conceptually() {
        assert!(0.4 < FINAL_CONFIDENCE_FLOOR);
        assert!(0.5 >= FINAL_CONFIDENCE_FLOOR);
    }

    #[test]
    fn request_url_carries_negotiated_params() {
        let client = StreamingSttClient::new("wss://stt.example/v1", "key", "en", TimeoutConfig::default());
        let url = client.request_url();
        assert!(url.contains("sample_rate=8000"));
        assert!(url.contains("language=en"));
        assert!(url.contains("interim_results=true"));
    }
}
