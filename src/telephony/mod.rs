//! TelephonyAdapter (§4.1)
//!
//! Parses PBX-side WebSocket frames and emits outbound `media`/`stop`
//! frames with the correct `streamSid` envelope. Inbound audio is
//! normalized to 8 kHz mono 16-bit LE PCM before it reaches the rest of
//! the gateway.

pub mod envelope;
pub mod pcm;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Audio encoding the PBX declares for inbound media (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundEncoding {
    Linear16,
    Mulaw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(rename = "sampleRate", default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
}

/// A PBX inbound frame, tagged on `event`. Unknown events are captured
/// by the caller via the raw JSON before this parses — this enum only
/// covers the recognized taxonomy (§4.1, §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum InboundEvent {
    Connected,
    Start {
        #[serde(rename = "streamSid", alias = "streamId", default)]
        stream_sid: Option<String>,
        #[serde(rename = "accountSid", default)]
        account_sid: Option<String>,
        #[serde(rename = "callSid", default)]
        call_sid: Option<String>,
        #[serde(rename = "mediaFormat", default)]
        media_format: Option<MediaFormat>,
        #[serde(rename = "extraData", default)]
        extra_data: Option<String>,
        #[serde(default)]
        czdata: Option<String>,
    },
    Answer,
    Media {
        media: MediaPayload,
    },
    Dtmf {
        #[serde(default)]
        digit: Option<String>,
    },
    Mark,
    Clear,
    Stop,
    #[serde(rename = "transfer-call")]
    TransferCall,
    #[serde(rename = "hangup-call")]
    HangupCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default)]
    pub chunk_durn_ms: Option<u32>,
}

/// Resolved `start` metadata after side-channel normalization, ready
/// for `CallSession` construction.
#[derive(Debug, Clone, Default)]
pub struct StartInfo {
    pub stream_sid: String,
    pub account_sid: Option<String>,
    pub call_sid: Option<String>,
    pub sample_rate: u32,
    pub encoding: InboundEncoding,
    pub extra_data: Option<Value>,
    pub czdata: Option<Value>,
}

impl Default for InboundEncoding {
    fn default() -> Self {
        InboundEncoding::Linear16
    }
}

/// Stateless frame parser/emitter. Holds no per-call state; the
/// CallSession owns `streamSid`/sequence counters.
#[derive(Debug, Default)]
pub struct TelephonyAdapter {
    dropped_frames: u64,
    outbound_sequence: u64,
}

impl TelephonyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Parse a raw inbound text frame. Unknown events are logged and
    /// ignored (§4.1); this never returns a fatal error.
    pub fn parse_inbound(&mut self, raw: &str) -> Option<InboundEvent> {
        match serde_json::from_str::<InboundEvent>(raw) {
            Ok(event) => Some(event),
            Err(_) => {
                // Could be a recognized `event` value we don't model, or
                // genuinely malformed JSON. Either way: log and ignore.
                if let Ok(value) = serde_json::from_str::<Value>(raw) {
                    debug!(event = ?value.get("event"), "unrecognized PBX event, ignoring");
                } else {
                    self.dropped_frames += 1;
                    warn!("malformed PBX frame, dropped");
                }
                None
            }
        }
    }

    /// Resolve a `start` frame into `StartInfo`, applying sample-rate
    /// normalization metadata and side-channel decoding.
    pub fn resolve_start(
        &self,
        stream_sid: Option<String>,
        account_sid: Option<String>,
        call_sid: Option<String>,
        media_format: Option<MediaFormat>,
        extra_data: Option<String>,
        czdata: Option<String>,
    ) -> Result<StartInfo, GatewayError> {
        let stream_sid = stream_sid.ok_or_else(|| {
            GatewayError::protocol("start frame missing streamSid/streamId")
        })?;

        let sample_rate = media_format.as_ref().and_then(|f| f.sample_rate).unwrap_or(8_000);
        let encoding = match media_format.as_ref().and_then(|f| f.encoding.as_deref()) {
            Some(enc) if enc.eq_ignore_ascii_case("mulaw") || enc.eq_ignore_ascii_case("pcmu") => {
                InboundEncoding::Mulaw
            }
            _ => InboundEncoding::Linear16,
        };

        let extra_data = extra_data.and_then(|b64| envelope::parse_extra_data(&b64));
        let czdata = czdata.and_then(|b64| envelope::parse_czdata(&b64));

        Ok(StartInfo { stream_sid, account_sid, call_sid, sample_rate, encoding, extra_data, czdata })
    }

    /// Normalize one inbound media payload to 8 kHz mono 16-bit LE PCM.
    /// Malformed base64 increments the drop counter and returns `None`
    /// (§4.1: never fatal).
    pub fn decode_media(&mut self, media: &MediaPayload, info: &StartInfo) -> Option<Vec<u8>> {
        let raw = match STANDARD.decode(&media.payload) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.dropped_frames += 1;
                warn!("malformed media payload, dropped");
                return None;
            }
        };

        if raw.is_empty() {
            self.dropped_frames += 1;
            return None;
        }

        let linear = match info.encoding {
            InboundEncoding::Mulaw => pcm::mulaw_to_linear16(&raw),
            InboundEncoding::Linear16 => raw,
        };

        Some(pcm::resample(&linear, info.sample_rate, 8_000))
    }

    /// Build the outbound `media` frame envelope for one PCM chunk.
    pub fn outbound_media(&self, stream_sid: &str, pcm_8khz_16bit: &[u8]) -> OutboundFrame {
        OutboundFrame::Media {
            event: "media",
            stream_sid: stream_sid.to_string(),
            media: OutboundMediaPayload { payload: STANDARD.encode(pcm_8khz_16bit) },
        }
    }

    /// Build the orchestrator-initiated termination frame (§4.1).
    pub fn outbound_stop(
        &mut self,
        stream_sid: &str,
        account_sid: Option<&str>,
        call_sid: Option<&str>,
    ) -> OutboundFrame {
        self.outbound_sequence += 1;
        OutboundFrame::Stop {
            event: "stop",
            sequence_number: self.outbound_sequence,
            stop: StopDetail {
                account_sid: account_sid.map(str::to_string),
                call_sid: call_sid.map(str::to_string),
            },
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Media {
        event: &'static str,
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMediaPayload,
    },
    Stop {
        event: &'static str,
        #[serde(rename = "sequenceNumber")]
        sequence_number: u64,
        stop: StopDetail,
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMediaPayload {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopDetail {
    #[serde(rename = "accountSid")]
    pub account_sid: Option<String>,
    #[serde(rename = "callSid")]
    pub call_sid: Option<String>,
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_frame_with_stream_sid_alias() {
        let mut adapter = TelephonyAdapter::new();
        let raw = r#"{"event":"start","streamId":"S1","accountSid":"A1"}"#;
        let event = adapter.parse_inbound(raw).unwrap();
        match event {
            InboundEvent::Start { stream_sid, account_sid, .. } => {
                assert_eq!(stream_sid, Some("S1".to_string()));
                assert_eq!(account_sid, Some("A1".to_string()));
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn unknown_event_is_ignored_not_fatal() {
        let mut adapter = TelephonyAdapter::new();
        let raw = r#"{"event":"some-future-event","foo":"bar"}"#;
        assert!(adapter.parse_inbound(raw).is_none());
        assert_eq!(adapter.dropped_frames(), 0);
    }

    #[test]
    fn malformed_json_increments_drop_counter() {
        let mut adapter = TelephonyAdapter::new();
        assert!(adapter.parse_inbound("{not json").is_none());
        assert_eq!(adapter.dropped_frames(), 1);
    }

    #[test]
    fn decode_media_normalizes_mulaw() {
        let mut adapter = TelephonyAdapter::new();
        let info = StartInfo {
            stream_sid: "S1".into(),
            account_sid: None,
            call_sid: None,
            sample_rate: 8_000,
            encoding: InboundEncoding::Mulaw,
            extra_data: None,
            czdata: None,
        };
        let payload = MediaPayload { payload: STANDARD.encode([0xFF, 0x00]), chunk_durn_ms: None };
        let out = adapter.decode_media(&payload, &info).unwrap();
        assert_eq!(out.len(), 4); // 2 mulaw bytes -> 2 16-bit samples
    }

    #[test]
    fn decode_media_drops_bad_base64() {
        let mut adapter = TelephonyAdapter::new();
        let info = StartInfo::default();
        let payload = MediaPayload { payload: "!!!not-base64".to_string(), chunk_durn_ms: None };
        assert!(adapter.decode_media(&payload, &info).is_none());
        assert_eq!(adapter.dropped_frames(), 1);
    }

    #[test]
    fn outbound_media_envelope_round_trips_payload() {
        let adapter = TelephonyAdapter::new();
        let frame = adapter.outbound_media("S1", &[1, 2, 3, 4]);
        let json = frame.to_json();
        assert!(json.contains("\"event\":\"media\""));
        assert!(json.contains("\"streamSid\":\"S1\""));
    }

    #[test]
    fn outbound_stop_increments_sequence() {
        let mut adapter = TelephonyAdapter::new();
        let first = adapter.outbound_stop("S1", Some("A1"), Some("C1"));
        let second = adapter.outbound_stop("S1", Some("A1"), Some("C1"));
        assert!(first.to_json().contains("\"sequenceNumber\":1"));
        assert!(second.to_json().contains("\"sequenceNumber\":2"));
    }
}
