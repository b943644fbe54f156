//! AudioPacer (§4.6)
//!
//! Breaks synthesized PCM into wall-clock-paced frames and emits them
//! through the TelephonyAdapter. Exactly one playback is live per
//! session at a time (§3 Invariant 1): starting a new `play()` cancels
//! the previous one via a shared interrupt flag before any new frame
//! goes out.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::telephony::pcm::FRAME_BYTES_20MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
}

/// Shared handle a caller can flip to cancel an in-flight `play()`
/// (§4.6 Interruption: "a single `interrupt` flag per playback session").
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks outbound bytes sent for the current playback so the
/// TurnController can evaluate the "near completion" gate
/// (§4.8 `MIN_AUDIO_BYTES_FOR_COMPLETION`).
#[derive(Debug, Clone, Default)]
pub struct BytesSentCounter(Arc<AtomicUsize>);

impl BytesSentCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Zero the counter; called at the start of each new playback so
    /// `MIN_AUDIO_BYTES_FOR_COMPLETION` is judged against the bytes sent
    /// in the *current* playback, not the call's lifetime total.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::SeqCst);
    }
}

/// Sink the pacer writes frames to; decouples it from the concrete
/// WebSocket type so it can be driven by a channel in tests.
#[async_trait::async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame_json: String) -> bool;
}

#[derive(Clone)]
pub struct ChannelFrameSink(pub mpsc::Sender<String>);

#[async_trait::async_trait]
impl FrameSink for ChannelFrameSink {
    async fn send_frame(&self, frame_json: String) -> bool {
        self.0.send(frame_json).await.is_ok()
    }
}

/// Chunks PCM into 20ms frames and emits them at wall-clock pace
/// (§4.6). One pacer instance is created per `play()` call; the
/// previous call's `InterruptHandle` must be triggered by the owner
/// before constructing a new one.
pub struct AudioPacer {
    stream_sid: String,
    frame_bytes: usize,
}

impl AudioPacer {
    pub fn new(stream_sid: impl Into<String>) -> Self {
        Self { stream_sid: stream_sid.into(), frame_bytes: FRAME_BYTES_20MS }
    }

    /// `play(pcm, turnId) -> completed | interrupted`. The `turnId`
    /// parameter is accepted for call-site symmetry with the spec
    /// signature even though freshness is enforced by the caller at the
    /// emit boundary (§4.8 Ordering guarantee).
    pub async fn play(
        &self,
        pcm: &[u8],
        _turn_id: u64,
        sink: &dyn FrameSink,
        interrupt: &InterruptHandle,
        bytes_sent: &BytesSentCounter,
        adapter: &crate::telephony::TelephonyAdapter,
    ) -> PlaybackOutcome {
        let frame_duration = Duration::from_millis(20);

        for chunk in pcm.chunks(self.frame_bytes) {
            if interrupt.is_set() {
                debug!(stream_sid = %self.stream_sid, "playback interrupted");
                return PlaybackOutcome::Interrupted;
            }

            let frame = adapter.outbound_media(&self.stream_sid, chunk);
            if !sink.send_frame(frame.to_json()).await {
                return PlaybackOutcome::Interrupted;
            }
            bytes_sent.add(chunk.len());

            tokio::time::sleep(frame_duration).await;
        }

        if interrupt.is_set() {
            PlaybackOutcome::Interrupted
        } else {
            PlaybackOutcome::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn completes_when_not_interrupted() {
        let (tx, mut rx) = mpsc::channel(64);
        let sink = ChannelFrameSink(tx);
        let adapter = crate::telephony::TelephonyAdapter::new();
        let pacer = AudioPacer::new("S1");
        let interrupt = InterruptHandle::new();
        let bytes_sent = BytesSentCounter::new();

        let pcm = vec![0u8; FRAME_BYTES_20MS * 3];
        let outcome = pacer.play(&pcm, 1, &sink, &interrupt, &bytes_sent, &adapter).await;

        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(bytes_sent.get(), pcm.len());
        let mut frames = 0;
        while rx.try_recv().is_ok() {
            frames += 1;
        }
        assert_eq!(frames, 3);
    }

    #[tokio::test]
    async fn stops_immediately_when_sink_closed() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        let sink = ChannelFrameSink(tx);
        let adapter = crate::telephony::TelephonyAdapter::new();
        let pacer = AudioPacer::new("S1");
        let interrupt = InterruptHandle::new();
        let bytes_sent = BytesSentCounter::new();

        let pcm = vec![0u8; FRAME_BYTES_20MS * 5];
        let outcome = pacer.play(&pcm, 1, &sink, &interrupt, &bytes_sent, &adapter).await;

        assert_eq!(outcome, PlaybackOutcome::Interrupted);
    }

    #[tokio::test]
    async fn interrupt_flag_set_before_start_aborts_immediately() {
        let (tx, mut rx) = mpsc::channel(64);
        let sink = ChannelFrameSink(tx);
        let adapter = crate::telephony::TelephonyAdapter::new();
        let pacer = AudioPacer::new("S1");
        let interrupt = InterruptHandle::new();
        interrupt.trigger();
        let bytes_sent = BytesSentCounter::new();

        let pcm = vec![0u8; FRAME_BYTES_20MS * 3];
        let outcome = pacer.play(&pcm, 1, &sink, &interrupt, &bytes_sent, &adapter).await;

        assert_eq!(outcome, PlaybackOutcome::Interrupted);
        assert!(rx.try_recv().is_err());
    }
}
