//! TurnController (§4.8) — the heart of the gateway.
//!
//! A pure state machine: it consumes one `TurnEvent` at a time and
//! returns the `TurnAction`(s) the session should carry out. Workers
//! (LLM request, TTS synth) run as spawned tasks outside this module;
//! their results re-enter as events. Freshness is enforced only at the
//! point actions reference a `turnId`, per §4.8's ordering guarantee —
//! this struct does not itself reach into I/O.

use crate::config::TurnThresholds;
use crate::types::TurnState;

/// Inputs the TurnController reacts to.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// `start` frame with the agent already resolved.
    CallStart,
    SttInterim { text: String },
    SttFinal { text: String },
    /// Endpointing fired with a buffered partial that never promoted to final.
    UtteranceEnd { buffered: Option<String> },
    PlayCompleted { turn_id: u64 },
    LlmResult { turn_id: u64, text: Option<String> },
    DisconnectIntent { turn_id: u64, disconnect: bool },
    Terminate,
}

/// Outputs the session executes. A single event may produce zero, one,
/// or a short sequence of actions (e.g. cancel-then-listen).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    PlayGreeting { turn_id: u64 },
    CancelPlayback,
    ArmInterimWaitTimer,
    ArmCompletionWaitTimer,
    StartLlm { turn_id: u64, user_text: String },
    Speak { turn_id: u64, text: String },
    SpeakGoodbye { turn_id: u64 },
    EmitStop,
    Noop,
}

/// Current byte-count signal the controller needs to evaluate the
/// near-completion gate; owned by the caller's AudioPacer bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackProgress {
    pub bytes_sent: usize,
}

pub struct TurnController {
    state: TurnState,
    turn_id: u64,
    thresholds: TurnThresholds,
}

impl TurnController {
    pub fn new(thresholds: TurnThresholds) -> Self {
        Self { state: TurnState::Idle, turn_id: 0, thresholds }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn turn_id(&self) -> u64 {
        self.turn_id
    }

    fn next_turn_id(&mut self) -> u64 {
        self.turn_id += 1;
        self.turn_id
    }

    /// Whether an outbound result for `turn_id` is still current
    /// (§4.8 Ordering guarantee, §3 Invariant 2).
    pub fn is_fresh(&self, turn_id: u64) -> bool {
        turn_id == self.turn_id
    }

    /// Evaluate an interim transcript against the smart-interruption
    /// policy (§4.8 Speaking-state rows).
    fn should_interrupt_on_interim(&self, text: &str, progress: PlaybackProgress) -> bool {
        let short = text.chars().count() < self.thresholds.short_speech_threshold;
        let near_completion = progress.bytes_sent >= self.thresholds.min_audio_bytes_for_completion;
        !(short && near_completion)
    }

    pub fn handle(&mut self, event: TurnEvent, progress: PlaybackProgress) -> Vec<TurnAction> {
        match (self.state, event) {
            (TurnState::Idle, TurnEvent::CallStart) => {
                let turn_id = self.next_turn_id();
                self.state = TurnState::Speaking;
                vec![TurnAction::PlayGreeting { turn_id }]
            }

            (TurnState::Speaking, TurnEvent::SttInterim { text }) => {
                if self.should_interrupt_on_interim(&text, progress) {
                    self.state = TurnState::Listening;
                    vec![TurnAction::CancelPlayback]
                } else {
                    vec![TurnAction::ArmInterimWaitTimer]
                }
            }

            (TurnState::Speaking, TurnEvent::PlayCompleted { turn_id }) => {
                if self.is_fresh(turn_id) {
                    self.state = TurnState::Listening;
                }
                vec![TurnAction::Noop]
            }

            (TurnState::Listening, TurnEvent::SttFinal { text }) => {
                let turn_id = self.next_turn_id();
                self.state = TurnState::Thinking;
                vec![TurnAction::StartLlm { turn_id, user_text: text }]
            }

            (TurnState::Listening, TurnEvent::UtteranceEnd { buffered: Some(text) }) => {
                let turn_id = self.next_turn_id();
                self.state = TurnState::Thinking;
                vec![TurnAction::StartLlm { turn_id, user_text: text }]
            }

            (TurnState::Listening, TurnEvent::UtteranceEnd { buffered: None }) => {
                vec![TurnAction::Noop]
            }

            (TurnState::Thinking, TurnEvent::LlmResult { turn_id, text }) => {
                if !self.is_fresh(turn_id) {
                    return vec![TurnAction::Noop];
                }
                match text {
                    Some(t) if !t.is_empty() => {
                        self.state = TurnState::Speaking;
                        vec![TurnAction::Speak { turn_id, text: t }]
                    }
                    _ => {
                        self.state = TurnState::Listening;
                        vec![TurnAction::Noop]
                    }
                }
            }

            (TurnState::Thinking, TurnEvent::DisconnectIntent { turn_id, disconnect: true }) => {
                if !self.is_fresh(turn_id) {
                    return vec![TurnAction::Noop];
                }
                self.state = TurnState::Ending;
                vec![TurnAction::SpeakGoodbye { turn_id }]
            }

            (TurnState::Thinking, TurnEvent::DisconnectIntent { disconnect: false, .. }) => {
                vec![TurnAction::Noop]
            }

            (TurnState::Ending, TurnEvent::PlayCompleted { turn_id }) => {
                if self.is_fresh(turn_id) {
                    vec![TurnAction::EmitStop]
                } else {
                    vec![TurnAction::Noop]
                }
            }

            (_, TurnEvent::Terminate) => {
                self.state = TurnState::Ending;
                vec![TurnAction::CancelPlayback, TurnAction::EmitStop]
            }

            // Any state receiving an event not named in §4.8's table for
            // it is a no-op; STT interims outside Speaking, stray
            // PlayCompleted, etc.
            _ => vec![TurnAction::Noop],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> TurnController {
        TurnController::new(TurnThresholds::default())
    }

    #[test]
    fn start_frame_plays_greeting_and_enters_speaking() {
        let mut ctl = controller();
        let actions = ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        assert_eq!(actions, vec![TurnAction::PlayGreeting { turn_id: 1 }]);
        assert_eq!(ctl.state(), TurnState::Speaking);
    }

    #[test]
    fn long_interim_cancels_playback_boundary_at_threshold() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        let actions = ctl.handle(
            TurnEvent::SttInterim { text: "a".repeat(20) },
            PlaybackProgress { bytes_sent: 0 },
        );
        assert_eq!(actions, vec![TurnAction::CancelPlayback]);
        assert_eq!(ctl.state(), TurnState::Listening);
    }

    #[test]
    fn short_interim_near_completion_is_ignored() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        let actions = ctl.handle(
            TurnEvent::SttInterim { text: "ok".to_string() },
            PlaybackProgress { bytes_sent: 55_000 },
        );
        assert_eq!(actions, vec![TurnAction::ArmInterimWaitTimer]);
        assert_eq!(ctl.state(), TurnState::Speaking);
    }

    #[test]
    fn short_interim_not_near_completion_cancels() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        let actions = ctl.handle(
            TurnEvent::SttInterim { text: "stop".to_string() },
            PlaybackProgress { bytes_sent: 32_000 },
        );
        assert_eq!(actions, vec![TurnAction::CancelPlayback]);
        assert_eq!(ctl.state(), TurnState::Listening);
    }

    #[test]
    fn final_transcript_starts_llm_with_incremented_turn() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        ctl.handle(TurnEvent::PlayCompleted { turn_id: 1 }, PlaybackProgress::default());
        let actions = ctl.handle(TurnEvent::SttFinal { text: "hours?".to_string() }, PlaybackProgress::default());
        assert_eq!(actions, vec![TurnAction::StartLlm { turn_id: 2, user_text: "hours?".to_string() }]);
        assert_eq!(ctl.state(), TurnState::Thinking);
    }

    #[test]
    fn empty_llm_result_leaves_state_listening_and_no_speak() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        ctl.handle(TurnEvent::PlayCompleted { turn_id: 1 }, PlaybackProgress::default());
        ctl.handle(TurnEvent::SttFinal { text: "hi".to_string() }, PlaybackProgress::default());
        let actions = ctl.handle(TurnEvent::LlmResult { turn_id: 2, text: None }, PlaybackProgress::default());
        assert_eq!(actions, vec![TurnAction::Noop]);
        assert_eq!(ctl.state(), TurnState::Listening);
    }

    #[test]
    fn stale_llm_result_is_dropped() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        ctl.handle(TurnEvent::PlayCompleted { turn_id: 1 }, PlaybackProgress::default());
        ctl.handle(TurnEvent::SttFinal { text: "first".to_string() }, PlaybackProgress::default());
        // A second final arrives before the first LLM call returns.
        ctl.handle(TurnEvent::SttFinal { text: "second".to_string() }, PlaybackProgress::default());
        let actions = ctl.handle(TurnEvent::LlmResult { turn_id: 2, text: Some("stale reply".to_string()) }, PlaybackProgress::default());
        assert_eq!(actions, vec![TurnAction::Noop]);
    }

    #[test]
    fn terminate_from_any_state_emits_stop() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        let actions = ctl.handle(TurnEvent::Terminate, PlaybackProgress::default());
        assert_eq!(actions, vec![TurnAction::CancelPlayback, TurnAction::EmitStop]);
        assert_eq!(ctl.state(), TurnState::Ending);
    }

    #[test]
    fn disconnect_intent_moves_to_ending_with_goodbye() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        ctl.handle(TurnEvent::PlayCompleted { turn_id: 1 }, PlaybackProgress::default());
        ctl.handle(TurnEvent::SttFinal { text: "bye".to_string() }, PlaybackProgress::default());
        let actions = ctl.handle(TurnEvent::DisconnectIntent { turn_id: 2, disconnect: true }, PlaybackProgress::default());
        assert_eq!(actions, vec![TurnAction::SpeakGoodbye { turn_id: 2 }]);
        assert_eq!(ctl.state(), TurnState::Ending);
    }

    #[test]
    fn goodbye_completion_emits_stop() {
        let mut ctl = controller();
        ctl.handle(TurnEvent::CallStart, PlaybackProgress::default());
        ctl.handle(TurnEvent::PlayCompleted { turn_id: 1 }, PlaybackProgress::default());
        ctl.handle(TurnEvent::SttFinal { text: "bye".to_string() }, PlaybackProgress::default());
        ctl.handle(TurnEvent::DisconnectIntent { turn_id: 2, disconnect: true }, PlaybackProgress::default());
        let actions = ctl.handle(TurnEvent::PlayCompleted { turn_id: 2 }, PlaybackProgress::default());
        assert_eq!(actions, vec![TurnAction::EmitStop]);
    }
}
