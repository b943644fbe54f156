//! Cross-module integration tests.
//!
//! Unit tests inside each module already cover that module's own
//! behavior in isolation; these drive a handful of modules together the
//! way the telephony handler does, without needing a live WebSocket.

use callgateway::call_log::sqlite::SqliteCallLogStore;
use callgateway::call_log::{CallLogger, CallMetadata, InMemoryCallLogStore};
use callgateway::lang::LanguageDetector;
use callgateway::session::{AgentDirectory, CallSession, InMemoryAgentDirectory, Supervisor};
use callgateway::turn::{PlaybackProgress, TurnAction, TurnController, TurnEvent};
use callgateway::types::{AgentConfig, Direction, LeadStatus, Role, SpeakerType, TranscriptEntry, TranscriptSource};
use chrono::Utc;

fn transcript_entry(speaker: SpeakerType, text: &str, language: &str) -> TranscriptEntry {
    TranscriptEntry { speaker, text: text.to_string(), language: language.to_string(), timestamp: Utc::now(), source: TranscriptSource::Stt }
}

fn metadata(call_id: &str, stream_id: &str) -> CallMetadata {
    CallMetadata {
        call_id: call_id.to_string(),
        stream_id: stream_id.to_string(),
        account_sid: None,
        caller_number: None,
        called_number: None,
        started_at: Utc::now(),
    }
}

/// S1 happy path: greeting, one user/assistant exchange, then a clean
/// disconnect, driven through `TurnController` while the transcript
/// lands in a `CallLogger` the way `call_ws.rs` feeds it.
#[tokio::test]
async fn happy_path_drives_turns_and_persists_transcript() {
    let mut controller = TurnController::new(Default::default());
    let mut logger = CallLogger::open(InMemoryCallLogStore::new(), metadata("C1", "S1"), 5).await.unwrap();

    let greeting = controller.handle(TurnEvent::CallStart, PlaybackProgress::default());
    assert_eq!(greeting, vec![TurnAction::PlayGreeting { turn_id: 1 }]);
    logger.append(transcript_entry(SpeakerType::Assistant, "Hello, thanks for calling.", "en")).await.unwrap();

    controller.handle(TurnEvent::PlayCompleted { turn_id: 1 }, PlaybackProgress::default());
    let started = controller.handle(TurnEvent::SttFinal { text: "what are your hours?".to_string() }, PlaybackProgress::default());
    assert_eq!(started, vec![TurnAction::StartLlm { turn_id: 2, user_text: "what are your hours?".to_string() }]);
    logger.append(transcript_entry(SpeakerType::User, "what are your hours?", "en")).await.unwrap();

    let speak = controller.handle(TurnEvent::LlmResult { turn_id: 2, text: Some("9 to 5.".to_string()) }, PlaybackProgress::default());
    assert_eq!(speak, vec![TurnAction::Speak { turn_id: 2, text: "9 to 5.".to_string() }]);
    logger.append(transcript_entry(SpeakerType::Assistant, "9 to 5.", "en")).await.unwrap();

    controller.handle(TurnEvent::PlayCompleted { turn_id: 2 }, PlaybackProgress::default());
    let terminate = controller.handle(TurnEvent::Terminate, PlaybackProgress::default());
    assert_eq!(terminate, vec![TurnAction::CancelPlayback, TurnAction::EmitStop]);

    let rendered = logger.render_transcript();
    assert!(rendered.contains("Hello, thanks for calling."));
    assert!(rendered.contains("what are your hours?"));
    assert!(rendered.contains("9 to 5."));
    // Chronological, not insertion-coincidental: the assistant line that
    // was appended first must still render first.
    assert!(rendered.find("Hello").unwrap() < rendered.find("9 to 5").unwrap());

    logger.finalize(LeadStatus::Maybe).await.unwrap();
}

/// The SQLite-backed store behind the same `CallLogger` API, against a
/// real on-disk file rather than the in-memory double.
#[tokio::test]
async fn happy_path_persists_through_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteCallLogStore::new(dir.path().join("calls.sqlite3")).await.unwrap();
    let mut logger = CallLogger::open(store, metadata("C2", "S2"), 2).await.unwrap();

    logger.append(transcript_entry(SpeakerType::Assistant, "Hello!", "en")).await.unwrap();
    logger.append(transcript_entry(SpeakerType::User, "Hi there", "en")).await.unwrap();
    logger.append(transcript_entry(SpeakerType::Assistant, "How can I help?", "en")).await.unwrap();

    logger.finalize(LeadStatus::Enrolled).await.unwrap();
}

/// S4 language switch: a mid-call Hindi utterance should flip the
/// session's working language, and that new language should be what
/// gets attached to the next transcript entry.
#[tokio::test]
async fn language_switch_updates_session_and_transcript_language() {
    let agent = AgentConfig::default_agent();
    let mut session = CallSession::new("C3", "S3", Direction::Inbound, agent);
    assert_eq!(session.language, "en");

    let detector = LanguageDetector::new();
    let utterance = "mujhe appointment book karna hai";
    session.language = detector.detect(utterance, &session.language);
    assert_eq!(session.language, "hi");

    session.push_history(Role::User, utterance);
    let entry = transcript_entry(SpeakerType::User, utterance, &session.language);
    assert_eq!(entry.language, "hi");
}

/// S6 external termination: the admin API (or shutdown drain) reaches a
/// live session purely through `Supervisor`, without the telephony
/// handler's own task being involved.
#[tokio::test]
async fn supervisor_terminate_wakes_the_registered_session() {
    let supervisor = Supervisor::new();
    let agent = AgentConfig::default_agent();
    let session = CallSession::new("C4", "S4", Direction::Inbound, agent);
    let shared = supervisor.register(session).await;

    assert!(supervisor.terminate("S4").await);
    assert!(!supervisor.terminate("unknown-stream").await);

    let notify = {
        let guard = shared.lock().await;
        assert!(guard.interrupt.is_set());
        guard.terminate.clone()
    };

    // `terminate` already called `notify_one`; the event loop's `notified()`
    // future must resolve without blocking.
    let woke = tokio::time::timeout(std::time::Duration::from_millis(50), notify.notified()).await;
    assert!(woke.is_ok());
}

/// The agent directory resolves per-account configs and falls back to
/// the default, the way the telephony handler looks up an agent before
/// constructing a `CallSession`.
#[tokio::test]
async fn agent_directory_drives_session_construction() {
    let directory = InMemoryAgentDirectory::new(AgentConfig::default_agent())
        .with_account("ACCT1", AgentConfig::inactive_stub("clinic-bot"));

    let resolved = directory.resolve(Some("ACCT1"), None).await;
    let session = CallSession::new("C5", "S5", Direction::Inbound, resolved);
    assert_eq!(session.agent.agent_id, "clinic-bot");
    assert!(!session.agent.active);

    let fallback = directory.resolve(Some("unknown-account"), None).await;
    assert_eq!(fallback.agent_id, "default");
    assert!(fallback.active);
}
