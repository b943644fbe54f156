//! Per-call telephony WebSocket handler (§4.1, §9 "Callback/event
//! chains"): merges PBX frames, STT events, and worker completions
//! into one `TurnEvent` stream driving the `TurnController`, and
//! executes the `TurnAction`s it returns.
//!
//! Grounded on the teacher's `realtime_voice.rs` connection-handling
//! shape (split socket, tagged client/server messages, one task per
//! connection) generalized from a chat session to a telephony media
//! session, and on `stt/mod.rs`'s provider-socket-owning client for
//! fanning STT events into the call's event stream.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ServerState;
use crate::call_log::{CallLogStore, CallLogger, CallMetadata, FinalizedCallLog};
use crate::error::GatewayError;
use crate::llm::{DisconnectIntent, HttpLlmClient, LLMClient};
use crate::pacer::{AudioPacer, BytesSentCounter, ChannelFrameSink, InterruptHandle};
use crate::session::{CallSession, SharedSession};
use crate::stt::{STTClient, SttEvent, StreamingSttClient};
use crate::telephony::{InboundEvent, StartInfo, TelephonyAdapter};
use crate::tts::{SarvamTtsClient, TTSClient};
use crate::turn::{PlaybackProgress, TurnAction, TurnController, TurnEvent};
use crate::types::{AgentConfig, Direction, Role, SpeakerType, TranscriptEntry, TranscriptSource};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut adapter = TelephonyAdapter::new();

    let start_info = match await_start_frame(&mut ws_rx, &mut adapter).await {
        Some(info) => info,
        None => return,
    };

    let agent = state.agent_directory.resolve(start_info.account_sid.as_deref(), None).await;
    let call_id = Uuid::new_v4().to_string();
    let stream_sid = start_info.stream_sid.clone();

    info!(call_id = %call_id, stream_sid = %stream_sid, "call started");

    let mut session = CallSession::new(call_id.clone(), stream_sid.clone(), Direction::Inbound, agent.clone());
    session.account_sid = start_info.account_sid.clone();
    if state.config.turn.answer_implied_by_start {
        session.mark_answered();
    }

    let mut call_logger = match CallLogger::open(
        SharedLogStore(state.call_log.clone()),
        CallMetadata {
            call_id: call_id.clone(),
            stream_id: stream_sid.clone(),
            account_sid: session.account_sid.clone(),
            caller_number: session.caller_number.clone(),
            called_number: session.called_number.clone(),
            started_at: session.started_at,
        },
        state.config.call_log.batch_size,
    )
    .await
    {
        Ok(logger) => logger,
        Err(err) => {
            error!(error = %err, "failed to open call log, dropping connection");
            return;
        }
    };
    session.call_log_id = Some(call_logger.call_log_id().to_string());

    let terminate_notify = session.terminate.clone();
    let shared = state.supervisor.register(session).await;

    // Outbound frame fan-in: both the pacer and the action executor
    // write frame JSON here; one task owns the socket's write half.
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(256);
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });
    let sink = ChannelFrameSink(frame_tx);

    // STT: one task owns the provider socket, accepting PCM on
    // `pcm_tx` and forwarding decoded events on `stt_event_rx`.
    let (pcm_tx, pcm_rx) = mpsc::channel::<Vec<u8>>(256);
    let (stt_event_tx, mut stt_event_rx) = mpsc::channel::<SttEvent>(256);
    let stt_task = tokio::spawn(run_stt_task(
        StreamingSttClient::new(
            "wss://api.deepgram.com/v1/listen",
            state.config.providers.deepgram_api_key.clone(),
            agent.default_language.clone(),
            state.config.timeouts.clone(),
        ),
        pcm_rx,
        stt_event_tx,
    ));

    let llm_client: Arc<dyn LLMClient> = Arc::new(HttpLlmClient::new(
        state.http_client.clone(),
        "https://api.openai.com/v1",
        state.config.providers.openai_api_key.clone(),
        "gpt-4o-mini",
        state.config.timeouts.llm_request_ms,
    ));
    let tts_client: Arc<dyn TTSClient> = Arc::new(SarvamTtsClient::new(
        state.http_client.clone(),
        "wss://api.sarvam.ai/text-to-speech/ws",
        "https://api.sarvam.ai/text-to-speech",
        state.config.providers.sarvam_api_key.clone(),
        state.config.timeouts.tts_warmup_ms,
        state.config.timeouts.tts_http_ms,
    ));

    let mut controller = TurnController::new(state.config.turn.clone());
    let bytes_sent = BytesSentCounter::new();
    let mut interrupt = InterruptHandle::new();
    let (event_tx, mut event_rx) = mpsc::channel::<TurnEvent>(256);
    let (log_tx, mut log_rx) = mpsc::channel::<TranscriptEntry>(256);

    let ctx = ActionContext {
        agent: agent.clone(),
        shared: shared.clone(),
        sink: sink.clone(),
        llm_client: llm_client.clone(),
        tts_client: tts_client.clone(),
        event_tx: event_tx.clone(),
        log_tx,
    };

    let termination_force = Duration::from_millis(state.config.timeouts.termination_force_ms);
    let mut batch_timer = tokio::time::interval(Duration::from_millis(state.config.call_log.flush_interval_ms));
    batch_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    batch_timer.tick().await; // first tick fires immediately; consume it

    let mut stop_emitted =
        run_actions(controller.handle(TurnEvent::CallStart, PlaybackProgress::default()), &ctx, &mut interrupt, &bytes_sent).await;

    while !stop_emitted {
        let progress = PlaybackProgress { bytes_sent: bytes_sent.get() };

        tokio::select! {
            biased;

            _ = terminate_notify.notified() => {
                let actions = controller.handle(TurnEvent::Terminate, progress);
                stop_emitted = run_actions(actions, &ctx, &mut interrupt, &bytes_sent).await;
            }

            // Safety net for the `Ending`/goodbye row's "on completion or
            // timeout, emit PBX stop" (§4.1): PlayCompleted normally
            // drives this, this just bounds the worst case.
            _ = tokio::time::sleep(termination_force), if controller.state() == crate::types::TurnState::Ending => {
                warn!("ending sequence timed out, forcing stop");
                stop_emitted = execute_action(TurnAction::EmitStop, &ctx, &mut interrupt, &bytes_sent).await;
            }

            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };
                let Message::Text(text) = msg else { continue };
                let Some(event) = adapter.parse_inbound(&text) else { continue };
                match event {
                    InboundEvent::Media { media } => {
                        if let Some(pcm) = adapter.decode_media(&media, &start_info) {
                            let _ = pcm_tx.send(pcm).await;
                        }
                    }
                    InboundEvent::Stop | InboundEvent::HangupCall => {
                        let actions = controller.handle(TurnEvent::Terminate, progress);
                        stop_emitted = run_actions(actions, &ctx, &mut interrupt, &bytes_sent).await;
                    }
                    _ => {}
                }
            }

            Some(stt_event) = stt_event_rx.recv() => {
                let turn_event = match stt_event {
                    SttEvent::Interim { text } => TurnEvent::SttInterim { text },
                    SttEvent::Final { text, .. } => TurnEvent::SttFinal { text },
                    SttEvent::UtteranceEnd => TurnEvent::UtteranceEnd { buffered: None },
                };
                let actions = controller.handle(turn_event, progress);
                stop_emitted = run_actions(actions, &ctx, &mut interrupt, &bytes_sent).await;
            }

            Some(event) = event_rx.recv() => {
                let actions = controller.handle(event, progress);
                stop_emitted = run_actions(actions, &ctx, &mut interrupt, &bytes_sent).await;
            }

            Some(entry) = log_rx.recv() => {
                if let Err(err) = call_logger.append(entry).await {
                    warn!(error = %err, "failed to append transcript entry");
                }
            }

            // 3-second batch flush timer (§4.7): flushes whatever is
            // pending even if the N=5 threshold was never reached.
            _ = batch_timer.tick() => {
                if let Err(err) = call_logger.flush().await {
                    warn!(error = %err, "failed to flush transcript batch on timer");
                }
            }
        }
    }

    stt_task.abort();
    sender_task.abort();
    state.supervisor.remove(&stream_sid).await;

    let lead_status = shared.lock().await.lead_status;
    if let Err(err) = call_logger.finalize(lead_status).await {
        error!(error = %err, "failed to finalize call log");
    }
    info!(call_id = %call_id, stream_sid = %stream_sid, "call ended");
}

/// Drains `Connected`/unrecognized frames until `start` arrives, or the
/// socket closes first.
async fn await_start_frame(ws_rx: &mut SplitStream<WebSocket>, adapter: &mut TelephonyAdapter) -> Option<StartInfo> {
    loop {
        let msg = ws_rx.next().await?.ok()?;
        let Message::Text(text) = msg else { continue };
        let event = adapter.parse_inbound(&text)?;
        if let InboundEvent::Start { stream_sid, account_sid, call_sid, media_format, extra_data, czdata } = event {
            return match adapter.resolve_start(stream_sid, account_sid, call_sid, media_format, extra_data, czdata) {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!(error = %err, "malformed start frame, dropping connection");
                    None
                }
            };
        }
        debug!("ignoring frame received before start");
    }
}

async fn run_stt_task(mut client: StreamingSttClient, mut pcm_rx: mpsc::Receiver<Vec<u8>>, event_tx: mpsc::Sender<SttEvent>) {
    loop {
        tokio::select! {
            pcm = pcm_rx.recv() => {
                match pcm {
                    Some(pcm) => client.send_audio(&pcm).await,
                    None => break,
                }
            }
            event = client.next_event() => {
                match event {
                    Some(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        if client.degraded() {
                            warn!("stt client degraded, stopping forwarding");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Bundles everything an action executor needs so the dispatcher
/// doesn't grow an ever-longer parameter list.
#[derive(Clone)]
struct ActionContext {
    agent: AgentConfig,
    shared: SharedSession,
    sink: ChannelFrameSink,
    llm_client: Arc<dyn LLMClient>,
    tts_client: Arc<dyn TTSClient>,
    event_tx: mpsc::Sender<TurnEvent>,
    log_tx: mpsc::Sender<TranscriptEntry>,
}

/// Runs every action in order; returns whether `EmitStop` fired so the
/// caller knows the PBX `stop` frame has gone out and the connection
/// can be torn down.
async fn run_actions(actions: Vec<TurnAction>, ctx: &ActionContext, interrupt: &mut InterruptHandle, bytes_sent: &BytesSentCounter) -> bool {
    let mut stop_emitted = false;
    for action in actions {
        if execute_action(action, ctx, interrupt, bytes_sent).await {
            stop_emitted = true;
        }
    }
    stop_emitted
}

async fn execute_action(action: TurnAction, ctx: &ActionContext, interrupt: &mut InterruptHandle, bytes_sent: &BytesSentCounter) -> bool {
    match action {
        TurnAction::PlayGreeting { turn_id } => {
            let text = ctx.agent.first_message.clone();
            speak(turn_id, text, ctx, interrupt, bytes_sent).await;
        }
        TurnAction::CancelPlayback => {
            interrupt.trigger();
            *interrupt = InterruptHandle::new();
        }
        TurnAction::ArmInterimWaitTimer | TurnAction::ArmCompletionWaitTimer => {
            // Advisory only: the next SttInterim/SttFinal naturally
            // supersedes whatever the timer would have done.
        }
        TurnAction::StartLlm { turn_id, user_text } => {
            let language = {
                let mut guard = ctx.shared.lock().await;
                guard.push_history(Role::User, user_text.clone());
                guard.language.clone()
            };
            let _ = ctx
                .log_tx
                .send(TranscriptEntry {
                    speaker: SpeakerType::User,
                    text: user_text.clone(),
                    language,
                    timestamp: chrono::Utc::now(),
                    source: TranscriptSource::Stt,
                })
                .await;
            spawn_llm_turn(turn_id, user_text, ctx.clone());
        }
        TurnAction::Speak { turn_id, text } => {
            speak(turn_id, text, ctx, interrupt, bytes_sent).await;
        }
        TurnAction::SpeakGoodbye { turn_id } => {
            speak(turn_id, "Thanks for calling, goodbye!".to_string(), ctx, interrupt, bytes_sent).await;
        }
        TurnAction::EmitStop => {
            let guard = ctx.shared.lock().await;
            let local_adapter = TelephonyAdapter::new();
            let frame = local_adapter.outbound_stop(&guard.stream_id, guard.account_sid.as_deref(), None);
            let _ = ctx.sink.send_frame(frame.to_json()).await;
            return true;
        }
        TurnAction::Noop => {}
    }
    false
}

fn spawn_llm_turn(turn_id: u64, user_text: String, ctx: ActionContext) {
    tokio::spawn(async move {
        let (history, language) = {
            let guard = ctx.shared.lock().await;
            (guard.history.clone(), guard.language.clone())
        };

        // Classify and send disconnect intent *before* the chat-completion
        // result: the controller only acts on `DisconnectIntent` while
        // still in `Thinking` (§4.4, §4.8), and `LlmResult` moves it out
        // of `Thinking` as soon as it's processed.
        let intent = ctx.llm_client.classify_disconnect_intent(&user_text).await;
        let _ = ctx
            .event_tx
            .send(TurnEvent::DisconnectIntent { turn_id, disconnect: intent == DisconnectIntent::Disconnect })
            .await;

        let reply = ctx.llm_client.complete(&history, &ctx.agent.system_prompt, &user_text, &language).await;
        let text = match reply {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "llm request failed, skipping turn");
                None
            }
        };
        let _ = ctx.event_tx.send(TurnEvent::LlmResult { turn_id, text }).await;
    });
}

async fn speak(turn_id: u64, text: String, ctx: &ActionContext, interrupt: &mut InterruptHandle, bytes_sent: &BytesSentCounter) {
    if text.trim().is_empty() {
        let _ = ctx.event_tx.send(TurnEvent::PlayCompleted { turn_id }).await;
        return;
    }

    let my_interrupt = InterruptHandle::new();
    *interrupt = my_interrupt.clone();
    bytes_sent.reset();

    let (stream_id, language) = {
        let mut guard = ctx.shared.lock().await;
        guard.push_history(Role::Assistant, text.clone());
        (guard.stream_id.clone(), guard.language.clone())
    };

    let _ = ctx
        .log_tx
        .send(TranscriptEntry {
            speaker: SpeakerType::Assistant,
            text: text.clone(),
            language: language.clone(),
            timestamp: chrono::Utc::now(),
            source: TranscriptSource::Tts,
        })
        .await;

    let tts_client = ctx.tts_client.clone();
    let sink = ctx.sink.clone();
    let bytes_sent = bytes_sent.clone();
    let event_tx = ctx.event_tx.clone();

    tokio::spawn(async move {
        let pcm = match tts_client.synthesize(&text, &language).await {
            Ok(pcm) => pcm,
            Err(err) => {
                warn!(error = %err, "tts synthesis failed");
                let _ = event_tx.send(TurnEvent::PlayCompleted { turn_id }).await;
                return;
            }
        };

        let adapter = TelephonyAdapter::new();
        let pacer = AudioPacer::new(stream_id);
        let _ = pacer.play(&pcm, turn_id, &sink, &my_interrupt, &bytes_sent, &adapter).await;
        let _ = event_tx.send(TurnEvent::PlayCompleted { turn_id }).await;
    });
}

/// Adapts `Arc<dyn CallLogStore>` into a concrete owned value so
/// `CallLogger<S>` doesn't need to be generic over a trait object.
struct SharedLogStore(Arc<dyn CallLogStore>);

#[async_trait::async_trait]
impl CallLogStore for SharedLogStore {
    async fn insert(&self, metadata: &CallMetadata) -> Result<String, GatewayError> {
        self.0.insert(metadata).await
    }

    async fn append_batch(&self, call_log_id: &str, entries: &[TranscriptEntry]) -> Result<(), GatewayError> {
        self.0.append_batch(call_log_id, entries).await
    }

    async fn finalize(&self, call_log_id: &str, finalized: &FinalizedCallLog) -> Result<(), GatewayError> {
        self.0.finalize(call_log_id, finalized).await
    }
}
