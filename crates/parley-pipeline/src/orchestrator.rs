//! The per-session conversation orchestrator.

use crate::error::PipelineError;
use crate::llm::CompletionService;
use crate::metrics::{average_latencies, TurnMetrics};
use crate::stt::{SttService, SttSession};
use crate::tts::SynthesisService;
use chrono::Utc;
use parley_types::config::CONTEXT_WINDOW_TURNS;
use parley_types::{
    AudioStream, AverageLatencies, ChatMessage, ConversationTurn, MediaEvent, PipelineConfig,
    PipelineEvent, Stage, TranscriptFragment,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bound on the wait for the first synthesized byte.
const FIRST_AUDIO_TIMEOUT: Duration = Duration::from_secs(60);

/// Turn-taking state within a running pipeline.
///
/// `Idle` is represented by the absence of a worker task; the variants
/// here cover a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Listening,
    Accumulating,
    Completing,
    Synthesizing,
}

/// Owns one session's turn-taking state machine, its append-only turn
/// history, and its per-turn latency metrics.
///
/// `start_processing` attaches an inbound PCM stream and voice-activity
/// events and spawns the session's pipeline worker; all external-service
/// calls happen inside that single worker task, so the state machine
/// rather than a lock guarantees at most one completion or synthesis call is
/// in flight per session.
pub struct Orchestrator {
    config: PipelineConfig,
    stt: SttService,
    llm: CompletionService,
    tts: SynthesisService,
    history: Arc<RwLock<Vec<ConversationTurn>>>,
    events: mpsc::Sender<PipelineEvent>,
    /// Bumped on every stop; in-flight turns tagged with an older value
    /// discard their results instead of resurrecting torn-down state.
    epoch: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        stt: SttService,
        llm: CompletionService,
        tts: SynthesisService,
        events: mpsc::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            config,
            stt,
            llm,
            tts,
            history: Arc::new(RwLock::new(Vec::new())),
            events,
            epoch: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Begins piping an inbound audio stream through the pipeline.
    ///
    /// Fails with [`PipelineError::AlreadyProcessing`] if this session
    /// already has a live stream.
    pub fn start_processing(
        &self,
        pcm_rx: mpsc::Receiver<Vec<u8>>,
        media_rx: mpsc::Receiver<MediaEvent>,
    ) -> Result<(), PipelineError> {
        let mut slot = self.worker.lock().expect("worker lock");
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(PipelineError::AlreadyProcessing);
        }

        let worker = Worker {
            config: self.config.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            history: self.history.clone(),
            events: self.events.clone(),
            live_epoch: self.epoch.clone(),
            epoch: self.epoch.load(Ordering::SeqCst),
            stt: self.stt.start(&self.config.stt),
            pcm_rx,
            media_rx,
            state: State::Listening,
            buffer: String::new(),
            interim: String::new(),
            metrics: None,
        };
        *slot = Some(tokio::spawn(worker.run()));
        info!("started audio processing");
        Ok(())
    }

    /// Detaches the transcription engine and clears in-flight state.
    /// Idempotent; a session that is not processing is a no-op.
    pub fn stop_processing(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let task = self.worker.lock().expect("worker lock").take();
        if let Some(task) = task {
            task.abort();
            info!("stopped audio processing");
        }
    }

    /// Whether a pipeline worker is currently attached.
    pub fn is_processing(&self) -> bool {
        self.worker
            .lock()
            .expect("worker lock")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Snapshot of the append-only turn history, oldest first.
    pub async fn conversation_history(&self) -> Vec<ConversationTurn> {
        self.history.read().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    /// Mean stage latencies across recorded turns; zero-valued when no
    /// turn has completed yet.
    pub async fn average_latencies(&self) -> AverageLatencies {
        average_latencies(&self.history.read().await)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Builds the ordered completion context: system prompt, then the most
/// recent [`CONTEXT_WINDOW_TURNS`] turns oldest first with alternating
/// user/assistant messages, then the new utterance.
pub fn build_context(
    system_prompt: &str,
    history: &[ConversationTurn],
    utterance: &str,
) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(CONTEXT_WINDOW_TURNS);
    let mut context = Vec::with_capacity(2 + 2 * (history.len() - start));
    context.push(ChatMessage::system(system_prompt));
    for turn in &history[start..] {
        context.push(ChatMessage::user(turn.user_text.as_str()));
        context.push(ChatMessage::assistant(turn.assistant_text.as_str()));
    }
    context.push(ChatMessage::user(utterance));
    context
}

enum Input {
    Pcm(Option<Vec<u8>>),
    Media(Option<MediaEvent>),
    Fragment(Option<TranscriptFragment>),
}

struct Worker {
    config: PipelineConfig,
    llm: CompletionService,
    tts: SynthesisService,
    history: Arc<RwLock<Vec<ConversationTurn>>>,
    events: mpsc::Sender<PipelineEvent>,
    live_epoch: Arc<AtomicU64>,
    epoch: u64,
    stt: SttSession,
    pcm_rx: mpsc::Receiver<Vec<u8>>,
    media_rx: mpsc::Receiver<MediaEvent>,
    state: State,
    /// Committed utterance text: concatenation of final fragments only.
    buffer: String,
    /// Latest interim hypothesis. Display-only; never sent to the LLM.
    interim: String,
    metrics: Option<TurnMetrics>,
}

impl Worker {
    async fn run(mut self) {
        let _ = self.events.send(PipelineEvent::UserSpeaking).await;
        loop {
            let input = tokio::select! {
                chunk = self.pcm_rx.recv() => Input::Pcm(chunk),
                event = self.media_rx.recv() => Input::Media(event),
                fragment = self.stt.fragments.recv() => Input::Fragment(fragment),
            };
            match input {
                Input::Pcm(Some(chunk)) => self.stt.write(chunk).await,
                Input::Media(Some(MediaEvent::AudioLevel(_))) => {}
                Input::Media(Some(MediaEvent::SilenceEnd)) => {
                    if self.state == State::Accumulating || self.state == State::Listening {
                        self.set_state(State::Listening);
                    }
                }
                Input::Media(Some(MediaEvent::SilenceStart)) => self.on_silence().await,
                Input::Fragment(Some(fragment)) => self.on_fragment(fragment).await,
                Input::Pcm(None) => {
                    debug!("inbound PCM stream detached, pipeline worker exiting");
                    break;
                }
                Input::Media(None) => {
                    debug!("media event stream closed, pipeline worker exiting");
                    break;
                }
                Input::Fragment(None) => {
                    debug!("transcription stream ended, pipeline worker exiting");
                    break;
                }
            }
        }
    }

    fn set_state(&mut self, next: State) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "pipeline state transition");
            self.state = next;
        }
    }

    /// End of speech: flush the transcription engine (batch engines
    /// transcribe the buffered utterance now) and try to complete with
    /// whatever final text has accumulated.
    async fn on_silence(&mut self) {
        self.stt.flush().await;
        if !self.buffer.trim().is_empty() {
            self.complete_turn().await;
        } else if !self.interim.is_empty() {
            debug!(interim = %self.interim, "silence with only interim text, waiting for final");
        }
    }

    async fn on_fragment(&mut self, fragment: TranscriptFragment) {
        let _ = self
            .events
            .send(PipelineEvent::Transcription {
                text: fragment.text.clone(),
                is_final: fragment.is_final,
                timestamp: Utc::now(),
            })
            .await;

        // Utterance clock starts at the first fragment, interim or not.
        if self.metrics.is_none() {
            self.metrics = Some(TurnMetrics::start());
        }

        if !fragment.is_final {
            self.interim = fragment.text;
            return;
        }

        let text = fragment.text.trim();
        if !text.is_empty() {
            if !self.buffer.is_empty() {
                self.buffer.push(' ');
            }
            self.buffer.push_str(text);
        }
        self.interim.clear();
        self.set_state(State::Accumulating);

        let buffered = self.buffer.trim().chars().count();
        let ready = if self.config.mode.streaming {
            buffered >= self.config.mode.completion_trigger_chars
        } else {
            true
        };
        if ready {
            self.complete_turn().await;
        }
    }

    /// Takes the buffered utterance through completion and synthesis.
    ///
    /// Sub-minimum utterances are discarded without any external call.
    /// A stage failure emits a stage-tagged error and returns the
    /// machine to `Listening` with no partial turn appended.
    async fn complete_turn(&mut self) {
        let utterance = std::mem::take(&mut self.buffer).trim().to_string();
        self.interim.clear();
        let metrics = self.metrics.take();

        if utterance.chars().count() < self.config.mode.min_utterance_chars {
            debug!(chars = utterance.chars().count(), "discarding sub-minimum utterance");
            self.set_state(State::Listening);
            return;
        }

        let mut metrics = metrics.unwrap_or_else(TurnMetrics::start);
        metrics.stt_done();
        let turn_id = uuid::Uuid::new_v4();
        self.set_state(State::Completing);

        let context = {
            let history = self.history.read().await;
            build_context(&self.config.llm.system_prompt, &history, &utterance)
        };

        metrics.llm_started();
        let reply = match self.llm.complete(&context, &self.config.llm).await {
            Ok(reply) => reply,
            Err(e) => {
                self.fail_stage(Stage::Llm, turn_id, e.to_string()).await;
                return;
            }
        };
        metrics.llm_done();
        let _ = self
            .events
            .send(PipelineEvent::AiResponse {
                text: reply.clone(),
                timestamp: Utc::now(),
            })
            .await;

        self.set_state(State::Synthesizing);
        metrics.tts_started();
        let stream = match self.tts.synthesize(&reply, &self.config.tts).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail_stage(Stage::Tts, turn_id, e.to_string()).await;
                return;
            }
        };
        let audio = match await_first_audio(stream).await {
            Some(audio) => audio,
            None => {
                self.fail_stage(Stage::Tts, turn_id, "synthesis produced no audio".to_string())
                    .await;
                return;
            }
        };
        metrics.tts_done();

        let turn = ConversationTurn {
            id: turn_id,
            timestamp: Utc::now(),
            user_text: utterance,
            assistant_text: reply,
            latencies: metrics.finalize(),
        };

        if self.live_epoch.load(Ordering::SeqCst) != self.epoch {
            debug!(turn_id = %turn_id, "session stopped mid-turn, discarding result");
            return;
        }

        let average = {
            let mut history = self.history.write().await;
            history.push(turn.clone());
            average_latencies(&history)
        };

        let _ = self
            .events
            .send(PipelineEvent::AudioReady { turn_id, audio })
            .await;
        let _ = self.events.send(PipelineEvent::TurnComplete(turn)).await;
        let _ = self.events.send(PipelineEvent::Metrics(average)).await;
        self.set_state(State::Listening);
    }

    async fn fail_stage(&mut self, stage: Stage, turn_id: uuid::Uuid, message: String) {
        warn!(%stage, turn_id = %turn_id, "pipeline stage failed: {}", message);
        let _ = self
            .events
            .send(PipelineEvent::StageError {
                stage,
                turn_id,
                message,
            })
            .await;
        self.set_state(State::Listening);
    }
}

/// Waits (bounded) for the first synthesized chunk, then hands back a
/// stream that replays it followed by the rest. Returns `None` if the
/// stream ends or times out before producing any audio.
async fn await_first_audio(mut stream: AudioStream) -> Option<AudioStream> {
    let first = tokio::time::timeout(FIRST_AUDIO_TIMEOUT, stream.recv())
        .await
        .ok()??;
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        if tx.send(first).await.is_err() {
            return;
        }
        while let Some(chunk) = stream.recv().await {
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
    });
    Some(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::StageLatencies;

    fn turn(user: &str, assistant: &str) -> ConversationTurn {
        ConversationTurn {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            user_text: user.to_string(),
            assistant_text: assistant.to_string(),
            latencies: StageLatencies::default(),
        }
    }

    #[test]
    fn context_orders_history_oldest_first() {
        let history = vec![turn("one", "1"), turn("two", "2")];
        let context = build_context("sys", &history, "three");
        let texts: Vec<&str> = context.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["sys", "one", "1", "two", "2", "three"]);
    }

    #[test]
    fn context_window_keeps_only_recent_turns() {
        let history: Vec<ConversationTurn> = (0..8)
            .map(|i| turn(&format!("u{}", i), &format!("a{}", i)))
            .collect();
        let context = build_context("sys", &history, "new");
        // system + 5 turns * 2 + utterance
        assert_eq!(context.len(), 12);
        assert_eq!(context[1].content, "u3");
        assert_eq!(context[10].content, "a7");
        assert_eq!(context[11].content, "new");
    }

    #[test]
    fn context_alternates_roles() {
        let history = vec![turn("q", "a")];
        let context = build_context("sys", &history, "next");
        use parley_types::ChatRole::*;
        let roles: Vec<_> = context.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![System, User, Assistant, User]);
    }
}
