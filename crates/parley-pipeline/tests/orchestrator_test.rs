//! End-to-end tests of the conversation orchestrator with scripted
//! providers: scripted STT fragments in, events out.

use parley_pipeline::{build_context, CompletionService, LlmFailure, Orchestrator, SttService, SynthesisService};
use parley_types::{
    MediaEvent, ModeConfig, PipelineConfig, PipelineEvent, Stage, TranscriptFragment,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const QUIET: Duration = Duration::from_millis(200);

struct Harness {
    orchestrator: Arc<Orchestrator>,
    pcm_tx: mpsc::Sender<Vec<u8>>,
    media_tx: mpsc::Sender<MediaEvent>,
    events: mpsc::Receiver<PipelineEvent>,
}

fn start(
    script: Vec<TranscriptFragment>,
    llm: CompletionService,
    tts: SynthesisService,
    mode: ModeConfig,
) -> Harness {
    let config = PipelineConfig {
        mode,
        ..PipelineConfig::default()
    };
    let (events_tx, events) = mpsc::channel(64);
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        SttService::mock(script),
        llm,
        tts,
        events_tx,
    ));
    let (pcm_tx, pcm_rx) = mpsc::channel(64);
    let (media_tx, media_rx) = mpsc::channel(64);
    orchestrator.start_processing(pcm_rx, media_rx).unwrap();
    Harness {
        orchestrator,
        pcm_tx,
        media_tx,
        events,
    }
}

impl Harness {
    /// One audio write advances the scripted STT by one fragment.
    async fn speak_chunk(&self) {
        self.pcm_tx.send(vec![0u8; 1920]).await.unwrap();
    }

    async fn silence(&self) {
        self.media_tx.send(MediaEvent::SilenceStart).await.unwrap();
    }

    async fn next_event(&mut self) -> PipelineEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for pipeline event")
            .expect("event channel closed")
    }

    /// Asserts that no further event arrives within a short quiet window.
    async fn assert_quiet(&mut self) {
        let outcome = tokio::time::timeout(QUIET, self.events.recv()).await;
        assert!(outcome.is_err(), "unexpected event: {:?}", outcome.unwrap());
    }
}

/// An interim "Hel", a final "Hello", then silence yields exactly one
/// completion with utterance "Hello", and interim text never reaches
/// the completion context.
#[tokio::test]
async fn single_utterance_completes_once_with_final_text_only() {
    let mut h = start(
        vec![
            TranscriptFragment::interim("Hel"),
            TranscriptFragment::fin("Hello"),
        ],
        CompletionService::mock(),
        SynthesisService::mock(2, 960),
        ModeConfig::default(),
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));

    h.speak_chunk().await; // -> interim "Hel"
    match h.next_event().await {
        PipelineEvent::Transcription { text, is_final, .. } => {
            assert_eq!(text, "Hel");
            assert!(!is_final);
        }
        other => panic!("expected interim transcription, got {:?}", other),
    }

    h.speak_chunk().await; // -> final "Hello"
    match h.next_event().await {
        PipelineEvent::Transcription { text, is_final, .. } => {
            assert_eq!(text, "Hello");
            assert!(is_final);
        }
        other => panic!("expected final transcription, got {:?}", other),
    }

    // The final fragment triggers the turn in batch mode.
    match h.next_event().await {
        PipelineEvent::AiResponse { text, .. } => assert_eq!(text, "You said: Hello"),
        other => panic!("expected ai response, got {:?}", other),
    }
    assert!(matches!(h.next_event().await, PipelineEvent::AudioReady { .. }));
    match h.next_event().await {
        PipelineEvent::TurnComplete(turn) => {
            assert_eq!(turn.user_text, "Hello");
            assert_eq!(turn.assistant_text, "You said: Hello");
        }
        other => panic!("expected turn complete, got {:?}", other),
    }
    assert!(matches!(h.next_event().await, PipelineEvent::Metrics(_)));

    // Trailing silence must not trigger a second completion.
    h.silence().await;
    h.assert_quiet().await;
    assert_eq!(h.orchestrator.conversation_history().await.len(), 1);
}

/// A rate-limited completion yields a stage-tagged error,
/// the machine returns to listening, and no turn is appended.
#[tokio::test]
async fn rate_limited_completion_emits_llm_stage_error_without_a_turn() {
    let mut h = start(
        vec![TranscriptFragment::fin("Tell me a joke")],
        CompletionService::mock_failing(LlmFailure::RateLimited),
        SynthesisService::mock(1, 960),
        ModeConfig::default(),
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));
    h.speak_chunk().await;
    assert!(matches!(
        h.next_event().await,
        PipelineEvent::Transcription { .. }
    ));

    match h.next_event().await {
        PipelineEvent::StageError { stage, message, .. } => {
            assert_eq!(stage, Stage::Llm);
            assert!(message.contains("rate limited"), "message: {}", message);
        }
        other => panic!("expected stage error, got {:?}", other),
    }

    assert!(h.orchestrator.conversation_history().await.is_empty());

    // The session survives the failed turn.
    h.assert_quiet().await;
    assert!(h.orchestrator.is_processing());
}

/// Synthesized audio is delivered exactly once per turn and
/// the average TTS latency reflects the recorded turn.
#[tokio::test]
async fn audio_ready_fires_once_and_updates_tts_average() {
    let mut h = start(
        vec![TranscriptFragment::fin("Read me a story")],
        CompletionService::mock(),
        SynthesisService::mock(4, 1920),
        ModeConfig::default(),
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));
    h.speak_chunk().await;
    assert!(matches!(
        h.next_event().await,
        PipelineEvent::Transcription { .. }
    ));
    assert!(matches!(h.next_event().await, PipelineEvent::AiResponse { .. }));

    let mut audio_ready = 0;
    let turn = loop {
        match h.next_event().await {
            PipelineEvent::AudioReady { mut audio, .. } => {
                audio_ready += 1;
                // Drain the stream: all four chunks arrive.
                let mut total = 0;
                while let Some(chunk) = audio.recv().await {
                    total += chunk.len();
                }
                assert_eq!(total, 4 * 1920);
            }
            PipelineEvent::TurnComplete(turn) => break turn,
            other => panic!("unexpected event: {:?}", other),
        }
    };
    assert_eq!(audio_ready, 1);

    assert!(matches!(h.next_event().await, PipelineEvent::Metrics(_)));
    h.assert_quiet().await;

    let avg = h.orchestrator.average_latencies().await;
    assert_eq!(avg.turns, 1);
    assert_eq!(avg.tts_ms, turn.latencies.tts_ms as f64);
}

/// After two completed turns, the context for the next
/// completion carries both turns, oldest first, alternating roles.
#[tokio::test]
async fn history_feeds_later_completions_in_order() {
    let mut h = start(
        vec![
            TranscriptFragment::fin("First question"),
            TranscriptFragment::fin("Second question"),
        ],
        CompletionService::mock(),
        SynthesisService::mock(1, 960),
        ModeConfig::default(),
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));

    for expected in ["First question", "Second question"] {
        h.speak_chunk().await;
        loop {
            if let PipelineEvent::TurnComplete(turn) = h.next_event().await {
                assert_eq!(turn.user_text, expected);
                break;
            }
        }
    }

    let history = h.orchestrator.conversation_history().await;
    assert_eq!(history.len(), 2);

    let context = build_context("sys", &history, "Third question");
    let texts: Vec<&str> = context.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "sys",
            "First question",
            "You said: First question",
            "Second question",
            "You said: Second question",
            "Third question",
        ]
    );
}

/// Utterances shorter than the minimum never reach the completion
/// service.
#[tokio::test]
async fn sub_minimum_utterance_is_discarded_silently() {
    let mut h = start(
        vec![TranscriptFragment::fin("Hi")],
        CompletionService::mock_failing(LlmFailure::Network), // must never be called
        SynthesisService::mock(1, 960),
        ModeConfig::default(),
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));
    h.speak_chunk().await;
    assert!(matches!(
        h.next_event().await,
        PipelineEvent::Transcription { .. }
    ));

    // No stage error means the failing completion service was never
    // invoked; no turn is appended either.
    h.silence().await;
    h.assert_quiet().await;
    assert!(h.orchestrator.conversation_history().await.is_empty());
}

/// Streaming mode: final fragments accumulate until the trigger length,
/// then complete as one concatenated utterance.
#[tokio::test]
async fn streaming_mode_concatenates_finals_until_trigger() {
    let mut h = start(
        vec![
            TranscriptFragment::fin("Hello"),
            TranscriptFragment::fin("world today"),
        ],
        CompletionService::mock(),
        SynthesisService::mock(1, 960),
        ModeConfig {
            streaming: true,
            completion_trigger_chars: 10,
            ..ModeConfig::default()
        },
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));

    h.speak_chunk().await; // "Hello" is below the trigger length
    assert!(matches!(
        h.next_event().await,
        PipelineEvent::Transcription { .. }
    ));
    h.assert_quiet().await;

    h.speak_chunk().await; // buffer reaches "Hello world today"
    assert!(matches!(
        h.next_event().await,
        PipelineEvent::Transcription { .. }
    ));
    match h.next_event().await {
        PipelineEvent::AiResponse { text, .. } => {
            assert_eq!(text, "You said: Hello world today");
        }
        other => panic!("expected ai response, got {:?}", other),
    }
}

/// Whitespace-only final fragments neither pad the utterance buffer nor
/// leave doubled separators between the real fragments around them.
#[tokio::test]
async fn blank_final_fragment_does_not_pad_the_utterance() {
    let mut h = start(
        vec![
            TranscriptFragment::fin("Hello"),
            TranscriptFragment::fin("   "),
            TranscriptFragment::fin("there"),
        ],
        CompletionService::mock(),
        SynthesisService::mock(1, 960),
        ModeConfig {
            streaming: true,
            completion_trigger_chars: 40,
            ..ModeConfig::default()
        },
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));
    for _ in 0..3 {
        h.speak_chunk().await;
        assert!(matches!(
            h.next_event().await,
            PipelineEvent::Transcription { .. }
        ));
    }

    // End of speech flushes the buffered finals as one utterance.
    h.silence().await;
    match h.next_event().await {
        PipelineEvent::AiResponse { text, .. } => {
            assert_eq!(text, "You said: Hello there");
        }
        other => panic!("expected ai response, got {:?}", other),
    }
}

/// A second start while processing is rejected; stop is idempotent and
/// clears the processing flag.
#[tokio::test]
async fn start_is_exclusive_and_stop_is_idempotent() {
    let h = start(
        Vec::new(),
        CompletionService::mock(),
        SynthesisService::mock(1, 960),
        ModeConfig::default(),
    );

    let (_tx2, rx2) = mpsc::channel(4);
    let (_mtx2, mrx2) = mpsc::channel(4);
    assert!(h.orchestrator.start_processing(rx2, mrx2).is_err());

    h.orchestrator.stop_processing();
    assert!(!h.orchestrator.is_processing());
    h.orchestrator.stop_processing(); // no-op
    assert!(!h.orchestrator.is_processing());
}

/// Clearing history resets the averages to zero.
#[tokio::test]
async fn clear_history_resets_averages() {
    let mut h = start(
        vec![TranscriptFragment::fin("What time is it")],
        CompletionService::mock(),
        SynthesisService::mock(1, 960),
        ModeConfig::default(),
    );

    assert!(matches!(h.next_event().await, PipelineEvent::UserSpeaking));
    h.speak_chunk().await;
    loop {
        if matches!(h.next_event().await, PipelineEvent::Metrics(_)) {
            break;
        }
    }
    assert_eq!(h.orchestrator.average_latencies().await.turns, 1);

    h.orchestrator.clear_history().await;
    assert_eq!(h.orchestrator.average_latencies().await.turns, 0);
    assert!(h.orchestrator.conversation_history().await.is_empty());
}
