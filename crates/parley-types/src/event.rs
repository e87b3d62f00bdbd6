//! Typed events flowing between pipeline components.
//!
//! The original design wired components together with ad-hoc callbacks;
//! here every producer/consumer edge is an explicit channel of one of
//! these types, so wiring and teardown order are type-checked.

use crate::turn::{AverageLatencies, ConversationTurn, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A readable stream of synthesized audio, delivered chunk by chunk so
/// playback can start before synthesis finishes.
pub type AudioStream = mpsc::Receiver<Vec<u8>>;

/// One incremental transcription result from the STT engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub text: String,
    /// `false` for interim hypotheses that may still be revised,
    /// `true` once the engine commits the text.
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn fin(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Voice-activity events produced by the media bridge's transform
/// chain and consumed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaEvent {
    /// One short-window RMS reading, in dBFS. Informational only.
    AudioLevel(f32),
    /// Speech stopped (held below threshold for the minimum duration).
    SilenceStart,
    /// Speech resumed.
    SilenceEnd,
}

/// Events emitted by the orchestrator over its session event channel.
///
/// The session manager forwards these to the signaling channel; tests
/// consume them directly.
#[derive(Debug)]
pub enum PipelineEvent {
    /// Inbound audio attached; the user has started speaking.
    UserSpeaking,
    /// A transcription fragment arrived (interim or final).
    Transcription {
        text: String,
        is_final: bool,
        timestamp: DateTime<Utc>,
    },
    /// The completion service produced the assistant's reply text.
    AiResponse {
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// Synthesized audio for the current turn is ready to stream.
    AudioReady { turn_id: uuid::Uuid, audio: AudioStream },
    /// A turn finished; the finalized record was appended to history.
    TurnComplete(ConversationTurn),
    /// Mean stage latencies after the most recent turn.
    Metrics(AverageLatencies),
    /// One pipeline stage failed for one turn. The session stays alive.
    StageError {
        stage: Stage,
        turn_id: uuid::Uuid,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_constructors_set_finality() {
        assert!(!TranscriptFragment::interim("hel").is_final);
        assert!(TranscriptFragment::fin("hello").is_final);
    }
}
