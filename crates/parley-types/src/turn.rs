//! Conversation turn records and stage latency accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The three external-service stages of the voice pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Speech-to-text transcription.
    Stt,
    /// Language-model completion.
    Llm,
    /// Text-to-speech synthesis.
    Tts,
}

impl Stage {
    /// Returns the wire label for this stage (`"stt"`, `"llm"`, `"tts"`).
    pub fn label(self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Llm => "llm",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Measured wall-clock duration of each pipeline stage for one turn,
/// in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageLatencies {
    /// Time from first audio of the utterance to the final transcript.
    pub stt_ms: u64,
    /// Time spent waiting on the completion service.
    pub llm_ms: u64,
    /// Time from synthesis request to first synthesized byte.
    pub tts_ms: u64,
    /// End-to-end time for the whole turn.
    pub total_ms: u64,
}

/// One completed user-utterance / assistant-response exchange.
///
/// Turns are immutable once created and are only ever appended to the
/// orchestrator's history. The most recent turns feed the rolling
/// context window for subsequent completion calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique identifier for this turn (UUID v4).
    pub id: Uuid,
    /// Wall-clock time at which the turn completed.
    pub timestamp: DateTime<Utc>,
    /// What the user said, as transcribed.
    pub user_text: String,
    /// What the assistant replied.
    pub assistant_text: String,
    /// Per-stage latencies measured for this turn.
    pub latencies: StageLatencies,
}

/// Mean stage latencies across all recorded turns.
///
/// Zero-valued when no turns have completed yet. Used for operational
/// visibility, never for control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageLatencies {
    pub stt_ms: f64,
    pub llm_ms: f64,
    pub tts_ms: f64,
    pub total_ms: f64,
    /// Number of turns the averages were computed over.
    pub turns: usize,
}

/// Role of one message in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the ordered context sent to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}
