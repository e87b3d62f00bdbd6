//! Conversation orchestration for the Parley voice pipeline.
//!
//! Turns the continuous transcription stream into discrete text turns
//! and drives completion and synthesis. The orchestrator owns one
//! session's turn-taking state machine
//! (`Idle → Listening → Accumulating → Completing → Synthesizing`),
//! its append-only turn history, and its per-turn latency metrics.
//!
//! Nothing in this crate is WebRTC-specific: it consumes plain PCM
//! byte streams and voice-activity events, and produces text and audio
//! byte streams. The three external services are reached through the
//! provider services in [`stt`], [`llm`], and [`tts`].

pub mod error;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod stt;
pub mod tts;

pub use error::{LlmError, PipelineError};
pub use llm::{CompletionService, LlmFailure};
pub use metrics::{average_latencies, TurnMetrics};
pub use orchestrator::{build_context, Orchestrator};
pub use stt::{SttService, SttSession};
pub use tts::SynthesisService;
