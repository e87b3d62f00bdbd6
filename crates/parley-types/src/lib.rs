//! Shared types for the Parley voice pipeline.
//!
//! This crate provides the cross-cutting type definitions used by every
//! other Parley crate: the signaling protocol enums exchanged with
//! browser peers, the immutable per-session pipeline configuration, the
//! conversation turn records with their stage latencies, and the typed
//! events the orchestrator emits.
//!
//! No crate in the workspace depends on anything *except* `parley-types`
//! for cross-cutting definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

pub mod config;
pub mod event;
pub mod signal;
pub mod turn;

pub use config::{LlmConfig, ModeConfig, PipelineConfig, SttConfig, TtsConfig};
pub use event::{AudioStream, MediaEvent, PipelineEvent, TranscriptFragment};
pub use signal::{ClientMessage, ServerMessage};
pub use turn::{AverageLatencies, ChatMessage, ChatRole, ConversationTurn, Stage, StageLatencies};
