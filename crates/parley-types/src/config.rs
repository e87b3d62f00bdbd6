//! Per-session pipeline configuration.
//!
//! A [`PipelineConfig`] is assembled once when a voice session starts and
//! is never mutated afterwards. Provider substitution (for example the
//! mock completion engine used when no API key is configured) is an
//! explicit per-session choice recorded here, never a process-wide flag.

use serde::{Deserialize, Serialize};

fn default_language() -> String {
    "en".to_string()
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u16 {
    1
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_system_prompt() -> String {
    "You are a helpful voice assistant. Keep replies short and conversational.".to_string()
}

fn default_min_utterance_chars() -> usize {
    3
}

fn default_completion_trigger_chars() -> usize {
    20
}

/// Transcription provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttConfig {
    /// Provider name: `"whisper"` or `"mock"`.
    pub provider: String,
    /// Model identifier, meaning is provider-specific.
    pub model: String,
    /// BCP-47 language tag for transcription.
    #[serde(default = "default_language")]
    pub language: String,
    /// PCM sample rate fed to the engine.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// PCM channel count fed to the engine.
    #[serde(default = "default_channels")]
    pub channels: u16,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "base".to_string(),
            language: default_language(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

/// Completion provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: `"openai"` or `"mock"`.
    pub provider: String,
    /// Model identifier sent to the provider.
    pub model: String,
    /// System prompt prepended to every completion request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated tokens per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Synthesis provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Provider name: `"piper"`, `"espeak"` or `"mock"`.
    pub provider: String,
    /// Voice identifier, meaning is provider-specific.
    pub voice: String,
    /// Model identifier, meaning is provider-specific.
    pub model: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            voice: "default".to_string(),
            model: "default".to_string(),
        }
    }
}

/// Pipeline turn-taking mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// When `true`, a completion is triggered as soon as the buffered
    /// final transcript reaches `completion_trigger_chars`. When `false`,
    /// the pipeline waits for the end-of-speech edge.
    #[serde(default)]
    pub streaming: bool,
    /// Utterances shorter than this (after trimming) are discarded
    /// without calling any external service.
    #[serde(default = "default_min_utterance_chars")]
    pub min_utterance_chars: usize,
    /// Buffered-text length that triggers a completion in streaming mode.
    #[serde(default = "default_completion_trigger_chars")]
    pub completion_trigger_chars: usize,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            min_utterance_chars: default_min_utterance_chars(),
            completion_trigger_chars: default_completion_trigger_chars(),
        }
    }
}

/// Immutable configuration for one voice session's pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub mode: ModeConfig,
}

/// Number of completed turns included as rolling context in each
/// completion request.
pub const CONTEXT_WINDOW_TURNS: usize = 5;
