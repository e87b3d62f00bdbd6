//! Provider construction from server-side settings.
//!
//! A session names its providers by string (`"whisper"`, `"openai"`,
//! `"piper"`, ...); the paths, keys, and fallback policy that turn those
//! names into live services come from the server's configuration and
//! are held here.

use crate::error::SessionError;
use parley_pipeline::{CompletionService, SttService, SynthesisService};
use parley_types::{LlmConfig, SttConfig, TranscriptFragment, TtsConfig};
use std::path::PathBuf;
use tracing::warn;

/// Mock synthesis shape: 25 chunks of 1920 bytes is roughly half a
/// second of 48 kHz mono s16le.
const MOCK_TTS_CHUNKS: usize = 25;
const MOCK_TTS_CHUNK_BYTES: usize = 1920;

/// Server-side credentials and binary locations for the pipeline
/// providers, plus the policy for sessions that ask for a provider the
/// server cannot satisfy.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub whisper_binary: Option<PathBuf>,
    pub whisper_model: Option<PathBuf>,
    pub piper_binary: Option<PathBuf>,
    pub piper_voices_dir: Option<PathBuf>,
    /// When `true`, a session asking for an unconfigured provider gets
    /// the mock implementation instead of an error.
    pub allow_mock_fallback: bool,
    /// Treat inbound RTP payloads as raw s16le instead of Opus. Used
    /// with the loopback router, where no encoder exists on the far
    /// side.
    pub pcm_passthrough: bool,
    /// Fragments the mock transcription engine replays, one per audio
    /// chunk.
    pub mock_stt_script: Vec<TranscriptFragment>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            whisper_binary: None,
            whisper_model: None,
            piper_binary: None,
            piper_voices_dir: None,
            allow_mock_fallback: true,
            pcm_passthrough: false,
            mock_stt_script: Vec::new(),
        }
    }
}

impl ProviderSettings {
    pub fn build_stt(&self, config: &SttConfig) -> Result<SttService, SessionError> {
        match config.provider.as_str() {
            "whisper" => match (&self.whisper_binary, &self.whisper_model) {
                (Some(binary), Some(model)) => Ok(SttService::whisper(binary, model)),
                _ => self.fallback("whisper", || {
                    SttService::mock(self.mock_stt_script.clone())
                }),
            },
            "mock" => Ok(SttService::mock(self.mock_stt_script.clone())),
            other => Err(SessionError::Config(format!(
                "unknown STT provider: {}",
                other
            ))),
        }
    }

    pub fn build_llm(&self, config: &LlmConfig) -> Result<CompletionService, SessionError> {
        match config.provider.as_str() {
            "openai" => match &self.openai_api_key {
                Some(key) => Ok(CompletionService::openai(&self.openai_base_url, key)),
                None => self.fallback("openai", CompletionService::mock),
            },
            "mock" => Ok(CompletionService::mock()),
            other => Err(SessionError::Config(format!(
                "unknown completion provider: {}",
                other
            ))),
        }
    }

    pub fn build_tts(&self, config: &TtsConfig) -> Result<SynthesisService, SessionError> {
        match config.provider.as_str() {
            "piper" => match (&self.piper_binary, &self.piper_voices_dir) {
                (Some(binary), Some(voices)) => Ok(SynthesisService::piper(binary, voices)),
                _ => self.fallback("piper", || {
                    SynthesisService::mock(MOCK_TTS_CHUNKS, MOCK_TTS_CHUNK_BYTES)
                }),
            },
            "espeak" => Ok(SynthesisService::espeak()),
            "mock" => Ok(SynthesisService::mock(MOCK_TTS_CHUNKS, MOCK_TTS_CHUNK_BYTES)),
            other => Err(SessionError::Config(format!(
                "unknown TTS provider: {}",
                other
            ))),
        }
    }

    fn fallback<T>(&self, provider: &str, mock: impl FnOnce() -> T) -> Result<T, SessionError> {
        if self.allow_mock_fallback {
            warn!(provider = %provider, "provider not configured, substituting mock");
            Ok(mock())
        } else {
            Err(SessionError::Config(format!(
                "provider {} requested but not configured",
                provider
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_openai_falls_back_when_permitted() {
        let settings = ProviderSettings::default();
        let config = LlmConfig {
            provider: "openai".to_string(),
            ..LlmConfig::default()
        };
        assert!(settings.build_llm(&config).is_ok());

        let strict = ProviderSettings {
            allow_mock_fallback: false,
            ..ProviderSettings::default()
        };
        assert!(matches!(
            strict.build_llm(&config),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn unknown_provider_names_are_rejected() {
        let settings = ProviderSettings::default();
        let config = SttConfig {
            provider: "deepgram".to_string(),
            ..SttConfig::default()
        };
        assert!(matches!(
            settings.build_stt(&config),
            Err(SessionError::Config(_))
        ));
    }
}
