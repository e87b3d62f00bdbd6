use parley_types::Stage;
use thiserror::Error;

/// Completion-service failures, kept distinct so callers can tell an
/// auth problem from a rate limit from a transport fault.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("provider error: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("completion error: {0}")]
    Llm(#[from] LlmError),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("session is already processing an audio stream")]
    AlreadyProcessing,
}

impl PipelineError {
    /// The pipeline stage this error belongs to, if it is stage-scoped.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stt(_) => Some(Stage::Stt),
            Self::Llm(_) => Some(Stage::Llm),
            Self::Tts(_) => Some(Stage::Tts),
            Self::AlreadyProcessing => None,
        }
    }
}
