use parley_media::{MediaError, RouterError};
use parley_pipeline::PipelineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport provisioning failed: {0}")]
    Transport(#[from] RouterError),

    #[error("no active voice session for this connection")]
    NoSession,

    #[error("no {0} has been created for this session")]
    NotReady(&'static str),

    #[error("session already has an active producer")]
    ProducerActive,

    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("media setup failed: {0}")]
    Media(#[from] MediaError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_errors_convert_to_transport() {
        let err = SessionError::from(RouterError::TransportFailed("no ports".into()));
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(err.to_string().contains("no ports"));
    }
}
