use crate::router::RouterError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("malformed RTP packet: {0}")]
    InvalidPacket(String),

    #[error("audio processor already active for producer {0}")]
    ProcessorActive(String),
}
