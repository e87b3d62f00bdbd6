//! The SFU router boundary.
//!
//! The Selective Forwarding Unit is an external collaborator: Parley
//! allocates transports, producers, and consumers from it and taps raw
//! RTP packets through a plain (non-encrypted, non-ICE) transport, but
//! never looks inside its negotiation payloads. Those stay opaque
//! [`serde_json::Value`]s end to end.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("transport provisioning failed: {0}")]
    TransportFailed(String),

    #[error("unknown {kind}: {id}")]
    NotFound { kind: &'static str, id: String },
}

/// Negotiation handles for a newly created WebRTC transport.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Handles for a consumer bound to a producer.
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub id: String,
    pub kind: String,
    pub rtp_parameters: Value,
}

/// A plain-transport tap on a producer's raw RTP packets.
///
/// This is the point at which inbound packets become available to the
/// media bridge's conversion chain. Both handles must be closed on
/// teardown.
#[derive(Debug)]
pub struct PlainTap {
    pub transport_id: String,
    pub consumer_id: String,
    pub packets: mpsc::Receiver<Vec<u8>>,
}

/// Operations Parley requires of an SFU router.
///
/// Transports, producers, and consumers created through this interface
/// are exclusively owned by one session; only capability queries are
/// shared. Implementations must be cheap to call from async context.
pub trait SfuRouter: Send + Sync {
    /// Read-only codec/header-extension capabilities for negotiation.
    fn rtp_capabilities(&self) -> Value;

    /// Allocates a WebRTC (ICE/DTLS) transport for one peer.
    fn create_webrtc_transport(&self) -> Result<TransportInfo, RouterError>;

    /// Completes the DTLS handshake for a transport.
    fn connect_transport(&self, transport_id: &str, dtls_parameters: Value)
        -> Result<(), RouterError>;

    /// Registers an inbound media producer on a transport. Returns the
    /// producer id.
    fn produce(&self, transport_id: &str, rtp_parameters: Value) -> Result<String, RouterError>;

    /// Provisions a dedicated plain transport and consumer that tap a
    /// producer's raw RTP packets.
    fn create_plain_tap(&self, producer_id: &str) -> Result<PlainTap, RouterError>;

    /// Creates a consumer through which the peer receives audio.
    fn consume(&self, producer_id: &str, rtp_capabilities: Value)
        -> Result<ConsumerInfo, RouterError>;

    /// Resumes a paused consumer.
    fn resume_consumer(&self, consumer_id: &str) -> Result<(), RouterError>;

    /// Returns the packet sink feeding a consumer's peer.
    fn consumer_sink(&self, consumer_id: &str) -> Result<mpsc::Sender<Vec<u8>>, RouterError>;

    /// Closes a transport. Unknown ids are a no-op.
    fn close_transport(&self, transport_id: &str);

    /// Closes a consumer. Unknown ids are a no-op.
    fn close_consumer(&self, consumer_id: &str);
}
