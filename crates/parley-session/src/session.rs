//! Per-peer session state.

use chrono::{DateTime, Utc};
use parley_media::{MediaBridge, RtpSender};
use parley_pipeline::Orchestrator;
use parley_types::PipelineConfig;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Everything one connected peer owns: its negotiated transport, at
/// most one producer and one consumer, the conversation orchestrator,
/// and the media bridge feeding it.
///
/// Destroyed on `stop-voice-session` or when the signaling connection
/// drops, whichever comes first.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub transport_id: String,
    pub producer_id: Option<String>,
    pub consumer_id: Option<String>,
    pub orchestrator: Arc<Orchestrator>,
    pub bridge: MediaBridge,
    /// Return-path packetizer, populated once the peer consumes. Shared
    /// with the event forwarder, which drains synthesized audio into it.
    pub rtp_sender: Arc<Mutex<Option<RtpSender>>>,
    /// Task forwarding orchestrator events to the signaling channel.
    pub forwarder: JoinHandle<()>,
}

impl Session {
    /// Uptime helper used in teardown logs.
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}
