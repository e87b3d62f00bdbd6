//! In-process SFU router.
//!
//! `LocalRouter` implements the [`SfuRouter`] boundary entirely in
//! memory: transports are bookkeeping entries and RTP moves over mpsc
//! channels instead of sockets. It backs the server's default
//! deployment and every integration test; a mediasoup- or ion-backed
//! router would implement the same trait against a real SFU.

use parley_media::{ConsumerInfo, PlainTap, RouterError, SfuRouter, TransportInfo};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-tap and per-consumer channel capacity. At 20 ms per packet this
/// buffers about five seconds of audio before backpressure.
const PACKET_CHANNEL_CAPACITY: usize = 256;

struct TransportEntry {
    connected: bool,
}

struct ProducerEntry {
    transport_id: String,
    /// Sender side of the plain-transport tap, once one exists.
    tap: Option<mpsc::Sender<Vec<u8>>>,
}

struct ConsumerEntry {
    producer_id: String,
    paused: bool,
    sink: mpsc::Sender<Vec<u8>>,
    /// Receiver half, held until the consuming side claims it.
    stream: Option<mpsc::Receiver<Vec<u8>>>,
}

#[derive(Default)]
struct RouterState {
    transports: HashMap<String, TransportEntry>,
    producers: HashMap<String, ProducerEntry>,
    consumers: HashMap<String, ConsumerEntry>,
}

/// An SFU router that never touches the network.
#[derive(Default)]
pub struct LocalRouter {
    state: Mutex<RouterState>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender through which a peer's inbound RTP reaches a producer's
    /// tap. `None` until [`SfuRouter::create_plain_tap`] has run for
    /// the producer.
    pub fn producer_feed(&self, producer_id: &str) -> Option<mpsc::Sender<Vec<u8>>> {
        self.state
            .lock()
            .expect("router state lock")
            .producers
            .get(producer_id)
            .and_then(|p| p.tap.clone())
    }

    /// Claims the receiving end of a consumer's packet stream. Each
    /// consumer's stream can be claimed once.
    pub fn take_consumer_stream(&self, consumer_id: &str) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.state
            .lock()
            .expect("router state lock")
            .consumers
            .get_mut(consumer_id)
            .and_then(|c| c.stream.take())
    }

    /// Whether a consumer exists and has been resumed.
    pub fn consumer_active(&self, consumer_id: &str) -> bool {
        self.state
            .lock()
            .expect("router state lock")
            .consumers
            .get(consumer_id)
            .is_some_and(|c| !c.paused)
    }
}

impl SfuRouter for LocalRouter {
    fn rtp_capabilities(&self) -> Value {
        json!({
            "codecs": [{
                "kind": "audio",
                "mimeType": "audio/opus",
                "clockRate": 48_000,
                "channels": 2,
                "preferredPayloadType": parley_media::OPUS_PAYLOAD_TYPE,
            }],
            "headerExtensions": [],
        })
    }

    fn create_webrtc_transport(&self) -> Result<TransportInfo, RouterError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.state
            .lock()
            .expect("router state lock")
            .transports
            .insert(id.clone(), TransportEntry { connected: false });
        debug!(transport_id = %id, "created webrtc transport");
        Ok(TransportInfo {
            id: id.clone(),
            ice_parameters: json!({"usernameFragment": id, "password": "local", "iceLite": true}),
            ice_candidates: json!([]),
            dtls_parameters: json!({"role": "auto", "fingerprints": []}),
        })
    }

    fn connect_transport(
        &self,
        transport_id: &str,
        _dtls_parameters: Value,
    ) -> Result<(), RouterError> {
        let mut state = self.state.lock().expect("router state lock");
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| RouterError::NotFound {
                kind: "transport",
                id: transport_id.to_string(),
            })?;
        transport.connected = true;
        Ok(())
    }

    fn produce(&self, transport_id: &str, _rtp_parameters: Value) -> Result<String, RouterError> {
        let mut state = self.state.lock().expect("router state lock");
        if !state.transports.contains_key(transport_id) {
            return Err(RouterError::NotFound {
                kind: "transport",
                id: transport_id.to_string(),
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        state.producers.insert(
            id.clone(),
            ProducerEntry {
                transport_id: transport_id.to_string(),
                tap: None,
            },
        );
        debug!(producer_id = %id, transport_id = %transport_id, "registered producer");
        Ok(id)
    }

    fn create_plain_tap(&self, producer_id: &str) -> Result<PlainTap, RouterError> {
        let mut state = self.state.lock().expect("router state lock");
        let producer = state
            .producers
            .get_mut(producer_id)
            .ok_or_else(|| RouterError::NotFound {
                kind: "producer",
                id: producer_id.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        producer.tap = Some(tx);
        let transport_id = uuid::Uuid::new_v4().to_string();
        let consumer_id = uuid::Uuid::new_v4().to_string();
        state
            .transports
            .insert(transport_id.clone(), TransportEntry { connected: true });
        Ok(PlainTap {
            transport_id,
            consumer_id,
            packets: rx,
        })
    }

    fn consume(
        &self,
        producer_id: &str,
        _rtp_capabilities: Value,
    ) -> Result<ConsumerInfo, RouterError> {
        let mut state = self.state.lock().expect("router state lock");
        if !state.producers.contains_key(producer_id) {
            return Err(RouterError::NotFound {
                kind: "producer",
                id: producer_id.to_string(),
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        let (sink, stream) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        state.consumers.insert(
            id.clone(),
            ConsumerEntry {
                producer_id: producer_id.to_string(),
                paused: true,
                sink,
                stream: Some(stream),
            },
        );
        Ok(ConsumerInfo {
            id,
            kind: "audio".to_string(),
            rtp_parameters: json!({
                "codecs": [{
                    "mimeType": "audio/opus",
                    "payloadType": parley_media::OPUS_PAYLOAD_TYPE,
                    "clockRate": 48_000,
                    "channels": 2,
                }],
            }),
        })
    }

    fn resume_consumer(&self, consumer_id: &str) -> Result<(), RouterError> {
        let mut state = self.state.lock().expect("router state lock");
        let consumer = state
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| RouterError::NotFound {
                kind: "consumer",
                id: consumer_id.to_string(),
            })?;
        consumer.paused = false;
        Ok(())
    }

    fn consumer_sink(&self, consumer_id: &str) -> Result<mpsc::Sender<Vec<u8>>, RouterError> {
        self.state
            .lock()
            .expect("router state lock")
            .consumers
            .get(consumer_id)
            .map(|c| c.sink.clone())
            .ok_or_else(|| RouterError::NotFound {
                kind: "consumer",
                id: consumer_id.to_string(),
            })
    }

    fn close_transport(&self, transport_id: &str) {
        let mut state = self.state.lock().expect("router state lock");
        if state.transports.remove(transport_id).is_none() {
            return;
        }
        // Producers on a closed transport go with it; their taps close
        // when the senders drop.
        state
            .producers
            .retain(|_, producer| producer.transport_id != transport_id);
    }

    fn close_consumer(&self, consumer_id: &str) {
        let mut state = self.state.lock().expect("router state lock");
        if let Some(consumer) = state.consumers.remove(consumer_id) {
            debug!(
                consumer_id = %consumer_id,
                producer_id = %consumer.producer_id,
                "closed consumer"
            );
        }
    }
}
