//! Per-producer audio processors and the bridge that owns them.

use crate::decode::Decode;
use crate::error::MediaError;
use crate::level::LevelMonitor;
use crate::router::SfuRouter;
use crate::rtp::{Packetizer, RtpHeader};
use crate::silence::{SilenceDetector, VoiceEdge};
use parley_types::{AudioStream, MediaEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// RMS measurement window fed to the silence detector.
const LEVEL_WINDOW_MS: u32 = 20;

/// Levels below this are treated as silence.
const SILENCE_THRESHOLD_DB: f32 = -45.0;

/// How long the level must stay below threshold before speech is
/// considered ended.
const MIN_SILENCE: Duration = Duration::from_millis(700);

struct ProcessorHandle {
    plain_transport_id: String,
    tap_consumer_id: String,
    chain: JoinHandle<()>,
}

/// Bidirectional converter between RTP and the pipeline's PCM streams.
///
/// Owns the active audio processor set, keyed by producer id. The set
/// is only ever mutated through [`create_audio_processor`] and
/// [`stop_audio_processor`] on the owning session's task.
///
/// [`create_audio_processor`]: MediaBridge::create_audio_processor
/// [`stop_audio_processor`]: MediaBridge::stop_audio_processor
#[derive(Clone, Default)]
pub struct MediaBridge {
    processors: Arc<RwLock<HashMap<String, ProcessorHandle>>>,
}

impl MediaBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the transform chain for one inbound producer.
    ///
    /// Provisions a plain transport tap from the router (provisioning
    /// failure is fatal and propagated), then spawns the
    /// decode → level → silence chain. Decoded PCM goes out as s16le
    /// bytes on `pcm_tx`; level readings and speech edges on `event_tx`.
    ///
    /// At most one processor may be active per producer id.
    pub async fn create_audio_processor(
        &self,
        router: &dyn SfuRouter,
        producer_id: &str,
        decoder: Box<dyn Decode>,
        sample_rate: u32,
        pcm_tx: mpsc::Sender<Vec<u8>>,
        event_tx: mpsc::Sender<MediaEvent>,
    ) -> Result<(), MediaError> {
        {
            let processors = self.processors.read().await;
            if processors.contains_key(producer_id) {
                return Err(MediaError::ProcessorActive(producer_id.to_string()));
            }
        }

        let tap = router.create_plain_tap(producer_id)?;
        info!(
            producer_id = %producer_id,
            transport_id = %tap.transport_id,
            "created audio processor"
        );

        let chain = tokio::spawn(run_chain(
            tap.packets,
            decoder,
            sample_rate,
            pcm_tx,
            event_tx,
        ));

        let handle = ProcessorHandle {
            plain_transport_id: tap.transport_id,
            tap_consumer_id: tap.consumer_id,
            chain,
        };
        self.processors
            .write()
            .await
            .insert(producer_id.to_string(), handle);
        Ok(())
    }

    /// Tears down a producer's processor: closes the tap consumer and
    /// plain transport and stops the chain task.
    ///
    /// Idempotent: a second call, or a call for an unknown producer id,
    /// is a no-op.
    pub async fn stop_audio_processor(&self, router: &dyn SfuRouter, producer_id: &str) {
        let handle = self.processors.write().await.remove(producer_id);
        match handle {
            Some(handle) => {
                router.close_consumer(&handle.tap_consumer_id);
                router.close_transport(&handle.plain_transport_id);
                handle.chain.abort();
                info!(producer_id = %producer_id, "stopped audio processor");
            }
            None => {
                debug!(producer_id = %producer_id, "stop for unknown audio processor, ignoring");
            }
        }
    }

    /// Stops every active processor. Used at session teardown.
    pub async fn stop_all(&self, router: &dyn SfuRouter) {
        let ids: Vec<String> = self.processors.read().await.keys().cloned().collect();
        for id in ids {
            self.stop_audio_processor(router, &id).await;
        }
    }

    /// Producer ids with a live processor.
    pub async fn active_producers(&self) -> Vec<String> {
        self.processors.read().await.keys().cloned().collect()
    }
}

/// The per-producer transform chain: parse RTP, decode, measure, detect
/// speech edges, forward PCM. Ends when the tap closes or the PCM
/// consumer goes away.
async fn run_chain(
    mut packets: mpsc::Receiver<Vec<u8>>,
    mut decoder: Box<dyn Decode>,
    sample_rate: u32,
    pcm_tx: mpsc::Sender<Vec<u8>>,
    event_tx: mpsc::Sender<MediaEvent>,
) {
    let mut monitor = LevelMonitor::new(sample_rate, LEVEL_WINDOW_MS);
    let mut detector = SilenceDetector::new(SILENCE_THRESHOLD_DB, MIN_SILENCE);

    while let Some(packet) = packets.recv().await {
        let payload = match RtpHeader::parse(&packet) {
            Ok((_, payload)) => payload,
            Err(e) => {
                warn!("dropping inbound packet: {}", e);
                continue;
            }
        };
        if payload.is_empty() {
            continue;
        }

        let samples = match decoder.decode(payload) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("dropping undecodable payload: {}", e);
                continue;
            }
        };

        for level in monitor.process(&samples) {
            if event_tx.send(MediaEvent::AudioLevel(level)).await.is_err() {
                return;
            }
            if let Some(edge) = detector.observe(level, Instant::now()) {
                let event = match edge {
                    VoiceEdge::SilenceStart => MediaEvent::SilenceStart,
                    VoiceEdge::SilenceEnd => MediaEvent::SilenceEnd,
                };
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        }

        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in &samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        if pcm_tx.send(bytes).await.is_err() {
            return;
        }
    }
}

/// The return path: pulls synthesized PCM chunks and forwards them as
/// RTP to the peer's consumer transport.
///
/// One sender exists per session so the SSRC stays fixed and sequence
/// numbers stay strictly increasing across all of the session's turns.
pub struct RtpSender {
    packetizer: Packetizer,
    sink: mpsc::Sender<Vec<u8>>,
}

impl RtpSender {
    pub fn new(sink: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            packetizer: Packetizer::new(),
            sink,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.packetizer.ssrc()
    }

    /// Drains one turn's audio stream into the consumer sink.
    ///
    /// Returns the number of packets sent. A closed sink ends the
    /// stream early without error: the peer is gone and teardown is in
    /// progress.
    pub async fn send_stream(&mut self, mut audio: AudioStream) -> usize {
        let mut sent = 0;
        while let Some(chunk) = audio.recv().await {
            for packet in self.packetizer.packetize(&chunk) {
                if self.sink.send(packet).await.is_err() {
                    debug!("consumer sink closed mid-stream after {} packets", sent);
                    return sent;
                }
                sent += 1;
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PcmPassthrough;
    use crate::router::{ConsumerInfo, PlainTap, RouterError, TransportInfo};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Minimal router stub: hands out one tap and records closures.
    struct StubRouter {
        tap_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
        tap_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
        closed: Mutex<Vec<String>>,
        fail_tap: bool,
    }

    impl StubRouter {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(64);
            Self {
                tap_tx: Mutex::new(Some(tx)),
                tap_rx: Mutex::new(Some(rx)),
                closed: Mutex::new(Vec::new()),
                fail_tap: false,
            }
        }

        fn failing() -> Self {
            let mut stub = Self::new();
            stub.fail_tap = true;
            stub
        }

        fn take_tap_sender(&self) -> mpsc::Sender<Vec<u8>> {
            self.tap_tx.lock().unwrap().take().unwrap()
        }
    }

    impl SfuRouter for StubRouter {
        fn rtp_capabilities(&self) -> Value {
            json!({})
        }

        fn create_webrtc_transport(&self) -> Result<TransportInfo, RouterError> {
            unimplemented!("not used by these tests")
        }

        fn connect_transport(&self, _: &str, _: Value) -> Result<(), RouterError> {
            Ok(())
        }

        fn produce(&self, _: &str, _: Value) -> Result<String, RouterError> {
            unimplemented!("not used by these tests")
        }

        fn create_plain_tap(&self, producer_id: &str) -> Result<PlainTap, RouterError> {
            if self.fail_tap {
                return Err(RouterError::TransportFailed("no ports left".to_string()));
            }
            let packets = self
                .tap_rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| RouterError::TransportFailed("tap already taken".to_string()))?;
            Ok(PlainTap {
                transport_id: format!("plain-{}", producer_id),
                consumer_id: format!("tapcons-{}", producer_id),
                packets,
            })
        }

        fn consume(&self, _: &str, _: Value) -> Result<ConsumerInfo, RouterError> {
            unimplemented!("not used by these tests")
        }

        fn resume_consumer(&self, _: &str) -> Result<(), RouterError> {
            Ok(())
        }

        fn consumer_sink(&self, _: &str) -> Result<mpsc::Sender<Vec<u8>>, RouterError> {
            unimplemented!("not used by these tests")
        }

        fn close_transport(&self, transport_id: &str) {
            self.closed.lock().unwrap().push(transport_id.to_string());
        }

        fn close_consumer(&self, consumer_id: &str) {
            self.closed.lock().unwrap().push(consumer_id.to_string());
        }
    }

    fn pcm_packet(seq: u16, samples: &[i16]) -> Vec<u8> {
        let header = RtpHeader {
            version: 2,
            payload_type: crate::rtp::OPUS_PAYLOAD_TYPE,
            sequence: seq,
            timestamp: u32::from(seq) * 960,
            ssrc: 42,
        };
        let mut packet = header.to_bytes().to_vec();
        for sample in samples {
            packet.extend_from_slice(&sample.to_le_bytes());
        }
        packet
    }

    #[tokio::test]
    async fn chain_decodes_and_forwards_pcm() {
        let router = StubRouter::new();
        let tap_sender = router.take_tap_sender();
        let bridge = MediaBridge::new();
        let (pcm_tx, mut pcm_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(64);

        bridge
            .create_audio_processor(
                &router,
                "prod-1",
                Box::new(PcmPassthrough),
                48_000,
                pcm_tx,
                event_tx,
            )
            .await
            .unwrap();

        // One full 20 ms window of loud samples at 48 kHz.
        let samples = vec![12_000i16; 960];
        tap_sender.send(pcm_packet(1, &samples)).await.unwrap();

        let pcm = pcm_rx.recv().await.unwrap();
        assert_eq!(pcm.len(), 960 * 2);
        assert_eq!(&pcm[..2], &12_000i16.to_le_bytes());

        // A level reading arrives, followed by a speech-resumed edge.
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            MediaEvent::AudioLevel(_)
        ));
        assert_eq!(event_rx.recv().await.unwrap(), MediaEvent::SilenceEnd);

        bridge.stop_audio_processor(&router, "prod-1").await;
    }

    #[tokio::test]
    async fn second_processor_for_same_producer_is_rejected() {
        let router = StubRouter::new();
        let bridge = MediaBridge::new();
        let (pcm_tx, _pcm_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(16);

        bridge
            .create_audio_processor(
                &router,
                "prod-1",
                Box::new(PcmPassthrough),
                48_000,
                pcm_tx.clone(),
                event_tx.clone(),
            )
            .await
            .unwrap();

        let err = bridge
            .create_audio_processor(
                &router,
                "prod-1",
                Box::new(PcmPassthrough),
                48_000,
                pcm_tx,
                event_tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ProcessorActive(_)));
    }

    #[tokio::test]
    async fn tap_failure_is_fatal_to_creation() {
        let router = StubRouter::failing();
        let bridge = MediaBridge::new();
        let (pcm_tx, _pcm_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(16);

        let err = bridge
            .create_audio_processor(
                &router,
                "prod-1",
                Box::new(PcmPassthrough),
                48_000,
                pcm_tx,
                event_tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Router(_)));
        assert!(bridge.active_producers().await.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let router = StubRouter::new();
        let bridge = MediaBridge::new();
        let (pcm_tx, _pcm_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(16);

        bridge
            .create_audio_processor(
                &router,
                "prod-1",
                Box::new(PcmPassthrough),
                48_000,
                pcm_tx,
                event_tx,
            )
            .await
            .unwrap();

        bridge.stop_audio_processor(&router, "prod-1").await;
        // Second call and unknown id are both no-ops.
        bridge.stop_audio_processor(&router, "prod-1").await;
        bridge.stop_audio_processor(&router, "prod-404").await;

        // The tap consumer and plain transport were each closed once.
        let closed = router.closed.lock().unwrap().clone();
        assert_eq!(closed, vec!["tapcons-prod-1", "plain-prod-1"]);
    }

    #[tokio::test]
    async fn rtp_sender_packetizes_a_full_stream() {
        let (sink_tx, mut sink_rx) = mpsc::channel(256);
        let mut sender = RtpSender::new(sink_tx);
        let ssrc = sender.ssrc();

        let (audio_tx, audio_rx) = mpsc::channel(8);
        let producer = tokio::spawn(async move {
            audio_tx.send(vec![0u8; 3000]).await.unwrap();
            audio_tx.send(vec![0u8; 500]).await.unwrap();
        });

        let sent = sender.send_stream(audio_rx).await;
        producer.await.unwrap();
        assert_eq!(sent, 4); // 1400 + 1400 + 200, then 500

        let mut prev_seq: Option<u16> = None;
        for _ in 0..sent {
            let packet = sink_rx.recv().await.unwrap();
            let (header, _) = RtpHeader::parse(&packet).unwrap();
            assert_eq!(header.ssrc, ssrc);
            if let Some(prev) = prev_seq {
                assert_eq!(header.sequence, prev.wrapping_add(1));
            }
            prev_seq = Some(header.sequence);
        }
    }
}
