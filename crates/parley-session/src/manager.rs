//! Signaling command dispatch and session lifecycle.

use crate::error::SessionError;
use crate::providers::ProviderSettings;
use crate::session::Session;
use chrono::Utc;
use parley_media::{Decode, MediaBridge, OpusChannelDecoder, PcmPassthrough, RtpSender, SfuRouter};
use parley_pipeline::Orchestrator;
use parley_types::{ClientMessage, PipelineConfig, PipelineEvent, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the orchestrator event channel and the per-producer PCM
/// and voice-activity channels.
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// One [`Session`] per signaling connection, keyed by connection id.
///
/// Every signaling command lands in [`handle_message`]; a dropped
/// connection must call [`disconnect`], which behaves exactly like an
/// explicit `stop-voice-session`.
///
/// [`handle_message`]: SessionManager::handle_message
/// [`disconnect`]: SessionManager::disconnect
pub struct SessionManager {
    router: Arc<dyn SfuRouter>,
    providers: ProviderSettings,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(router: Arc<dyn SfuRouter>, providers: ProviderSettings) -> Self {
        Self {
            router,
            providers,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Dispatches one signaling command for one connection and returns
    /// the direct reply. Pipeline events reach the peer asynchronously
    /// through `events`, the connection's outbox.
    pub async fn handle_message(
        &self,
        conn_id: &str,
        message: ClientMessage,
        events: &mpsc::Sender<ServerMessage>,
    ) -> Result<ServerMessage, SessionError> {
        match message {
            ClientMessage::GetRouterCapabilities => Ok(ServerMessage::RouterRtpCapabilities {
                capabilities: self.router.rtp_capabilities(),
            }),
            ClientMessage::StartVoiceSession {
                stt_provider,
                tts_provider,
                language,
                stt_model,
                tts_model,
                voice,
                llm_model,
                system_prompt,
            } => {
                let mut config = PipelineConfig::default();
                if let Some(p) = stt_provider {
                    config.stt.provider = p;
                }
                if let Some(m) = stt_model {
                    config.stt.model = m;
                }
                if let Some(l) = language {
                    config.stt.language = l;
                }
                if let Some(p) = tts_provider {
                    config.tts.provider = p;
                }
                if let Some(m) = tts_model {
                    config.tts.model = m;
                }
                if let Some(v) = voice {
                    config.tts.voice = v;
                }
                if let Some(m) = llm_model {
                    config.llm.model = m;
                }
                if let Some(s) = system_prompt {
                    config.llm.system_prompt = s;
                }
                self.start_session(conn_id, config, events.clone()).await
            }
            ClientMessage::ConnectTransport { dtls_parameters } => {
                let sessions = self.sessions.read().await;
                let session = sessions.get(conn_id).ok_or(SessionError::NoSession)?;
                self.router
                    .connect_transport(&session.transport_id, dtls_parameters)?;
                Ok(ServerMessage::TransportConnected)
            }
            ClientMessage::Produce { rtp_parameters } => {
                self.produce(conn_id, rtp_parameters).await
            }
            ClientMessage::Consume {
                producer_id,
                rtp_capabilities,
            } => {
                // The forwarder holds the sender mutex for a whole
                // turn's audio, so the sessions lock must be released
                // before waiting on it.
                let (rtp_sender, info) = {
                    let mut sessions = self.sessions.write().await;
                    let session = sessions.get_mut(conn_id).ok_or(SessionError::NoSession)?;
                    let info = self.router.consume(&producer_id, rtp_capabilities)?;
                    session.consumer_id = Some(info.id.clone());
                    (session.rtp_sender.clone(), info)
                };
                let sink = self.router.consumer_sink(&info.id)?;
                *rtp_sender.lock().await = Some(RtpSender::new(sink));
                Ok(ServerMessage::Consumed {
                    id: info.id,
                    kind: info.kind,
                    rtp_parameters: info.rtp_parameters,
                })
            }
            ClientMessage::ResumeConsumer => {
                let sessions = self.sessions.read().await;
                let session = sessions.get(conn_id).ok_or(SessionError::NoSession)?;
                let consumer_id = session
                    .consumer_id
                    .as_deref()
                    .ok_or(SessionError::NotReady("consumer"))?;
                self.router.resume_consumer(consumer_id)?;
                Ok(ServerMessage::ConsumerResumed)
            }
            ClientMessage::StopVoiceSession => {
                self.stop_session(conn_id).await;
                Ok(ServerMessage::VoiceSessionStopped)
            }
            ClientMessage::Ping => Ok(ServerMessage::Pong),
        }
    }

    /// Connection closed. Equivalent to an explicit stop.
    pub async fn disconnect(&self, conn_id: &str) {
        self.stop_session(conn_id).await;
    }

    async fn start_session(
        &self,
        conn_id: &str,
        config: PipelineConfig,
        outbox: mpsc::Sender<ServerMessage>,
    ) -> Result<ServerMessage, SessionError> {
        // A fresh start replaces any session the connection already has.
        self.stop_session(conn_id).await;

        let stt = self.providers.build_stt(&config.stt)?;
        let llm = self.providers.build_llm(&config.llm)?;
        let tts = self.providers.build_tts(&config.tts)?;

        let transport = self.router.create_webrtc_transport()?;
        let id = uuid::Uuid::new_v4();

        let (events_tx, events_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let orchestrator = Arc::new(Orchestrator::new(config.clone(), stt, llm, tts, events_tx));
        let rtp_sender: Arc<Mutex<Option<RtpSender>>> = Arc::new(Mutex::new(None));
        let forwarder = spawn_event_forwarder(id, events_rx, outbox, rtp_sender.clone());

        info!(
            session_id = %id,
            stt = %config.stt.provider,
            llm = %config.llm.provider,
            tts = %config.tts.provider,
            "voice session started"
        );

        let session = Session {
            id,
            created_at: Utc::now(),
            config,
            transport_id: transport.id.clone(),
            producer_id: None,
            consumer_id: None,
            orchestrator,
            bridge: MediaBridge::new(),
            rtp_sender,
            forwarder,
        };
        self.sessions
            .write()
            .await
            .insert(conn_id.to_string(), session);

        Ok(ServerMessage::TransportCreated {
            id: transport.id,
            ice_parameters: transport.ice_parameters,
            ice_candidates: transport.ice_candidates,
            dtls_parameters: transport.dtls_parameters,
        })
    }

    async fn produce(
        &self,
        conn_id: &str,
        rtp_parameters: serde_json::Value,
    ) -> Result<ServerMessage, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(conn_id).ok_or(SessionError::NoSession)?;
        if session.producer_id.is_some() {
            return Err(SessionError::ProducerActive);
        }

        let producer_id = self.router.produce(&session.transport_id, rtp_parameters)?;

        let decoder: Box<dyn Decode> = if self.providers.pcm_passthrough {
            Box::new(PcmPassthrough)
        } else {
            Box::new(OpusChannelDecoder::new(
                session.config.stt.sample_rate,
                session.config.stt.channels,
            )?)
        };

        let (pcm_tx, pcm_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (media_tx, media_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        session
            .bridge
            .create_audio_processor(
                self.router.as_ref(),
                &producer_id,
                decoder,
                session.config.stt.sample_rate,
                pcm_tx,
                media_tx,
            )
            .await?;
        session.orchestrator.start_processing(pcm_rx, media_rx)?;
        session.producer_id = Some(producer_id.clone());

        info!(session_id = %session.id, producer_id = %producer_id, "producer attached");
        Ok(ServerMessage::Produced { id: producer_id })
    }

    /// Full teardown for one connection's session. Safe to call when no
    /// session exists.
    async fn stop_session(&self, conn_id: &str) {
        let session = self.sessions.write().await.remove(conn_id);
        let Some(session) = session else {
            return;
        };

        session.orchestrator.stop_processing();
        session.bridge.stop_all(self.router.as_ref()).await;
        if let Some(consumer_id) = &session.consumer_id {
            self.router.close_consumer(consumer_id);
        }
        self.router.close_transport(&session.transport_id);
        session.forwarder.abort();

        let turns = session.orchestrator.conversation_history().await.len();
        info!(
            session_id = %session.id,
            age_seconds = session.age_seconds(),
            turns,
            "voice session stopped"
        );
    }
}

/// Translates orchestrator events into signaling messages and pushes
/// synthesized audio down the return path.
fn spawn_event_forwarder(
    session_id: uuid::Uuid,
    mut events: mpsc::Receiver<PipelineEvent>,
    outbox: mpsc::Sender<ServerMessage>,
    rtp_sender: Arc<Mutex<Option<RtpSender>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match event {
                PipelineEvent::UserSpeaking => {
                    debug!(session_id = %session_id, "inbound audio attached");
                    continue;
                }
                PipelineEvent::Transcription {
                    text,
                    is_final,
                    timestamp,
                } => ServerMessage::Transcription {
                    text,
                    is_final,
                    timestamp: timestamp.to_rfc3339(),
                },
                PipelineEvent::AiResponse { text, timestamp } => ServerMessage::AiResponse {
                    text,
                    timestamp: timestamp.to_rfc3339(),
                },
                PipelineEvent::AudioReady { turn_id, audio } => {
                    let mut slot = rtp_sender.lock().await;
                    match slot.as_mut() {
                        Some(sender) => {
                            let packets = sender.send_stream(audio).await;
                            debug!(
                                session_id = %session_id,
                                turn_id = %turn_id,
                                packets,
                                "synthesized audio forwarded"
                            );
                        }
                        None => {
                            warn!(
                                session_id = %session_id,
                                turn_id = %turn_id,
                                "no consumer attached, dropping synthesized audio"
                            );
                        }
                    }
                    continue;
                }
                PipelineEvent::TurnComplete(turn) => {
                    info!(
                        session_id = %session_id,
                        turn_id = %turn.id,
                        total_ms = turn.latencies.total_ms,
                        "turn complete"
                    );
                    continue;
                }
                PipelineEvent::Metrics(average_latencies) => {
                    ServerMessage::Metrics { average_latencies }
                }
                PipelineEvent::StageError {
                    stage,
                    turn_id,
                    message,
                } => {
                    warn!(
                        session_id = %session_id,
                        turn_id = %turn_id,
                        stage = %stage,
                        "pipeline stage failed: {}",
                        message
                    );
                    ServerMessage::Error {
                        message,
                        error: Some(stage.label().to_string()),
                    }
                }
            };
            if outbox.send(message).await.is_err() {
                debug!(session_id = %session_id, "signaling outbox closed, forwarder exiting");
                return;
            }
        }
    })
}
