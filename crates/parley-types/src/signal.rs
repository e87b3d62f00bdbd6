//! Signaling protocol messages exchanged over the per-peer WebSocket.
//!
//! Wire format is JSON with a `type` tag and camelCase payload fields to
//! match the browser client. Negotiation parameter payloads
//! (`dtlsParameters`, `rtpParameters`, `rtpCapabilities`, ICE fields)
//! are opaque to Parley and passed through as raw JSON; the SFU router
//! owns their semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → server signaling messages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "get-router-capabilities")]
    GetRouterCapabilities,
    #[serde(rename = "start-voice-session")]
    StartVoiceSession {
        #[serde(rename = "sttProvider")]
        stt_provider: Option<String>,
        #[serde(rename = "ttsProvider")]
        tts_provider: Option<String>,
        language: Option<String>,
        #[serde(rename = "sttModel")]
        stt_model: Option<String>,
        #[serde(rename = "ttsModel")]
        tts_model: Option<String>,
        voice: Option<String>,
        #[serde(rename = "llmModel")]
        llm_model: Option<String>,
        #[serde(rename = "systemPrompt")]
        system_prompt: Option<String>,
    },
    #[serde(rename = "connect-transport")]
    ConnectTransport {
        #[serde(rename = "dtlsParameters")]
        dtls_parameters: Value,
    },
    #[serde(rename = "produce")]
    Produce {
        #[serde(rename = "rtpParameters")]
        rtp_parameters: Value,
    },
    #[serde(rename = "consume")]
    Consume {
        #[serde(rename = "producerId")]
        producer_id: String,
        #[serde(rename = "rtpCapabilities")]
        rtp_capabilities: Value,
    },
    #[serde(rename = "resume-consumer")]
    ResumeConsumer,
    #[serde(rename = "stop-voice-session")]
    StopVoiceSession,
    #[serde(rename = "ping")]
    Ping,
}

/// Server → client signaling messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "router-rtp-capabilities")]
    RouterRtpCapabilities { capabilities: Value },
    #[serde(rename = "transport-created")]
    TransportCreated {
        id: String,
        #[serde(rename = "iceParameters")]
        ice_parameters: Value,
        #[serde(rename = "iceCandidates")]
        ice_candidates: Value,
        #[serde(rename = "dtlsParameters")]
        dtls_parameters: Value,
    },
    #[serde(rename = "transport-connected")]
    TransportConnected,
    #[serde(rename = "produced")]
    Produced { id: String },
    #[serde(rename = "consumed")]
    Consumed {
        id: String,
        kind: String,
        #[serde(rename = "rtpParameters")]
        rtp_parameters: Value,
    },
    #[serde(rename = "consumer-resumed")]
    ConsumerResumed,
    #[serde(rename = "transcription")]
    Transcription {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
        timestamp: String,
    },
    #[serde(rename = "ai-response")]
    AiResponse { text: String, timestamp: String },
    #[serde(rename = "metrics")]
    Metrics {
        #[serde(rename = "averageLatencies")]
        average_latencies: crate::turn::AverageLatencies,
    },
    #[serde(rename = "voice-session-stopped")]
    VoiceSessionStopped,
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_deserialize_from_tagged_json() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "start-voice-session",
            "sttProvider": "whisper",
            "llmModel": "gpt-4o-mini",
            "systemPrompt": "Be brief."
        }))
        .unwrap();
        match msg {
            ClientMessage::StartVoiceSession {
                stt_provider,
                llm_model,
                system_prompt,
                voice,
                ..
            } => {
                assert_eq!(stt_provider.as_deref(), Some("whisper"));
                assert_eq!(llm_model.as_deref(), Some("gpt-4o-mini"));
                assert_eq!(system_prompt.as_deref(), Some("Be brief."));
                assert_eq!(voice, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn produce_carries_opaque_rtp_parameters() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "produce",
            "rtpParameters": {"codecs": [{"mimeType": "audio/opus"}]}
        }))
        .unwrap();
        match msg {
            ClientMessage::Produce { rtp_parameters } => {
                assert_eq!(rtp_parameters["codecs"][0]["mimeType"], "audio/opus");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn server_error_serializes_with_stage_detail() {
        let value = serde_json::to_value(ServerMessage::Error {
            message: "completion failed".to_string(),
            error: Some("llm".to_string()),
        })
        .unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "completion failed");
        assert_eq!(value["error"], "llm");
    }

    #[test]
    fn transcription_uses_camel_case_finality() {
        let value = serde_json::to_value(ServerMessage::Transcription {
            text: "hello".to_string(),
            is_final: true,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        })
        .unwrap();
        assert_eq!(value["type"], "transcription");
        assert_eq!(value["isFinal"], true);
    }

    #[test]
    fn ping_pong_round_trip() {
        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));
        assert_eq!(
            serde_json::to_string(&ServerMessage::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
    }
}
