//! Media bridge for the Parley voice pipeline.
//!
//! Converts between RTP-carried compressed audio and the raw PCM
//! streams the conversation orchestrator consumes and produces. Per
//! inbound producer, an ordered transform chain runs
//! decode → level monitor → silence detector; for the return path,
//! synthesized PCM is packetized back into RTP with a stable source id
//! and strictly increasing sequence numbers.
//!
//! The SFU router itself is an external collaborator; this crate only
//! defines the [`SfuRouter`] boundary it is consumed through.

pub mod decode;
pub mod error;
pub mod level;
pub mod processor;
pub mod router;
pub mod rtp;
pub mod silence;

pub use decode::{Decode, OpusChannelDecoder, PcmPassthrough};
pub use error::MediaError;
pub use level::LevelMonitor;
pub use parley_types::MediaEvent;
pub use processor::{MediaBridge, RtpSender};
pub use router::{ConsumerInfo, PlainTap, RouterError, SfuRouter, TransportInfo};
pub use rtp::{Packetizer, RtpHeader, MAX_PAYLOAD_BYTES, OPUS_PAYLOAD_TYPE, SAMPLES_PER_PACKET};
pub use silence::{SilenceDetector, VoiceEdge};
