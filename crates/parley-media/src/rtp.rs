//! RTP header serialization and outbound packetization.
//!
//! The 12-byte fixed header is modeled as an explicit serialization
//! function with a tested binary layout so the wire format can be
//! verified independently of the packetizer that uses it.

use crate::error::MediaError;

/// RTP protocol version carried in every packet.
pub const RTP_VERSION: u8 = 2;

/// Dynamic payload type for Opus audio.
pub const OPUS_PAYLOAD_TYPE: u8 = 111;

/// Maximum payload bytes per packet, chosen to stay under a 1500-byte
/// MTU with headroom for IP/UDP/RTP headers.
pub const MAX_PAYLOAD_BYTES: usize = 1400;

/// Timestamp advance per packet: 960 samples per 20 ms at 48 kHz.
pub const SAMPLES_PER_PACKET: u32 = 960;

/// The fixed 12-byte RTP header (no CSRCs, no extensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialized header length in bytes.
    pub const LEN: usize = 12;

    /// Serializes the header into its fixed 12-byte wire layout.
    ///
    /// Byte 0 packs version (2 bits) with zero padding/extension/CSRC
    /// bits; byte 1 packs a zero marker bit with the payload type.
    /// Sequence, timestamp, and SSRC follow in network byte order.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0] = (self.version & 0x03) << 6;
        buf[1] = self.payload_type & 0x7f;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Parses a packet, returning the header and the payload slice.
    pub fn parse(packet: &[u8]) -> Result<(Self, &[u8]), MediaError> {
        if packet.len() < Self::LEN {
            return Err(MediaError::InvalidPacket(format!(
                "packet too short: {} bytes",
                packet.len()
            )));
        }
        let version = packet[0] >> 6;
        if version != RTP_VERSION {
            return Err(MediaError::InvalidPacket(format!(
                "unsupported RTP version {}",
                version
            )));
        }
        let header = Self {
            version,
            payload_type: packet[1] & 0x7f,
            sequence: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
        };
        Ok((header, &packet[Self::LEN..]))
    }
}

/// Chunks outbound PCM into RTP packets for one session.
///
/// The sequence number increments by exactly one per packet and the
/// timestamp advances by one packet-duration of samples, so the
/// receiver can detect gaps and reordering. The SSRC is chosen at
/// random when the packetizer is created and is never reused by
/// another session.
#[derive(Debug)]
pub struct Packetizer {
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    payload_type: u8,
}

impl Packetizer {
    pub fn new() -> Self {
        Self::with_ssrc(rand::random())
    }

    pub fn with_ssrc(ssrc: u32) -> Self {
        Self {
            sequence: rand::random(),
            timestamp: rand::random(),
            ssrc,
            payload_type: OPUS_PAYLOAD_TYPE,
        }
    }

    /// The source identifier stamped on every packet from this session.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Splits an audio chunk into MTU-safe RTP packets.
    pub fn packetize(&mut self, audio: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::with_capacity(audio.len().div_ceil(MAX_PAYLOAD_BYTES));
        for payload in audio.chunks(MAX_PAYLOAD_BYTES) {
            let header = RtpHeader {
                version: RTP_VERSION,
                payload_type: self.payload_type,
                sequence: self.sequence,
                timestamp: self.timestamp,
                ssrc: self.ssrc,
            };
            let mut packet = Vec::with_capacity(RtpHeader::LEN + payload.len());
            packet.extend_from_slice(&header.to_bytes());
            packet.extend_from_slice(payload);
            packets.push(packet);

            self.sequence = self.sequence.wrapping_add(1);
            self.timestamp = self.timestamp.wrapping_add(SAMPLES_PER_PACKET);
        }
        packets
    }
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new()
    }
}
