//! Payload decode stage: compressed RTP payloads to linear PCM.

use crate::error::MediaError;

/// Largest Opus frame: 120 ms at 48 kHz.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Decodes one RTP payload into interleaved signed 16-bit samples.
pub trait Decode: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, MediaError>;
}

/// Opus decoder at a configured sample rate and channel count.
pub struct OpusChannelDecoder {
    decoder: opus::Decoder,
    channels: usize,
}

impl OpusChannelDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, MediaError> {
        let opus_channels = match channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => {
                return Err(MediaError::Decode(format!(
                    "unsupported channel count: {}",
                    n
                )))
            }
        };
        let decoder = opus::Decoder::new(sample_rate, opus_channels)
            .map_err(|e| MediaError::Decode(format!("failed to create Opus decoder: {}", e)))?;
        Ok(Self {
            decoder,
            channels: channels as usize,
        })
    }
}

impl Decode for OpusChannelDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, MediaError> {
        let mut output = vec![0i16; MAX_FRAME_SAMPLES * self.channels];
        let samples = self
            .decoder
            .decode(payload, &mut output, false)
            .map_err(|e| MediaError::Decode(format!("Opus decode failed: {}", e)))?;
        output.truncate(samples * self.channels);
        Ok(output)
    }
}

/// Passthrough for payloads that already carry s16le PCM.
///
/// Used by the loopback router and by tests, where no Opus encoder sits
/// on the far side.
#[derive(Debug, Default)]
pub struct PcmPassthrough;

impl Decode for PcmPassthrough {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, MediaError> {
        if payload.len() % 2 != 0 {
            return Err(MediaError::Decode(format!(
                "odd s16le payload length: {}",
                payload.len()
            )));
        }
        Ok(payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}
