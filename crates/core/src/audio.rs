//! Audio payload types
//!
//! Audio crosses the relay in the transport's wire encoding; the relay
//! never resamples or transcodes. Telephony media streams carry 8 kHz
//! mono mu-law, which is also what the synthesis adapter requests.

use serde::{Deserialize, Serialize};

/// One synthesized audio chunk, already in the wire encoding.
pub type AudioChunk = Vec<u8>;

/// Byte value of digital silence in 8-bit mu-law.
pub const MULAW_SILENCE: u8 = 0xFF;

/// Wire encoding of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    PcmMulaw,
    Pcm16,
}

impl AudioEncoding {
    /// Name the synthesis vendor expects in its `output_format` request.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::PcmMulaw => "pcm_mulaw",
            Self::Pcm16 => "pcm_s16le",
        }
    }
}

/// Audio format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Wire encoding
    pub encoding: AudioEncoding,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            encoding: AudioEncoding::PcmMulaw,
        }
    }
}
