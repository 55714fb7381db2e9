//! AAC AudioSpecificConfig
//!
//! AAC is not forwarded to browsers, but its sequence header still tells us
//! the real sample rate and channel layout for the stream's codec list.
//!
//! ```text
//! audioObjectType (5) | samplingFrequencyIndex (4) | [samplingFrequency (24)]
//! | channelConfiguration (4) | ...
//! ```

use bytes::Bytes;

use crate::error::{MediaError, Result};

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Parsed AudioSpecificConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }

        let b0 = data[0];
        let b1 = data[1];
        let audio_object_type = (b0 >> 3) & 0x1F;
        let index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, channel_configuration) = if index == 0x0F {
            // Explicit 24-bit frequency
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket.into());
            }
            let freq = (((b1 & 0x7F) as u32) << 17)
                | ((data[2] as u32) << 9)
                | ((data[3] as u32) << 1)
                | ((data[4] >> 7) as u32);
            (freq, (data[4] >> 3) & 0x0F)
        } else {
            let freq = *SAMPLING_FREQUENCIES
                .get(index as usize)
                .ok_or(MediaError::InvalidAacPacket)?;
            (freq, (b1 >> 3) & 0x0F)
        };

        Ok(Self {
            audio_object_type,
            sampling_frequency,
            channel_configuration,
            raw: data,
        })
    }

    /// Channel count; configuration 7 is 7.1
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            7 => 8,
            c @ 0..=6 => c,
            _ => 0,
        }
    }
}
