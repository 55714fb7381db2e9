//! Codec descriptors
//!
//! A descriptor is tagged with its [`MediaKind`] so that track selection can be
//! a plain match over data. The position of a descriptor in a stream's codec
//! list is the `stream_index` carried by that stream's [`MediaPacket`]s.
//!
//! [`MediaPacket`]: super::MediaPacket

use bytes::Bytes;

use super::h264::AvcConfig;

/// Track direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    H265,
    Av1,
    Vp9,
    OtherVideo,
    Aac,
    Pcma,
    Pcmu,
    Opus,
    Mp3,
    OtherAudio,
}

impl CodecId {
    pub fn kind(&self) -> MediaKind {
        match self {
            CodecId::H264 | CodecId::H265 | CodecId::Av1 | CodecId::Vp9 | CodecId::OtherVideo => {
                MediaKind::Video
            }
            _ => MediaKind::Audio,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecId::H264 => "H264",
            CodecId::H265 => "H265",
            CodecId::Av1 => "AV1",
            CodecId::Vp9 => "VP9",
            CodecId::OtherVideo => "video",
            CodecId::Aac => "AAC",
            CodecId::Pcma => "PCM_ALAW",
            CodecId::Pcmu => "PCM_MULAW",
            CodecId::Opus => "OPUS",
            CodecId::Mp3 => "MP3",
            CodecId::OtherAudio => "audio",
        }
    }
}

/// One negotiated track of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct CodecDescriptor {
    pub kind: MediaKind,
    pub codec: CodecId,
    /// RTP clock rate (90 kHz for video, sample rate for audio)
    pub clock_rate: u32,
    /// Zero for video
    pub channels: u8,
    /// H.264 decoder configuration, once the sequence header arrived
    pub avc: Option<AvcConfig>,
    /// Raw codec configuration for anything other than H.264
    pub extra: Bytes,
}

impl CodecDescriptor {
    pub fn video(codec: CodecId) -> Self {
        Self {
            kind: MediaKind::Video,
            codec,
            clock_rate: 90_000,
            channels: 0,
            avc: None,
            extra: Bytes::new(),
        }
    }

    pub fn h264(config: Option<AvcConfig>) -> Self {
        Self {
            avc: config,
            ..Self::video(CodecId::H264)
        }
    }

    pub fn audio(codec: CodecId, clock_rate: u32, channels: u8) -> Self {
        Self {
            kind: MediaKind::Audio,
            codec,
            clock_rate,
            channels,
            avc: None,
            extra: Bytes::new(),
        }
    }

    pub fn with_extra(mut self, extra: Bytes) -> Self {
        self.extra = extra;
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }

    /// H.264 is only usable once both SPS and PPS are known
    pub fn is_ready(&self) -> bool {
        match self.codec {
            CodecId::H264 => self
                .avc
                .as_ref()
                .map(AvcConfig::has_parameter_sets)
                .unwrap_or(false),
            _ => true,
        }
    }
}

/// True when the list has audio but no video
pub fn is_audio_only(codecs: &[CodecDescriptor]) -> bool {
    !codecs.iter().any(CodecDescriptor::is_video) && codecs.iter().any(CodecDescriptor::is_audio)
}
