//! FLV audio/video tag bodies
//!
//! RTMP audio and video messages carry FLV tag bodies without the tag header.
//!
//! Legacy video:
//! ```text
//! +----------+----------+----------------+------------------+
//! |FrameType | CodecID  | AVCPacketType  | CompositionTime  | Data
//! | (4 bits) | (4 bits) | (1, AVC/HEVC)  | (3, SI24)        |
//! +----------+----------+----------------+------------------+
//! ```
//!
//! Enhanced video (IsExHeader bit set):
//! ```text
//! +---+-----------+------------+---------+------------------+
//! | 1 | FrameType | PacketType | FourCC  | [CompositionTime]| Data
//! |   | (3 bits)  | (4 bits)   | (4)     | (3, CodedFrames) |
//! +---+-----------+------------+---------+------------------+
//! ```
//!
//! Legacy audio:
//! ```text
//! +-----------+----------+----------+----------+-------------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | [AACPktType]| Data
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  | (1, AAC)    |
//! +-----------+----------+----------+----------+-------------+
//! ```
//!
//! Enhanced audio uses SoundFormat 9 with the packet type in the low nibble,
//! followed by a FourCC.

use bytes::{Buf, Bytes};

use super::codec::CodecId;
use crate::error::{MediaError, Result};

/// Video frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    DisposableInterFrame = 3,
    GeneratedKeyframe = 4,
    /// Command frame, carries no picture
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    fn from_bits(b: u8) -> Option<Self> {
        match b {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Legacy video codec id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    Avc = 7,
    /// Non-standard id used by some Chinese CDNs
    Hevc = 12,
    Av1 = 13,
}

impl VideoCodec {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            13 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    pub fn codec_id(&self) -> CodecId {
        match self {
            VideoCodec::Avc => CodecId::H264,
            VideoCodec::Hevc => CodecId::H265,
            VideoCodec::Av1 => CodecId::Av1,
            _ => CodecId::OtherVideo,
        }
    }

    /// Codecs whose body starts with a packet type and composition time
    fn has_packet_type(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc | VideoCodec::Av1)
    }
}

/// Map an enhanced video FourCC
pub fn video_fourcc(fourcc: &[u8]) -> CodecId {
    match fourcc {
        b"avc1" => CodecId::H264,
        b"hvc1" => CodecId::H265,
        b"av01" => CodecId::Av1,
        b"vp09" => CodecId::Vp9,
        _ => CodecId::OtherVideo,
    }
}

/// Map an enhanced audio FourCC
pub fn audio_fourcc(fourcc: &[u8]) -> CodecId {
    match fourcc {
        b"Opus" => CodecId::Opus,
        b"mp4a" => CodecId::Aac,
        b".mp3" => CodecId::Mp3,
        _ => CodecId::OtherAudio,
    }
}

/// Legacy sound format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    /// Enhanced audio header follows
    ExHeader = 9,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            9 => Some(AudioFormat::ExHeader),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }

    pub fn codec_id(&self) -> CodecId {
        match self {
            AudioFormat::G711ALaw => CodecId::Pcma,
            AudioFormat::G711MuLaw => CodecId::Pcmu,
            AudioFormat::Aac => CodecId::Aac,
            AudioFormat::Mp3 | AudioFormat::Mp38k => CodecId::Mp3,
            _ => CodecId::OtherAudio,
        }
    }
}

/// Sample rate field of the legacy audio header
pub fn legacy_sample_rate(b: u8) -> u32 {
    match (b >> 2) & 0x03 {
        0 => 5512,
        1 => 11025,
        2 => 22050,
        _ => 44100,
    }
}

/// Video body after header parsing
#[derive(Debug, Clone, PartialEq)]
pub enum VideoPacket {
    /// Decoder configuration (AVCDecoderConfigurationRecord, hvcC, av1C, vpcC)
    SequenceHeader(Bytes),
    Frame { composition_time: i32, data: Bytes },
    EndOfSequence,
    /// Metadata, command frames and multitrack packets
    Other,
}

/// Parsed video message
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTag {
    pub codec: CodecId,
    pub frame_type: VideoFrameType,
    pub packet: VideoPacket,
}

impl VideoTag {
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(MediaError::InvalidFlvTag.into());
        }
        let b0 = data.get_u8();

        if b0 & 0x80 != 0 {
            return Self::parse_enhanced(b0, data);
        }

        let frame_type =
            VideoFrameType::from_bits((b0 >> 4) & 0x0F).ok_or(MediaError::InvalidFlvTag)?;
        let legacy = VideoCodec::from_id(b0 & 0x0F);
        let codec = legacy.map(|c| c.codec_id()).unwrap_or(CodecId::OtherVideo);

        if frame_type == VideoFrameType::VideoInfoFrame {
            return Ok(Self {
                codec,
                frame_type,
                packet: VideoPacket::Other,
            });
        }

        if !legacy.map(|c| c.has_packet_type()).unwrap_or(false) {
            return Ok(Self {
                codec,
                frame_type,
                packet: VideoPacket::Frame {
                    composition_time: 0,
                    data,
                },
            });
        }

        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let packet_type = data.get_u8();
        let composition_time = read_si24(&mut data);
        let packet = match packet_type {
            0 => VideoPacket::SequenceHeader(data),
            1 => VideoPacket::Frame {
                composition_time,
                data,
            },
            2 => VideoPacket::EndOfSequence,
            _ => return Err(MediaError::InvalidAvcPacket.into()),
        };
        Ok(Self {
            codec,
            frame_type,
            packet,
        })
    }

    fn parse_enhanced(b0: u8, mut data: Bytes) -> Result<Self> {
        let frame_type =
            VideoFrameType::from_bits((b0 >> 4) & 0x07).ok_or(MediaError::InvalidFlvTag)?;
        let packet_type = b0 & 0x0F;
        if data.len() < 4 {
            return Err(MediaError::InvalidFlvTag.into());
        }
        let fourcc = data.split_to(4);
        let codec = video_fourcc(&fourcc);

        let packet = if frame_type == VideoFrameType::VideoInfoFrame {
            VideoPacket::Other
        } else {
            match packet_type {
                0 => VideoPacket::SequenceHeader(data),
                // CodedFrames: avc1/hvc1 carry a composition time
                1 if matches!(codec, CodecId::H264 | CodecId::H265) => {
                    if data.len() < 3 {
                        return Err(MediaError::InvalidFlvTag.into());
                    }
                    let composition_time = read_si24(&mut data);
                    VideoPacket::Frame {
                        composition_time,
                        data,
                    }
                }
                // CodedFramesX or codecs without composition time
                1 | 3 => VideoPacket::Frame {
                    composition_time: 0,
                    data,
                },
                2 => VideoPacket::EndOfSequence,
                _ => VideoPacket::Other,
            }
        };
        Ok(Self {
            codec,
            frame_type,
            packet,
        })
    }

    pub fn is_keyframe(&self) -> bool {
        self.frame_type.is_keyframe() && matches!(self.packet, VideoPacket::Frame { .. })
    }

    pub fn is_sequence_header(&self) -> bool {
        matches!(self.packet, VideoPacket::SequenceHeader(_))
    }
}

/// Audio body after header parsing
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPacket {
    /// AudioSpecificConfig, OpusHead and the like
    SequenceHeader(Bytes),
    Frame(Bytes),
    EndOfSequence,
    Other,
}

/// Parsed audio message
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTag {
    pub codec: CodecId,
    /// From the legacy header; real rates come from the sequence header
    pub sample_rate: u32,
    pub channels: u8,
    pub packet: AudioPacket,
}

impl AudioTag {
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(MediaError::InvalidFlvTag.into());
        }
        let b0 = data.get_u8();
        let format = AudioFormat::from_byte(b0).ok_or(MediaError::InvalidFlvTag)?;

        if format == AudioFormat::ExHeader {
            if data.len() < 4 {
                return Err(MediaError::InvalidFlvTag.into());
            }
            let fourcc = data.split_to(4);
            let codec = audio_fourcc(&fourcc);
            let packet = match b0 & 0x0F {
                0 => AudioPacket::SequenceHeader(data),
                1 => AudioPacket::Frame(data),
                2 => AudioPacket::EndOfSequence,
                _ => AudioPacket::Other,
            };
            let (sample_rate, channels) = match codec {
                CodecId::Opus => (48_000, 2),
                _ => (44_100, 2),
            };
            return Ok(Self {
                codec,
                sample_rate,
                channels,
                packet,
            });
        }

        let codec = format.codec_id();
        let channels = (b0 & 0x01) + 1;
        let sample_rate = match codec {
            // G.711 is always 8 kHz mono regardless of the header bits
            CodecId::Pcma | CodecId::Pcmu => 8000,
            _ => legacy_sample_rate(b0),
        };
        let channels = if matches!(codec, CodecId::Pcma | CodecId::Pcmu) {
            1
        } else {
            channels
        };

        let packet = if format == AudioFormat::Aac {
            if data.is_empty() {
                return Err(MediaError::InvalidAacPacket.into());
            }
            match data.get_u8() {
                0 => AudioPacket::SequenceHeader(data),
                1 => AudioPacket::Frame(data),
                _ => return Err(MediaError::InvalidAacPacket.into()),
            }
        } else {
            AudioPacket::Frame(data)
        };

        Ok(Self {
            codec,
            sample_rate,
            channels,
            packet,
        })
    }

    pub fn is_sequence_header(&self) -> bool {
        matches!(self.packet, AudioPacket::SequenceHeader(_))
    }
}

fn read_si24(data: &mut Bytes) -> i32 {
    let raw = ((data.get_u8() as i32) << 16) | ((data.get_u8() as i32) << 8) | data.get_u8() as i32;
    // Sign extend from 24 bits
    if raw & 0x80_0000 != 0 {
        raw | !0xFF_FFFF
    } else {
        raw
    }
}
