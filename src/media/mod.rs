//! Media model and RTMP payload parsing
//!
//! - FLV audio/video tag bodies, legacy and enhanced (FourCC) headers
//! - H.264 decoder configuration and AVCC to Annex-B conversion
//! - AAC AudioSpecificConfig
//! - Codec descriptors and the packets handed to viewers

pub mod aac;
pub mod codec;
pub mod flv;
pub mod h264;
pub mod packet;

pub use aac::AudioSpecificConfig;
pub use codec::{is_audio_only, CodecDescriptor, CodecId, MediaKind};
pub use flv::{AudioPacket, AudioTag, VideoPacket, VideoTag};
pub use h264::{avcc_to_annexb, AvcConfig};
pub use packet::MediaPacket;
