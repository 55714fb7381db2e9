//! Media packets handed from ingestion to viewers

use std::time::Duration;

use bytes::Bytes;

/// One demuxed access unit
///
/// Immutable once produced; cloning only bumps the payload's refcount, so the
/// same packet can sit in many viewer queues at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// Index into the stream's codec list
    pub stream_index: usize,
    pub is_keyframe: bool,
    /// Decode timestamp since the start of the upstream session
    pub timestamp: Duration,
    /// Presentation offset in milliseconds (B-frames)
    pub composition_time: i32,
    /// AVCC NAL units for H.264, raw frames for audio
    pub data: Bytes,
}

impl MediaPacket {
    pub fn new(stream_index: usize, timestamp_ms: u32, data: Bytes) -> Self {
        Self {
            stream_index,
            is_keyframe: false,
            timestamp: Duration::from_millis(timestamp_ms as u64),
            composition_time: 0,
            data,
        }
    }

    pub fn keyframe(mut self, is_keyframe: bool) -> Self {
        self.is_keyframe = is_keyframe;
        self
    }

    pub fn with_composition_time(mut self, composition_time: i32) -> Self {
        self.composition_time = composition_time;
        self
    }
}
