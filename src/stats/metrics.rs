//! Per-stream counters
//!
//! Counters are plain atomics so the ingestion worker and the fan-out can
//! bump them without taking the registry lock for writing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Live counters for one stream entry
#[derive(Debug)]
pub struct StreamMetrics {
    created_at: Instant,
    bytes_received: AtomicU64,
    video_packets: AtomicU64,
    audio_packets: AtomicU64,
    keyframes: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    codec_updates: AtomicU64,
    connect_attempts: AtomicU64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            bytes_received: AtomicU64::new(0),
            video_packets: AtomicU64::new(0),
            audio_packets: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            codec_updates: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
        }
    }

    pub fn record_packet(&self, bytes: usize, is_video: bool, is_keyframe: bool) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        if is_video {
            self.video_packets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.audio_packets.fetch_add(1, Ordering::Relaxed);
        }
        if is_keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fanout(&self, delivered: usize, dropped: usize) {
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn record_codec_update(&self) {
        self.codec_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, viewers: usize) -> StreamStats {
        StreamStats {
            uptime: self.created_at.elapsed(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            video_packets: self.video_packets.load(Ordering::Relaxed),
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            codec_updates: self.codec_updates.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            viewers,
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a stream's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Time since the registry entry was created
    pub uptime: Duration,
    pub bytes_received: u64,
    pub video_packets: u64,
    pub audio_packets: u64,
    pub keyframes: u64,
    /// Packets placed in viewer queues
    pub delivered: u64,
    /// Packets discarded because a viewer queue was full
    pub dropped: u64,
    pub codec_updates: u64,
    pub connect_attempts: u64,
    pub viewers: usize,
}

impl StreamStats {
    /// Average ingest bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}
