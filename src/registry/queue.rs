//! Bounded per-viewer delivery queues
//!
//! Delivery never waits: a full queue drops the packet being offered and
//! keeps everything already queued, so the viewer sees a gap rather than
//! stale data replacing fresh data.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::media::MediaPacket;

use super::store::StreamRegistry;

/// Receiving half handed to the viewer's session writer
pub type ViewerReceiver = mpsc::Receiver<MediaPacket>;

/// Outcome of offering one packet to one viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; this packet is discarded for this viewer only
    Dropped,
    /// The viewer's writer has gone away
    Closed,
}

/// Sending half kept in the registry
#[derive(Debug, Clone)]
pub struct ViewerQueue {
    tx: mpsc::Sender<MediaPacket>,
}

impl ViewerQueue {
    pub fn bounded(capacity: usize) -> (Self, ViewerReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting
    pub fn offer(&self, packet: MediaPacket) -> Delivery {
        match self.tx.try_send(packet) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Keeps a viewer registered; dropping it deregisters the viewer
pub struct ViewerGuard {
    registry: Arc<StreamRegistry>,
    stream: String,
    viewer: Uuid,
}

impl ViewerGuard {
    pub(super) fn new(registry: Arc<StreamRegistry>, stream: String, viewer: Uuid) -> Self {
        Self {
            registry,
            stream,
            viewer,
        }
    }

    pub fn viewer_id(&self) -> Uuid {
        self.viewer
    }

    pub fn stream_id(&self) -> &str {
        &self.stream
    }
}

impl std::fmt::Debug for ViewerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerGuard")
            .field("stream", &self.stream)
            .field("viewer", &self.viewer)
            .finish()
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.registry.remove_viewer(&self.stream, self.viewer);
    }
}
