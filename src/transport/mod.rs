//! Outbound real-time transport
//!
//! The engine negotiates one session per viewer through a
//! [`TransportFactory`] and then pushes packets into the returned
//! [`ViewerSink`]. [`WebRtcTransport`] is the browser-facing implementation.

pub mod tracks;
pub mod webrtc;

use async_trait::async_trait;

use crate::error::Result;
use crate::media::MediaPacket;

pub use self::tracks::{is_supported, select_tracks, SelectedTrack, TrackSelection};
pub use self::webrtc::WebRtcTransport;

/// ICE servers, credentials and local UDP port range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceConfig {
    pub servers: Vec<String>,
    pub username: String,
    pub credential: String,
    /// Zero for both bounds lets the OS pick ports
    pub port_min: u16,
    pub port_max: u16,
}

impl IceConfig {
    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = username.into();
        self.credential = credential.into();
        self
    }

    pub fn port_range(mut self, min: u16, max: u16) -> Self {
        self.port_min = min;
        self.port_max = max;
        self
    }

    /// A usable port range was configured
    pub fn has_port_range(&self) -> bool {
        self.port_min > 0 && self.port_max >= self.port_min
    }
}

/// Offer/answer input for one viewer
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest<'a> {
    pub stream: &'a str,
    pub viewer: uuid::Uuid,
    /// Plain SDP offer
    pub offer_sdp: &'a str,
    pub tracks: &'a TrackSelection,
    pub ice: &'a IceConfig,
}

/// A negotiated session
pub struct Negotiated {
    /// Plain SDP answer
    pub answer_sdp: String,
    pub sink: Box<dyn ViewerSink>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("answer_sdp", &self.answer_sdp)
            .finish_non_exhaustive()
    }
}

/// Creates outbound sessions
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn negotiate(&self, request: SessionRequest<'_>) -> Result<Negotiated>;
}

/// Write side of one viewer's session
#[async_trait]
pub trait ViewerSink: Send {
    /// Write one packet; packets of unselected tracks are ignored
    async fn write_packet(&mut self, packet: &MediaPacket) -> Result<()>;

    async fn close(&mut self);
}
