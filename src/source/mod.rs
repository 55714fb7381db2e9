//! Upstream sources
//!
//! The engine never dials anything itself. It asks a [`SourceCatalog`] which
//! streams should exist and a [`SourceDialer`] for a live
//! [`SourceConnection`] to each of them. [`RtmpDialer`] is the stock dialer.

pub mod rtmp;

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::client::ClientEvent;
use crate::error::Result;
use crate::media::{CodecDescriptor, MediaPacket};
use crate::registry::StreamOptions;

pub use rtmp::RtmpDialer;

/// Authoritative list of source identifiers that should be live
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn list_active_source_ids(&self) -> Result<Vec<String>>;
}

/// Everything a dialer needs to open one source
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub stream: String,
    pub url: String,
    pub options: StreamOptions,
    pub dial_timeout: Duration,
    pub read_write_timeout: Duration,
    /// Budget for collecting the initial codec list
    pub probe_timeout: Duration,
}

/// Opens connections to upstream sources
#[async_trait]
pub trait SourceDialer: Send + Sync {
    async fn dial(&self, request: &DialRequest) -> Result<Box<dyn SourceConnection>>;
}

/// What a live connection yields
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Packet(MediaPacket),
    /// The source renegotiated; carries the complete new codec list
    CodecUpdate(Vec<CodecDescriptor>),
    /// Transport-level end of stream
    Disconnected(String),
}

impl From<ClientEvent> for SourceEvent {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::Packet(packet) => SourceEvent::Packet(packet),
            ClientEvent::CodecUpdate(codecs) => SourceEvent::CodecUpdate(codecs),
            ClientEvent::Disconnected(reason) => SourceEvent::Disconnected(reason),
        }
    }
}

/// One established upstream session
#[async_trait]
pub trait SourceConnection: Send {
    /// Codec list reported by the handshake
    fn codecs(&self) -> Vec<CodecDescriptor>;

    async fn next_event(&mut self) -> Result<SourceEvent>;
}

/// Fixed, replaceable list of source ids
#[derive(Debug, Default)]
pub struct StaticCatalog {
    ids: RwLock<Vec<String>>,
}

impl StaticCatalog {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: RwLock::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn set<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.ids.write() = ids.into_iter().map(Into::into).collect();
    }
}

#[async_trait]
impl SourceCatalog for StaticCatalog {
    async fn list_active_source_ids(&self) -> Result<Vec<String>> {
        Ok(self.ids.read().clone())
    }
}
