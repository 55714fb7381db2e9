//! RTMP play client
//!
//! Pulls a live stream from a remote RTMP server:
//! - [`RtmpConnector`] speaks the wire protocol (handshake, connect, play)
//! - [`RtmpPuller`] demuxes the media and tracks the stream's codecs

pub mod config;
pub mod connector;
mod demux;
pub mod puller;

#[cfg(test)]
pub(crate) mod fake_server;

pub use config::{ClientConfig, RtmpUrl};
pub use connector::RtmpConnector;
pub use puller::{ClientEvent, RtmpPuller};
