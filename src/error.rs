//! Error types
//!
//! A single crate-wide [`Error`] with one sub-error per concern. Terminal
//! worker conditions ("no video", "no viewer") are not errors; see
//! [`crate::engine::WorkerExit`].

use thiserror::Error;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("cannot get active streams: {0}")]
    Catalog(String),

    #[error("stream codec not found: {0}")]
    CodecNotFound(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("no track of stream {0} is supported by the transport")]
    NoSupportedTracks(String),

    #[error("invalid source url: {0}")]
    InvalidUrl(String),
}

/// RTMP handshake failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("unsupported RTMP version {0}")]
    InvalidVersion(u8),
    #[error("peer closed the connection during handshake")]
    UnexpectedEof,
}

/// RTMP chunk/message level failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("chunk references unknown chunk stream {0} without a full header")]
    MissingChunkHeader(u32),
    #[error("message of {0} bytes exceeds the allowed maximum")]
    MessageTooLarge(u32),
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),
    #[error("malformed {0} message")]
    MalformedMessage(&'static str),
    #[error("server rejected {command}: {description}")]
    CommandRejected { command: String, description: String },
    #[error("play failed: {0}")]
    PlayFailed(String),
    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// AMF0 decoding failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmfError {
    #[error("unexpected end of AMF data")]
    UnexpectedEof,
    #[error("unknown AMF0 marker 0x{0:02x}")]
    UnknownMarker(u8),
    #[error("invalid object end marker")]
    InvalidObjectEnd,
    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8,
    #[error("invalid AMF reference {0}")]
    InvalidReference(u16),
    #[error("AMF nesting too deep")]
    NestingTooDeep,
}

/// Media payload parsing failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("invalid AVC packet")]
    InvalidAvcPacket,
    #[error("invalid AAC packet")]
    InvalidAacPacket,
    #[error("invalid FLV tag")]
    InvalidFlvTag,
}

/// Outbound transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid session offer: {0}")]
    InvalidOffer(String),
    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),
    #[error("session closed")]
    Closed,
}
