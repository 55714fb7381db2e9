//! RTMP wire protocol, client side
//!
//! ```text
//!   TCP ──► handshake ──► ChunkDecoder ──► RawMessage ──► RtmpMessage
//!                                                            │
//!   TCP ◄──────────────── ChunkEncoder ◄── RawMessage ◄──────┘
//! ```

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use handshake::ClientHandshake;
pub use message::{Command, DataMessage, RtmpMessage, UserControlEvent};
