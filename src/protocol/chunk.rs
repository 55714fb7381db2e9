//! RTMP chunk stream codec
//!
//! Messages travel split into chunks of at most `chunk_size` payload bytes.
//! Each chunk starts with a basic header (format + chunk stream id) followed by
//! a message header whose size depends on the format:
//!
//! ```text
//! fmt 0: timestamp(3) length(3) type(1) stream_id(4, LE)   absolute
//! fmt 1: delta(3)     length(3) type(1)                    same stream
//! fmt 2: delta(3)                                          same length/type
//! fmt 3: (none)                                            continuation
//! ```
//!
//! A timestamp field of 0xFFFFFF means a 4-byte extended timestamp follows.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE};

const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// A fully reassembled RTMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub csid: u32,
    pub type_id: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
    has_header: bool,
    partial: BytesMut,
}

/// Incremental chunk decoder
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a peer `SetChunkSize`
    pub fn set_chunk_size(&mut self, size: u32) -> Result<(), ProtocolError> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size));
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Drop a partially received message (`Abort`)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial.clear();
        }
    }

    /// Consume chunks from `buf` until one message completes or data runs out
    ///
    /// Incomplete chunks are left in `buf` untouched.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>, ProtocolError> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkOutcome::NeedMore => return Ok(None),
                ChunkOutcome::Partial => continue,
                ChunkOutcome::Complete(msg) => return Ok(Some(msg)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkOutcome, ProtocolError> {
        if buf.is_empty() {
            return Ok(ChunkOutcome::NeedMore);
        }

        let fmt = buf[0] >> 6;
        let (csid, basic_len) = match buf[0] & 0x3F {
            0 if buf.len() >= 2 => (64 + buf[1] as u32, 2),
            1 if buf.len() >= 3 => (64 + buf[1] as u32 + ((buf[2] as u32) << 8), 3),
            0 | 1 => return Ok(ChunkOutcome::NeedMore),
            id => (id as u32, 1),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + header_len {
            return Ok(ChunkOutcome::NeedMore);
        }

        let state = self.streams.entry(csid).or_default();
        if fmt != 0 && !state.has_header {
            return Err(ProtocolError::MissingChunkHeader(csid));
        }

        let h = &buf[basic_len..basic_len + header_len];
        let ts_field = if fmt < 3 { read_u24(&h[0..3]) } else { 0 };
        let (length, type_id, stream_id) = match fmt {
            0 => (
                read_u24(&h[3..6]),
                h[6],
                u32::from_le_bytes([h[7], h[8], h[9], h[10]]),
            ),
            1 => (read_u24(&h[3..6]), h[6], state.stream_id),
            _ => (state.length, state.type_id, state.stream_id),
        };
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        let extended = if fmt < 3 {
            ts_field == EXTENDED_TIMESTAMP
        } else {
            state.extended
        };
        let ext_len = if extended { 4 } else { 0 };
        let prefix = basic_len + header_len + ext_len;
        if buf.len() < prefix {
            return Ok(ChunkOutcome::NeedMore);
        }

        let already = if fmt == 0 || fmt == 1 {
            0
        } else {
            state.partial.len() as u32
        };
        let body_len = (length - already.min(length)).min(self.chunk_size) as usize;
        if buf.len() < prefix + body_len {
            return Ok(ChunkOutcome::NeedMore);
        }

        // Whole chunk is available: commit header state
        let ts_value = if extended {
            let e = &buf[basic_len + header_len..prefix];
            u32::from_be_bytes([e[0], e[1], e[2], e[3]])
        } else {
            ts_field
        };
        let starts_message = state.partial.is_empty() || fmt < 2;
        if fmt < 2 {
            state.partial.clear();
        }
        match fmt {
            0 => {
                state.timestamp = ts_value;
                state.delta = 0;
            }
            1 | 2 => {
                state.delta = ts_value;
                state.timestamp = state.timestamp.wrapping_add(ts_value);
            }
            _ if starts_message && state.delta != 0 => {
                state.timestamp = state.timestamp.wrapping_add(state.delta);
            }
            _ => {}
        }
        state.length = length;
        state.type_id = type_id;
        state.stream_id = stream_id;
        state.extended = extended;
        state.has_header = true;

        buf.advance(prefix);
        let body = buf.split_to(body_len);
        state.partial.extend_from_slice(&body);

        if state.partial.len() as u32 >= state.length {
            let payload = state.partial.split().freeze();
            return Ok(ChunkOutcome::Complete(RawMessage {
                csid,
                type_id: state.type_id,
                stream_id: state.stream_id,
                timestamp: state.timestamp,
                payload,
            }));
        }
        Ok(ChunkOutcome::Partial)
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

enum ChunkOutcome {
    NeedMore,
    Partial,
    Complete(RawMessage),
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}

fn put_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        2..=63 => buf.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            buf.put_u8(fmt << 6);
            buf.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid - 64;
            buf.put_u8((fmt << 6) | 1);
            buf.put_u8(id as u8);
            buf.put_u8((id >> 8) as u8);
        }
    }
}

/// Chunk encoder for outgoing messages
///
/// Every message starts with a format 0 chunk; continuation chunks use
/// format 3.
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Takes effect for messages encoded after the `SetChunkSize` we sent
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn encode(&self, msg: &RawMessage) -> Bytes {
        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;
        let chunk_size = self.chunk_size as usize;
        let mut out = BytesMut::with_capacity(msg.payload.len() + 16);

        put_basic_header(&mut out, 0, msg.csid);
        put_u24(
            &mut out,
            if extended {
                EXTENDED_TIMESTAMP
            } else {
                msg.timestamp
            },
        );
        put_u24(&mut out, msg.payload.len() as u32);
        out.put_u8(msg.type_id);
        out.put_u32_le(msg.stream_id);
        if extended {
            out.put_u32(msg.timestamp);
        }

        let mut chunks = msg.payload.chunks(chunk_size.max(1));
        if let Some(first) = chunks.next() {
            out.put_slice(first);
        }
        for chunk in chunks {
            put_basic_header(&mut out, 3, msg.csid);
            if extended {
                out.put_u32(msg.timestamp);
            }
            out.put_slice(chunk);
        }
        out.freeze()
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}
