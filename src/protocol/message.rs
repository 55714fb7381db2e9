//! RTMP message model
//!
//! Converts reassembled chunk stream messages into typed messages and back.
//! Only the messages a play client sends or reacts to are modelled; anything
//! else surfaces as [`RtmpMessage::Unknown`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// AMF command (`connect`, `_result`, `onStatus`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    pub stream_id: u32,
}

impl Command {
    pub fn new(name: &str, transaction_id: f64, command_object: AmfValue) -> Self {
        Self {
            name: name.to_string(),
            transaction_id,
            command_object,
            arguments: Vec::new(),
            stream_id: 0,
        }
    }

    pub fn with_args(mut self, args: Vec<AmfValue>) -> Self {
        self.arguments = args;
        self
    }

    pub fn on_stream(mut self, stream_id: u32) -> Self {
        self.stream_id = stream_id;
        self
    }

    /// The info object of `onStatus`/`_error`: first argument that is an object
    pub fn info(&self) -> Option<&AmfValue> {
        self.arguments.iter().find(|a| a.as_object().is_some())
    }

    /// `code` field of the info object
    pub fn status_code(&self) -> Option<&str> {
        self.info()?.get_string("code")
    }
}

/// Data message (`onMetaData`, `@setDataFrame`)
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<AmfValue>,
    pub stream_id: u32,
}

/// User control event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown(u16),
}

/// Typed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
    Command(Command),
    Data(DataMessage),
    /// Sub-messages of an aggregate, timestamps already rebased
    Aggregate(Vec<RtmpMessage>),
    Unknown { type_id: u8, payload: Bytes },
}

impl RtmpMessage {
    /// Parse a reassembled message
    pub fn parse(raw: &RawMessage) -> Result<Self> {
        let mut p = raw.payload.clone();
        let msg = match raw.type_id {
            MSG_SET_CHUNK_SIZE => RtmpMessage::SetChunkSize(read_u32(&mut p)? & 0x7FFF_FFFF),
            MSG_ABORT => RtmpMessage::Abort(read_u32(&mut p)?),
            MSG_ACKNOWLEDGEMENT => RtmpMessage::Acknowledgement(read_u32(&mut p)?),
            MSG_WINDOW_ACK_SIZE => RtmpMessage::WindowAckSize(read_u32(&mut p)?),
            MSG_SET_PEER_BANDWIDTH => {
                let size = read_u32(&mut p)?;
                let limit_type = if p.has_remaining() { p.get_u8() } else { 2 };
                RtmpMessage::SetPeerBandwidth { size, limit_type }
            }
            MSG_USER_CONTROL => RtmpMessage::UserControl(parse_user_control(&mut p)?),
            MSG_AUDIO => RtmpMessage::Audio {
                timestamp: raw.timestamp,
                data: p,
            },
            MSG_VIDEO => RtmpMessage::Video {
                timestamp: raw.timestamp,
                data: p,
            },
            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                if raw.type_id == MSG_COMMAND_AMF3 && p.has_remaining() {
                    p.advance(1);
                }
                RtmpMessage::Command(parse_command(&mut p, raw.stream_id)?)
            }
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                if raw.type_id == MSG_DATA_AMF3 && p.has_remaining() {
                    p.advance(1);
                }
                RtmpMessage::Data(parse_data(&mut p, raw.stream_id)?)
            }
            MSG_AGGREGATE => RtmpMessage::Aggregate(parse_aggregate(p, raw)?),
            type_id => RtmpMessage::Unknown {
                type_id,
                payload: p,
            },
        };
        Ok(msg)
    }

    /// Encode for sending; picks the chunk stream by message class
    pub fn to_raw(&self) -> RawMessage {
        let mut buf = BytesMut::new();
        let (csid, type_id, stream_id, timestamp) = match self {
            RtmpMessage::SetChunkSize(size) => {
                buf.put_u32(*size & 0x7FFF_FFFF);
                (CSID_PROTOCOL_CONTROL, MSG_SET_CHUNK_SIZE, 0, 0)
            }
            RtmpMessage::Abort(csid) => {
                buf.put_u32(*csid);
                (CSID_PROTOCOL_CONTROL, MSG_ABORT, 0, 0)
            }
            RtmpMessage::Acknowledgement(seq) => {
                buf.put_u32(*seq);
                (CSID_PROTOCOL_CONTROL, MSG_ACKNOWLEDGEMENT, 0, 0)
            }
            RtmpMessage::WindowAckSize(size) => {
                buf.put_u32(*size);
                (CSID_PROTOCOL_CONTROL, MSG_WINDOW_ACK_SIZE, 0, 0)
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (CSID_PROTOCOL_CONTROL, MSG_SET_PEER_BANDWIDTH, 0, 0)
            }
            RtmpMessage::UserControl(event) => {
                encode_user_control(&mut buf, event);
                (CSID_PROTOCOL_CONTROL, MSG_USER_CONTROL, 0, 0)
            }
            RtmpMessage::Audio { timestamp, data } => {
                buf.put_slice(data);
                (CSID_PLAY, MSG_AUDIO, 1, *timestamp)
            }
            RtmpMessage::Video { timestamp, data } => {
                buf.put_slice(data);
                (CSID_PLAY, MSG_VIDEO, 1, *timestamp)
            }
            RtmpMessage::Command(cmd) => {
                let mut enc = Amf0Encoder::new();
                enc.encode(&AmfValue::from(cmd.name.as_str()));
                enc.encode(&AmfValue::Number(cmd.transaction_id));
                enc.encode(&cmd.command_object);
                enc.encode_all(&cmd.arguments);
                buf.put_slice(&enc.finish());
                let csid = if cmd.stream_id == 0 {
                    CSID_COMMAND
                } else {
                    CSID_PLAY
                };
                (csid, MSG_COMMAND_AMF0, cmd.stream_id, 0)
            }
            RtmpMessage::Data(data) => {
                let mut enc = Amf0Encoder::new();
                enc.encode(&AmfValue::from(data.name.as_str()));
                enc.encode_all(&data.values);
                buf.put_slice(&enc.finish());
                (CSID_PLAY, MSG_DATA_AMF0, data.stream_id, 0)
            }
            RtmpMessage::Aggregate(_) => (CSID_PLAY, MSG_AGGREGATE, 1, 0),
            RtmpMessage::Unknown { type_id, payload } => {
                buf.put_slice(payload);
                (CSID_COMMAND, *type_id, 0, 0)
            }
        };
        RawMessage {
            csid,
            type_id,
            stream_id,
            timestamp,
            payload: buf.freeze(),
        }
    }
}

fn read_u32(p: &mut Bytes) -> Result<u32> {
    if p.remaining() < 4 {
        return Err(ProtocolError::MalformedMessage("truncated control message").into());
    }
    Ok(p.get_u32())
}

fn parse_user_control(p: &mut Bytes) -> Result<UserControlEvent> {
    if p.remaining() < 2 {
        return Err(ProtocolError::MalformedMessage("truncated user control").into());
    }
    let event = p.get_u16();
    let value = if p.remaining() >= 4 { p.get_u32() } else { 0 };
    Ok(match event {
        UC_STREAM_BEGIN => UserControlEvent::StreamBegin(value),
        UC_STREAM_EOF => UserControlEvent::StreamEof(value),
        UC_STREAM_DRY => UserControlEvent::StreamDry(value),
        UC_SET_BUFFER_LENGTH => UserControlEvent::SetBufferLength {
            stream_id: value,
            buffer_ms: read_u32(p)?,
        },
        UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(value),
        UC_PING_REQUEST => UserControlEvent::PingRequest(value),
        UC_PING_RESPONSE => UserControlEvent::PingResponse(value),
        other => UserControlEvent::Unknown(other),
    })
}

fn encode_user_control(buf: &mut BytesMut, event: &UserControlEvent) {
    match *event {
        UserControlEvent::StreamBegin(id) => {
            buf.put_u16(UC_STREAM_BEGIN);
            buf.put_u32(id);
        }
        UserControlEvent::StreamEof(id) => {
            buf.put_u16(UC_STREAM_EOF);
            buf.put_u32(id);
        }
        UserControlEvent::StreamDry(id) => {
            buf.put_u16(UC_STREAM_DRY);
            buf.put_u32(id);
        }
        UserControlEvent::SetBufferLength {
            stream_id,
            buffer_ms,
        } => {
            buf.put_u16(UC_SET_BUFFER_LENGTH);
            buf.put_u32(stream_id);
            buf.put_u32(buffer_ms);
        }
        UserControlEvent::StreamIsRecorded(id) => {
            buf.put_u16(UC_STREAM_IS_RECORDED);
            buf.put_u32(id);
        }
        UserControlEvent::PingRequest(ts) => {
            buf.put_u16(UC_PING_REQUEST);
            buf.put_u32(ts);
        }
        UserControlEvent::PingResponse(ts) => {
            buf.put_u16(UC_PING_RESPONSE);
            buf.put_u32(ts);
        }
        UserControlEvent::Unknown(event) => buf.put_u16(event),
    }
}

fn parse_command(p: &mut Bytes, stream_id: u32) -> Result<Command> {
    let mut dec = Amf0Decoder::new();
    let name = dec
        .decode(p)?
        .as_str()
        .map(str::to_string)
        .ok_or(ProtocolError::MalformedMessage("command name is not a string"))?;
    let transaction_id = if p.has_remaining() {
        dec.decode(p)?.as_number().unwrap_or(0.0)
    } else {
        0.0
    };
    let command_object = if p.has_remaining() {
        dec.decode(p)?
    } else {
        AmfValue::Null
    };
    let arguments = dec.decode_all(p)?;
    Ok(Command {
        name,
        transaction_id,
        command_object,
        arguments,
        stream_id,
    })
}

fn parse_data(p: &mut Bytes, stream_id: u32) -> Result<DataMessage> {
    let mut values = Amf0Decoder::new().decode_all(p)?;
    let name = match values.first().and_then(AmfValue::as_str) {
        Some(name) => name.to_string(),
        None => return Err(ProtocolError::MalformedMessage("data name is not a string").into()),
    };
    values.remove(0);

    // @setDataFrame wraps the real name
    if name == CMD_SET_DATA_FRAME {
        if let Some(inner) = values.first().and_then(AmfValue::as_str).map(str::to_string) {
            values.remove(0);
            return Ok(DataMessage {
                name: inner,
                values,
                stream_id,
            });
        }
    }
    Ok(DataMessage {
        name,
        values,
        stream_id,
    })
}

/// Aggregate payload: repeated FLV tags (11-byte header, body, 4-byte back pointer)
fn parse_aggregate(mut p: Bytes, raw: &RawMessage) -> Result<Vec<RtmpMessage>> {
    let mut out = Vec::new();
    let mut base: Option<u32> = None;

    while p.remaining() >= 11 {
        let tag_type = p.get_u8();
        let size = ((p.get_u16() as usize) << 8) | p.get_u8() as usize;
        let ts_low = ((p.get_u16() as u32) << 8) | p.get_u8() as u32;
        let ts = ts_low | ((p.get_u8() as u32) << 24);
        p.advance(3);
        if p.remaining() < size {
            return Err(ProtocolError::MalformedMessage("truncated aggregate").into());
        }
        let body = p.split_to(size);
        if p.remaining() >= 4 {
            p.advance(4);
        }

        let first = *base.get_or_insert(ts);
        let timestamp = raw.timestamp.wrapping_add(ts.wrapping_sub(first));
        let sub = RawMessage {
            csid: raw.csid,
            type_id: tag_type,
            stream_id: raw.stream_id,
            timestamp,
            payload: body,
        };
        out.push(RtmpMessage::parse(&sub)?);
    }
    Ok(out)
}
