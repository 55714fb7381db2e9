//! RTMP client connection
//!
//! Owns the socket and the chunk codecs. Protocol control traffic
//! (chunk size, acknowledgements, pings, aggregates) is handled here so that
//! callers only ever see commands, data and media messages.
//!
//! Every outbound message is encoded into an outbox first and written from
//! there, so a `read_message` future dropped mid-write resumes the remaining
//! bytes on the next call instead of leaving a torn chunk on the wire.
//!
//! ```text
//! connect():  TCP ─► handshake ─► SetChunkSize ─► connect ─► _result
//! play():     createStream ─► _result(stream id) ─► play ─► SetBufferLength
//! ```

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::amf::AmfValue;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::{ChunkDecoder, ChunkEncoder, ClientHandshake, Command, RtmpMessage, UserControlEvent};

use super::config::{ClientConfig, RtmpUrl};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Connected RTMP client session
pub struct RtmpConnector<S = TcpStream> {
    io: S,
    config: ClientConfig,
    url: RtmpUrl,
    read_buf: BytesMut,
    outbox: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    pending: VecDeque<RtmpMessage>,
    bytes_received: u64,
    last_ack: u64,
    window_ack_size: u32,
    transaction_id: f64,
    stream_id: u32,
}

impl RtmpConnector<TcpStream> {
    /// Dial, handshake and `connect` to the application
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let url = config.parse_url()?;
        let socket = timeout(config.dial_timeout, TcpStream::connect(url.addr()))
            .await
            .map_err(|_| Error::Timeout("dial"))??;
        socket.set_nodelay(true)?;

        Self::establish(socket, config).await
    }
}

impl<S> RtmpConnector<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run handshake and `connect` over an already open transport
    pub async fn establish(mut io: S, config: ClientConfig) -> Result<Self> {
        let url = config.parse_url()?;

        timeout(config.read_write_timeout, ClientHandshake::new().perform(&mut io))
            .await
            .map_err(|_| Error::Timeout("handshake"))??;

        let mut conn = Self {
            io,
            url,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            outbox: BytesMut::new(),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            pending: VecDeque::new(),
            bytes_received: 0,
            last_ack: 0,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            transaction_id: 0.0,
            stream_id: 0,
            config,
        };

        let chunk_size = conn.config.chunk_size;
        conn.send(RtmpMessage::SetChunkSize(chunk_size)).await?;
        conn.encoder.set_chunk_size(chunk_size);

        conn.connect_app().await?;
        Ok(conn)
    }

    pub fn url(&self) -> &RtmpUrl {
        &self.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    fn next_transaction(&mut self) -> f64 {
        self.transaction_id += 1.0;
        self.transaction_id
    }

    async fn connect_app(&mut self) -> Result<()> {
        let tx = self.next_transaction();
        let object = AmfValue::object([
            ("app", AmfValue::from(self.url.app.as_str())),
            ("flashVer", AmfValue::from(self.config.flash_ver.as_str())),
            ("tcUrl", AmfValue::from(self.url.tc_url())),
            ("fpad", AmfValue::from(false)),
            ("capabilities", AmfValue::from(15.0)),
            ("audioCodecs", AmfValue::from(3575.0)),
            ("videoCodecs", AmfValue::from(252.0)),
            ("videoFunction", AmfValue::from(1.0)),
            ("objectEncoding", AmfValue::from(0.0)),
        ]);
        self.send(RtmpMessage::Command(Command::new(CMD_CONNECT, tx, object)))
            .await?;
        self.await_result(CMD_CONNECT, tx).await?;

        tracing::debug!(app = %self.url.app, tc_url = %self.url.tc_url(), "RTMP connected");
        Ok(())
    }

    /// `createStream` + `play` the stream named in the URL
    pub async fn play(&mut self) -> Result<u32> {
        let tx = self.next_transaction();
        self.send(RtmpMessage::Command(Command::new(
            CMD_CREATE_STREAM,
            tx,
            AmfValue::Null,
        )))
        .await?;
        let result = self.await_result(CMD_CREATE_STREAM, tx).await?;
        let stream_id = result
            .arguments
            .iter()
            .find_map(AmfValue::as_number)
            .ok_or(ProtocolError::MalformedMessage("createStream result"))?
            as u32;
        self.stream_id = stream_id;

        let tx = self.next_transaction();
        let play = Command::new(CMD_PLAY, tx, AmfValue::Null)
            .with_args(vec![
                AmfValue::from(self.url.stream.as_str()),
                AmfValue::Number(-2.0),
            ])
            .on_stream(stream_id);
        self.send(RtmpMessage::Command(play)).await?;

        let buffer_ms = self.config.buffer_length_ms;
        self.send(RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
            stream_id,
            buffer_ms,
        }))
        .await?;

        tracing::debug!(stream = %self.url.stream, stream_id, "RTMP play requested");
        Ok(stream_id)
    }

    async fn await_result(&mut self, command: &str, tx: f64) -> Result<Command> {
        loop {
            match self.read_message().await? {
                RtmpMessage::Command(cmd) if cmd.transaction_id == tx => {
                    if cmd.name == CMD_RESULT {
                        return Ok(cmd);
                    }
                    if cmd.name == CMD_ERROR {
                        let description = cmd
                            .info()
                            .and_then(|i| i.get_string("description").or(i.get_string("code")))
                            .unwrap_or_default()
                            .to_string();
                        return Err(ProtocolError::CommandRejected {
                            command: command.to_string(),
                            description,
                        }
                        .into());
                    }
                }
                other => {
                    tracing::trace!(msg = ?other, "Ignoring message while awaiting {}", command);
                }
            }
        }
    }

    /// Next command, data, user control or media message
    pub async fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            self.flush_outbox().await?;
            if let Some(msg) = self.pending.pop_front() {
                return Ok(msg);
            }

            let Some(raw) = self.decoder.decode(&mut self.read_buf)? else {
                self.fill().await?;
                continue;
            };

            let msg = RtmpMessage::parse(&raw)?;
            if self.config.debug {
                tracing::debug!(type_id = raw.type_id, len = raw.payload.len(), "RTMP message");
            }

            match msg {
                RtmpMessage::SetChunkSize(size) => self.decoder.set_chunk_size(size)?,
                RtmpMessage::Abort(csid) => self.decoder.abort(csid),
                RtmpMessage::WindowAckSize(size) => self.window_ack_size = size,
                RtmpMessage::UserControl(UserControlEvent::PingRequest(ts)) => {
                    self.queue(RtmpMessage::UserControl(UserControlEvent::PingResponse(ts)))
                }
                RtmpMessage::Acknowledgement(_) | RtmpMessage::SetPeerBandwidth { .. } => {}
                RtmpMessage::Aggregate(msgs) => self.pending.extend(msgs),
                other => return Ok(other),
            }
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.read_buf.reserve(READ_BUFFER_SIZE);
        let n = timeout(
            self.config.read_write_timeout,
            self.io.read_buf(&mut self.read_buf),
        )
        .await
        .map_err(|_| Error::Timeout("read"))??;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed.into());
        }

        self.bytes_received += n as u64;
        if self.window_ack_size > 0
            && self.bytes_received - self.last_ack >= self.window_ack_size as u64
        {
            self.last_ack = self.bytes_received;
            let seq = self.bytes_received as u32;
            self.queue(RtmpMessage::Acknowledgement(seq));
        }
        Ok(())
    }

    pub async fn send(&mut self, msg: RtmpMessage) -> Result<()> {
        self.queue(msg);
        self.flush_outbox().await
    }

    fn queue(&mut self, msg: RtmpMessage) {
        let bytes = self.encoder.encode(&msg.to_raw());
        self.outbox.extend_from_slice(&bytes);
    }

    /// Write out queued bytes; only completed writes are consumed
    async fn flush_outbox(&mut self) -> Result<()> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        while !self.outbox.is_empty() {
            let n = timeout(self.config.read_write_timeout, self.io.write(&self.outbox))
                .await
                .map_err(|_| Error::Timeout("write"))??;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            self.outbox.advance(n);
        }
        timeout(self.config.read_write_timeout, self.io.flush())
            .await
            .map_err(|_| Error::Timeout("write"))??;
        Ok(())
    }
}
