//! In-memory RTMP server used by client tests

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::amf::AmfValue;
use crate::protocol::constants::*;
use crate::protocol::{ChunkDecoder, ChunkEncoder, Command, RtmpMessage};

pub(crate) struct FakeServer {
    io: DuplexStream,
    buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
}

impl FakeServer {
    /// Server side of the simple handshake
    pub async fn accept(mut io: DuplexStream) -> Self {
        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        io.read_exact(&mut c0c1).await.unwrap();

        let mut reply = vec![RTMP_VERSION];
        reply.extend((0..HANDSHAKE_SIZE).map(|i| (i % 199) as u8));
        reply.extend_from_slice(&c0c1[1..]);
        io.write_all(&reply).await.unwrap();

        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        io.read_exact(&mut c2).await.unwrap();

        Self {
            io,
            buf: BytesMut::new(),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
        }
    }

    /// Handshake, answer connect/createStream and start playing
    pub async fn accept_play(io: DuplexStream) -> (Self, String) {
        let mut server = Self::accept(io).await;
        let connect = server.expect_command(CMD_CONNECT).await;
        server.reply_result(&connect, vec![]).await;
        let create = server.expect_command(CMD_CREATE_STREAM).await;
        server.reply_result(&create, vec![AmfValue::Number(1.0)]).await;
        let play = server.expect_command(CMD_PLAY).await;
        let name = play.arguments[0].as_str().unwrap_or_default().to_string();
        server.status(NS_PLAY_START).await;
        (server, name)
    }

    /// Next client message; applies the client's chunk size
    pub async fn recv(&mut self) -> RtmpMessage {
        loop {
            if let Some(raw) = self.decoder.decode(&mut self.buf).unwrap() {
                let msg = RtmpMessage::parse(&raw).unwrap();
                if let RtmpMessage::SetChunkSize(size) = msg {
                    self.decoder.set_chunk_size(size).unwrap();
                }
                return msg;
            }
            let n = self.io.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "client hung up");
        }
    }

    pub async fn expect_command(&mut self, name: &str) -> Command {
        loop {
            if let RtmpMessage::Command(cmd) = self.recv().await {
                if cmd.name == name {
                    return cmd;
                }
            }
        }
    }

    pub async fn reply_result(&mut self, to: &Command, args: Vec<AmfValue>) {
        let result = Command::new(CMD_RESULT, to.transaction_id, AmfValue::Null).with_args(args);
        self.send(RtmpMessage::Command(result)).await;
    }

    pub async fn status(&mut self, code: &str) {
        let status = Command::new(CMD_ON_STATUS, 0.0, AmfValue::Null)
            .with_args(vec![AmfValue::object([("level", "status"), ("code", code)])])
            .on_stream(1);
        self.send(RtmpMessage::Command(status)).await;
    }

    pub async fn set_chunk_size(&mut self, size: u32) {
        self.send(RtmpMessage::SetChunkSize(size)).await;
        self.encoder.set_chunk_size(size);
    }

    pub async fn send(&mut self, msg: RtmpMessage) {
        let bytes = self.encoder.encode(&msg.to_raw());
        // Peer may already be gone in teardown tests
        let _ = self.io.write_all(&bytes).await;
    }

    pub async fn video(&mut self, timestamp: u32, data: &[u8]) {
        self.send(RtmpMessage::Video {
            timestamp,
            data: Bytes::copy_from_slice(data),
        })
        .await;
    }

    pub async fn audio(&mut self, timestamp: u32, data: &[u8]) {
        self.send(RtmpMessage::Audio {
            timestamp,
            data: Bytes::copy_from_slice(data),
        })
        .await;
    }

    /// Keep the connection open without sending anything
    pub async fn hold(self) {
        let _io = self.io;
        std::future::pending::<()>().await;
    }
}

/// FLV body of an AVC sequence header (High 3.1, one SPS, one PPS)
pub(crate) const AVC_SEQUENCE_HEADER: &[u8] = &[
    0x17, 0x00, 0x00, 0x00, 0x00, // keyframe, AVC, sequence header, ct 0
    0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00, 0x03,
    0x68, 0xEF, 0x38,
];

/// FLV body of an AVC keyframe holding one IDR slice
pub(crate) const AVC_KEYFRAME: &[u8] = &[
    0x17, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84,
];

/// FLV body of an AVC inter frame
pub(crate) const AVC_INTER_FRAME: &[u8] = &[
    0x27, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x41, 0x9A,
];

/// FLV body of a G.711 A-law frame
pub(crate) const PCMA_FRAME: &[u8] = &[0x72, 0xD5, 0xD5, 0xD5, 0xD5];
