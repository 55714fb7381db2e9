//! RTMP stream puller
//!
//! Plays one remote stream and yields demuxed media. After `play`, a short
//! probe collects sequence headers so the caller gets a codec list up front;
//! packets read during the probe are replayed by [`RtmpPuller::next_event`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use crate::amf::AmfValue;
use crate::error::{Error, ProtocolError, Result};
use crate::media::{AudioTag, CodecDescriptor, MediaPacket, VideoTag};
use crate::protocol::constants::*;
use crate::protocol::{RtmpMessage, UserControlEvent};

use super::config::ClientConfig;
use super::connector::RtmpConnector;
use super::demux::{Demuxed, TrackDemuxer};

/// Stop waiting for an audio header after this many packets without one
const AUDIO_GRACE_PACKETS: usize = 64;

/// Upper bound on packets held back while probing
const MAX_PROBE_PACKETS: usize = 512;

/// Events from the puller
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Packet(MediaPacket),
    /// Sequence header changed after the probe
    CodecUpdate(Vec<CodecDescriptor>),
    /// Server ended the stream
    Disconnected(String),
}

/// Track presence announced by `onMetaData`
#[derive(Debug, Default, Clone, Copy)]
struct MetadataHints {
    video: Option<bool>,
    audio: Option<bool>,
}

impl MetadataHints {
    fn from_metadata(meta: &AmfValue) -> Self {
        let present = |key: &str| meta.get(key).map(|v| !matches!(v, AmfValue::Null));
        Self {
            video: present("videocodecid").or(Some(false)),
            audio: present("audiocodecid").or(Some(false)),
        }
    }
}

/// Pulls media from an RTMP server
pub struct RtmpPuller<S = TcpStream> {
    connector: RtmpConnector<S>,
    demuxer: TrackDemuxer,
    buffered: VecDeque<MediaPacket>,
    hints: Option<MetadataHints>,
    probed: bool,
    disable_audio: bool,
}

impl RtmpPuller<TcpStream> {
    /// Dial the URL in `config` and start playing
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let mut connector = RtmpConnector::connect(config).await?;
        connector.play().await?;
        Ok(Self::new(connector))
    }
}

impl<S> RtmpPuller<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connector that already issued `play`
    pub fn new(connector: RtmpConnector<S>) -> Self {
        let disable_audio = connector.config().disable_audio;
        Self {
            connector,
            demuxer: TrackDemuxer::default(),
            buffered: VecDeque::new(),
            hints: None,
            probed: false,
            disable_audio,
        }
    }

    pub fn codecs(&self) -> &[CodecDescriptor] {
        self.demuxer.codecs()
    }

    /// Read until every expected track is known or `limit` elapses
    pub async fn probe(&mut self, limit: Duration) -> Result<Vec<CodecDescriptor>> {
        let deadline = Instant::now() + limit;

        while !self.probe_complete() {
            let msg = match timeout_at(deadline, self.connector.read_message()).await {
                Ok(msg) => msg?,
                Err(_) => {
                    tracing::debug!(
                        url = %self.connector.config().url,
                        tracks = self.demuxer.codecs().len(),
                        "Probe deadline reached"
                    );
                    break;
                }
            };

            match self.handle(msg)? {
                Some(ClientEvent::Packet(packet)) => self.buffered.push_back(packet),
                Some(ClientEvent::Disconnected(reason)) => {
                    tracing::debug!(reason = %reason, "Stream ended while probing");
                    return Err(ProtocolError::ConnectionClosed.into());
                }
                Some(ClientEvent::CodecUpdate(_)) | None => {}
            }
        }

        self.probed = true;
        Ok(self.demuxer.codecs().to_vec())
    }

    fn probe_complete(&self) -> bool {
        if self.buffered.len() >= MAX_PROBE_PACKETS {
            return true;
        }
        let hints = self.hints.unwrap_or_default();

        let video_done = self.demuxer.video_ready() || hints.video == Some(false);
        let audio_done = self.disable_audio
            || self.demuxer.has_audio()
            || hints.audio == Some(false)
            || (hints.audio.is_none()
                && self.demuxer.video_ready()
                && self.buffered.len() >= AUDIO_GRACE_PACKETS);

        video_done && audio_done
    }

    /// Next packet, codec change or end of stream
    pub async fn next_event(&mut self) -> Result<ClientEvent> {
        if let Some(packet) = self.buffered.pop_front() {
            return Ok(ClientEvent::Packet(packet));
        }

        loop {
            let msg = match self.connector.read_message().await {
                Ok(msg) => msg,
                Err(Error::Protocol(ProtocolError::ConnectionClosed)) => {
                    return Ok(ClientEvent::Disconnected("connection closed".into()))
                }
                Err(e) => return Err(e),
            };
            if let Some(event) = self.handle(msg)? {
                return Ok(event);
            }
        }
    }

    fn handle(&mut self, msg: RtmpMessage) -> Result<Option<ClientEvent>> {
        let demuxed = match msg {
            RtmpMessage::Video { timestamp, data } => {
                VideoTag::parse(data).and_then(|tag| self.demuxer.video(tag, timestamp))
            }
            RtmpMessage::Audio { timestamp, data } => {
                if self.disable_audio {
                    return Ok(None);
                }
                AudioTag::parse(data).and_then(|tag| self.demuxer.audio(tag, timestamp))
            }
            RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => {
                return self.on_status(cmd.status_code().unwrap_or_default());
            }
            RtmpMessage::Data(data) if data.name == CMD_ON_METADATA => {
                if let Some(meta) = data.values.first() {
                    self.hints = Some(MetadataHints::from_metadata(meta));
                }
                return Ok(None);
            }
            RtmpMessage::UserControl(UserControlEvent::StreamEof(_)) => {
                return Ok(Some(ClientEvent::Disconnected("stream EOF".into())));
            }
            _ => return Ok(None),
        };

        match demuxed {
            Ok(Demuxed {
                packet,
                codecs_changed,
            }) => {
                if codecs_changed && self.probed {
                    // Packet of the same tag, if any, is delivered after the update
                    if let Some(packet) = packet {
                        self.buffered.push_back(packet);
                    }
                    return Ok(Some(ClientEvent::CodecUpdate(
                        self.demuxer.codecs().to_vec(),
                    )));
                }
                Ok(packet.map(ClientEvent::Packet))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed media message");
                Ok(None)
            }
        }
    }

    fn on_status(&mut self, code: &str) -> Result<Option<ClientEvent>> {
        match code {
            NS_PLAY_STOP | NS_PLAY_UNPUBLISH_NOTIFY => {
                Ok(Some(ClientEvent::Disconnected(code.to_string())))
            }
            NS_PLAY_STREAM_NOT_FOUND | NS_PLAY_FAILED => {
                Err(ProtocolError::PlayFailed(code.to_string()).into())
            }
            _ => {
                tracing::debug!(code, "RTMP status");
                Ok(None)
            }
        }
    }
}
