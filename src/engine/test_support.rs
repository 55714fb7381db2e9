//! Scripted collaborators for engine tests

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::fake_server::AVC_SEQUENCE_HEADER;
use crate::error::{Error, Result, TransportError};
use crate::media::h264::AvcConfig;
use crate::media::{CodecDescriptor, CodecId, MediaPacket};
use crate::registry::StreamOptions;
use crate::source::{DialRequest, SourceConnection, SourceDialer, SourceEvent, StaticCatalog};
use crate::transport::{Negotiated, SessionRequest, TrackSelection, TransportFactory, ViewerSink};

use super::{EngineConfig, EngineContext};

pub(crate) fn h264() -> CodecDescriptor {
    let config = AvcConfig::parse(Bytes::from_static(&AVC_SEQUENCE_HEADER[5..]))
        .expect("valid AVC record");
    CodecDescriptor::h264(Some(config))
}

pub(crate) fn pcma() -> CodecDescriptor {
    CodecDescriptor::audio(CodecId::Pcma, 8000, 1)
}

pub(crate) fn opus() -> CodecDescriptor {
    CodecDescriptor::audio(CodecId::Opus, 48_000, 2)
}

pub(crate) fn h264_pcma_codecs() -> Vec<CodecDescriptor> {
    vec![h264(), pcma()]
}

pub(crate) fn keyframe(ts: u32) -> MediaPacket {
    MediaPacket::new(0, ts, Bytes::from_static(&[0, 0, 0, 3, 0x65, 0x88, 0x84])).keyframe(true)
}

pub(crate) fn inter_frame(ts: u32) -> MediaPacket {
    MediaPacket::new(0, ts, Bytes::from_static(&[0, 0, 0, 2, 0x41, 0x9A]))
}

pub(crate) fn audio(ts: u32) -> MediaPacket {
    MediaPacket::new(1, ts, Bytes::from_static(&[0xD5, 0xD5, 0xD5, 0xD5]))
}

/// Dialer whose connections are fed by the test
pub(crate) struct FakeDialer {
    codecs: Option<Vec<CodecDescriptor>>,
    feeds: Mutex<Vec<Option<mpsc::UnboundedSender<SourceEvent>>>>,
    requests: Mutex<Vec<DialRequest>>,
    dials: AtomicUsize,
}

impl FakeDialer {
    /// Every dial succeeds and reports `codecs`
    pub fn new(codecs: Vec<CodecDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            codecs: Some(codecs),
            feeds: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            dials: AtomicUsize::new(0),
        })
    }

    /// Every dial is refused
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            codecs: None,
            feeds: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            dials: AtomicUsize::new(0),
        })
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Event feed of the n-th successful connection
    pub fn feed(&self, n: usize) -> mpsc::UnboundedSender<SourceEvent> {
        self.feeds.lock()[n].clone().expect("feed still open")
    }

    /// Drop the n-th feed so its connection's next read fails
    pub fn close_feed(&self, n: usize) {
        self.feeds.lock()[n] = None;
    }

    pub fn requests(&self) -> Vec<DialRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SourceDialer for FakeDialer {
    async fn dial(&self, request: &DialRequest) -> Result<Box<dyn SourceConnection>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let Some(codecs) = self.codecs.clone() else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().push(Some(tx));
        Ok(Box::new(FakeConnection { codecs, rx }))
    }
}

struct FakeConnection {
    codecs: Vec<CodecDescriptor>,
    rx: mpsc::UnboundedReceiver<SourceEvent>,
}

#[async_trait]
impl SourceConnection for FakeConnection {
    fn codecs(&self) -> Vec<CodecDescriptor> {
        self.codecs.clone()
    }

    async fn next_event(&mut self) -> Result<SourceEvent> {
        match self.rx.recv().await {
            Some(event) => Ok(event),
            None => Err(TransportError::Closed.into()),
        }
    }
}

/// What a recording sink saw
#[derive(Default)]
pub(crate) struct SinkLog {
    packets: Mutex<Vec<MediaPacket>>,
    closed: AtomicBool,
    fail: AtomicBool,
}

impl SinkLog {
    pub fn packets(&self) -> Vec<MediaPacket> {
        self.packets.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct RecordingSink {
    log: Arc<SinkLog>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<SinkLog>) {
        let log = Arc::new(SinkLog::default());
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

#[async_trait]
impl ViewerSink for RecordingSink {
    async fn write_packet(&mut self, packet: &MediaPacket) -> Result<()> {
        if self.log.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        self.log.packets.lock().push(packet.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

/// One negotiated session as seen by the transport
pub(crate) struct RecordedSession {
    pub offer: String,
    pub tracks: TrackSelection,
    pub log: Arc<SinkLog>,
}

/// Answers every offer with a fixed SDP and records the sessions
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sessions: Mutex<Vec<Arc<RecordedSession>>>,
}

pub(crate) const FAKE_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n";

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sessions(&self) -> Vec<Arc<RecordedSession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl TransportFactory for RecordingTransport {
    async fn negotiate(&self, request: SessionRequest<'_>) -> Result<Negotiated> {
        let (sink, log) = RecordingSink::new();
        self.sessions.lock().push(Arc::new(RecordedSession {
            offer: request.offer_sdp.to_string(),
            tracks: request.tracks.clone(),
            log,
        }));
        Ok(Negotiated {
            answer_sdp: FAKE_ANSWER.to_string(),
            sink: Box::new(sink),
        })
    }
}

/// Context over a fake dialer and a recording transport, no catalog entries
pub(crate) fn context(config: EngineConfig, dialer: Arc<FakeDialer>) -> Arc<EngineContext> {
    Arc::new(EngineContext::new(
        config,
        Arc::new(StaticCatalog::default()),
        dialer,
        RecordingTransport::new(),
    ))
}

pub(crate) fn add_stream(ctx: &EngineContext, id: &str, on_demand: bool) {
    ctx.registry.upsert(
        id,
        &format!("rtmp://origin/live/{id}"),
        StreamOptions::default().on_demand(on_demand),
    );
}

pub(crate) async fn wait_for_dials(dialer: &FakeDialer, n: usize) {
    while dialer.dial_count() < n {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
