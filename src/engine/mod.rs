//! Stream engine
//!
//! Ties the registry to its background tasks and exposes the operations the
//! HTTP layer calls.
//!
//! ```text
//!                       ┌──────────────────┐
//!   SourceCatalog ─────►│  Discovery Loop  │◄──── dropped (Notify)
//!                       └────────┬─────────┘            ▲
//!                                │ start_worker         │
//!                                ▼                      │
//!   SourceDialer ─────► ┌──────────────────┐            │
//!                       │  IngestWorker    │────────────┘
//!                       │  (one per id)    │
//!                       └────────┬─────────┘
//!                                │ cast
//!                                ▼
//!                       ┌──────────────────┐
//!                       │  StreamRegistry  │
//!                       └────────┬─────────┘
//!                                │ bounded queues
//!                ┌───────────────┼───────────────┐
//!                ▼               ▼               ▼
//!          ViewerSession   ViewerSession   ViewerSession ───► ViewerSink
//! ```
//!
//! `attach_viewer` registers the viewer, activates an idle stream, waits for
//! the codec list, negotiates a session through the [`TransportFactory`] and
//! returns the answer while the writer keeps running in the background.

pub mod config;
mod discovery;
mod snapshot;
mod viewer;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{Error, Result, TransportError};
use crate::media::{CodecDescriptor, MediaKind};
use crate::registry::StreamRegistry;
use crate::source::{SourceCatalog, SourceDialer};
use crate::stats::StreamStats;
use crate::transport::{select_tracks, IceConfig, SessionRequest, TrackSelection, TransportFactory};

pub use self::config::{EngineConfig, SnapshotConfig};
pub use self::viewer::ViewerExit;
pub use self::worker::WorkerExit;

use self::viewer::ViewerSession;
use self::worker::IngestWorker;

/// State shared by the engine's tasks
pub(crate) struct EngineContext {
    pub config: EngineConfig,
    pub registry: Arc<StreamRegistry>,
    pub catalog: Arc<dyn SourceCatalog>,
    pub dialer: Arc<dyn SourceDialer>,
    pub transport: Arc<dyn TransportFactory>,
    pub ice: parking_lot::RwLock<IceConfig>,
    /// Woken by a worker that removed its stream
    pub dropped: Notify,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn SourceCatalog>,
        dialer: Arc<dyn SourceDialer>,
        transport: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            registry: Arc::new(StreamRegistry::with_config(config.registry.clone())),
            ice: parking_lot::RwLock::new(config.ice.clone()),
            config,
            catalog,
            dialer,
            transport,
            dropped: Notify::new(),
        }
    }

    /// Spawn a worker unless one already owns the stream
    pub fn start_worker(self: &Arc<Self>, id: &str) -> bool {
        let Some(worker) = self.registry.try_begin_run(id) else {
            return false;
        };
        tracing::debug!(stream = %id, worker = %worker, "Starting worker");
        tokio::spawn(IngestWorker::new(Arc::clone(self), id, worker).run());
        true
    }

    /// Poll until the stream has a complete codec list
    async fn wait_for_codecs(&self, id: &str) -> Result<Arc<Vec<CodecDescriptor>>> {
        let mut warned = false;

        for _ in 0..self.config.codec_wait_attempts {
            let Some(entry) = self.registry.get(id) else {
                return Err(Error::StreamNotFound(id.to_string()));
            };
            if let Some(codecs) = entry.codecs {
                if codecs.iter().all(CodecDescriptor::is_ready) {
                    return Ok(codecs);
                }
                if !warned {
                    tracing::warn!(stream = %id, "Codec is not ready, waiting for SPS/PPS");
                    warned = true;
                }
            }
            sleep(self.config.codec_wait_interval).await;
        }

        tracing::warn!(stream = %id, "Stream codec not found");
        Err(Error::CodecNotFound(id.to_string()))
    }

    async fn tracks_for(&self, id: &str) -> Result<TrackSelection> {
        let codecs = self.wait_for_codecs(id).await?;
        let selection = select_tracks(&codecs);

        for codec in &selection.skipped {
            tracing::warn!(stream = %id, codec = codec.codec.name(), "Track is ignored, codec not supported");
        }
        if selection.is_empty() {
            return Err(Error::NoSupportedTracks(id.to_string()));
        }
        Ok(selection)
    }
}

/// Answer handed back to a viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachAnswer {
    /// Media kinds carried by the session, video first
    pub tracks: Vec<String>,
    /// Base64 SDP answer
    pub sdp64: String,
}

/// Live-stream ingestion and fan-out engine
pub struct StreamEngine {
    ctx: Arc<EngineContext>,
}

impl StreamEngine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn SourceCatalog>,
        dialer: Arc<dyn SourceDialer>,
        transport: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineContext::new(config, catalog, dialer, transport)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.ctx.registry
    }

    /// Start the discovery loop
    ///
    /// Must be called from within a Tokio runtime. The loop runs until the
    /// returned handle is aborted.
    pub fn serve(&self) -> JoinHandle<()> {
        tracing::info!(
            interval = ?self.ctx.config.discovery_interval,
            "Stream discovery started"
        );
        tokio::spawn(discovery::run(Arc::clone(&self.ctx)))
    }

    /// Registered ids, sorted, with the first one broken out
    pub fn list_streams(&self) -> (Option<String>, Vec<String>) {
        let ids = self.ctx.registry.list();
        (ids.first().cloned(), ids)
    }

    pub fn stream_exists(&self, id: &str) -> bool {
        self.ctx.registry.contains(id)
    }

    /// Start ingestion for an idle stream; returns true if a worker was spawned
    pub fn ensure_running(&self, id: &str) -> bool {
        self.ctx.start_worker(id)
    }

    pub fn get_codecs(&self, id: &str) -> Option<Vec<CodecDescriptor>> {
        self.ctx.registry.codecs(id).map(|c| c.as_ref().clone())
    }

    /// Media kinds a viewer of `id` would receive
    ///
    /// Activates the stream and waits for its codec list like an attach would.
    pub async fn stream_tracks(&self, id: &str) -> Result<Vec<MediaKind>> {
        if !self.stream_exists(id) {
            return Err(Error::StreamNotFound(id.to_string()));
        }
        self.ctx.start_worker(id);
        Ok(self.ctx.tracks_for(id).await?.kinds())
    }

    /// Attach a viewer to a registered stream
    ///
    /// `offer64` is the viewer's base64 SDP offer.
    pub async fn attach_viewer(&self, id: &str, offer64: &str) -> Result<AttachAnswer> {
        let ctx = &self.ctx;
        if !ctx.registry.contains(id) {
            return Err(Error::StreamNotFound(id.to_string()));
        }
        let offer_sdp = decode_offer(offer64)?;

        // The guard deregisters the viewer on any early return below
        let (guard, queue) = ctx.registry.add_viewer(id)?;
        ctx.start_worker(id);

        let tracks = ctx.tracks_for(id).await?;
        let ice = ctx.ice.read().clone();
        let negotiated = ctx
            .transport
            .negotiate(SessionRequest {
                stream: id,
                viewer: guard.viewer_id(),
                offer_sdp: &offer_sdp,
                tracks: &tracks,
                ice: &ice,
            })
            .await?;

        let kinds = tracks.kinds();
        tracing::info!(
            stream = %id,
            viewer = %guard.viewer_id(),
            tracks = ?kinds,
            "Viewer attached"
        );

        let session = ViewerSession::new(
            guard,
            queue,
            negotiated.sink,
            tracks.is_audio_only(),
            ctx.config.no_video_timeout,
        );
        tokio::spawn(session.run());

        Ok(AttachAnswer {
            tracks: kinds.iter().map(|k| k.as_str().to_string()).collect(),
            sdp64: BASE64.encode(negotiated.answer_sdp),
        })
    }

    /// Attach a viewer to an arbitrary source url
    ///
    /// An unknown url is registered as an on-demand stream keyed by the url.
    pub async fn attach_url(&self, url: &str, offer64: &str) -> Result<AttachAnswer> {
        let options = self.ctx.config.default_options.clone().on_demand(true);
        if self.ctx.registry.insert_if_absent(url, url, options) {
            tracing::info!(stream = %url, "Stream registered on demand");
        }
        self.attach_viewer(url, offer64).await
    }

    pub fn stream_stats(&self, id: &str) -> Option<StreamStats> {
        self.ctx.registry.stats(id)
    }

    /// Replace the ICE configuration used by subsequent sessions
    pub fn set_ice_config(&self, ice: IceConfig) {
        *self.ctx.ice.write() = ice;
    }

    pub fn ice_config(&self) -> IceConfig {
        self.ctx.ice.read().clone()
    }
}

fn decode_offer(offer64: &str) -> Result<String> {
    let raw = BASE64
        .decode(offer64.trim())
        .map_err(|e| TransportError::InvalidOffer(e.to_string()))?;
    String::from_utf8(raw).map_err(|e| TransportError::InvalidOffer(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::test_support::*;
    use super::*;
    use crate::media::CodecId;
    use crate::registry::StreamOptions;
    use crate::source::{SourceEvent, StaticCatalog};

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\n";

    fn engine(dialer: Arc<FakeDialer>) -> (StreamEngine, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new();
        let engine = StreamEngine::new(
            EngineConfig::default(),
            Arc::new(StaticCatalog::default()),
            dialer,
            transport.clone(),
        );
        (engine, transport)
    }

    fn add_on_demand(engine: &StreamEngine, id: &str) {
        engine.registry().upsert(
            id,
            &format!("rtmp://origin/live/{id}"),
            StreamOptions::default().on_demand(true),
        );
    }

    fn offer64() -> String {
        BASE64.encode(OFFER)
    }

    #[test]
    fn test_list_streams_sorted() {
        let (engine, _) = engine(FakeDialer::new(vec![]));
        assert_eq!(engine.list_streams(), (None, vec![]));

        add_on_demand(&engine, "cam2");
        add_on_demand(&engine, "cam1");
        let (first, ids) = engine.list_streams();
        assert_eq!(first.as_deref(), Some("cam1"));
        assert_eq!(ids, vec!["cam1", "cam2"]);
        assert!(engine.stream_exists("cam2"));
        assert!(!engine.stream_exists("cam3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_negotiates_and_streams_after_keyframe() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let (engine, transport) = engine(dialer.clone());
        add_on_demand(&engine, "cam1");

        let answer = engine.attach_viewer("cam1", &offer64()).await.unwrap();
        assert_eq!(answer.tracks, vec!["video", "audio"]);
        assert_eq!(BASE64.decode(&answer.sdp64).unwrap(), FAKE_ANSWER.as_bytes());

        let sessions = transport.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].offer, OFFER);
        assert_eq!(sessions[0].tracks.kinds(), vec![MediaKind::Video, MediaKind::Audio]);
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(engine.registry().viewer_count("cam1"), 1);

        let feed = dialer.feed(0);
        feed.send(SourceEvent::Packet(inter_frame(0))).unwrap();
        feed.send(SourceEvent::Packet(keyframe(40))).unwrap();
        feed.send(SourceEvent::Packet(audio(50))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let written = sessions[0].log.packets();
        assert_eq!(written.len(), 2);
        assert!(written[0].is_keyframe);
        assert_eq!(engine.get_codecs("cam1").unwrap(), h264_pcma_codecs());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_attaches_share_one_worker() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let (engine, _) = engine(dialer.clone());
        add_on_demand(&engine, "cam1");

        let offer = offer64();
        let (a, b) = tokio::join!(
            engine.attach_viewer("cam1", &offer),
            engine.attach_viewer("cam1", &offer)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(engine.registry().viewer_count("cam1"), 2);
        assert!(!engine.ensure_running("cam1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_codec_wait_times_out() {
        let dialer = FakeDialer::failing();
        let (engine, transport) = engine(dialer);
        add_on_demand(&engine, "cam1");

        let started = Instant::now();
        let result = engine.attach_viewer("cam1", &offer64()).await;
        let waited = started.elapsed();

        assert!(matches!(result, Err(Error::CodecNotFound(id)) if id == "cam1"));
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5100));
        assert_eq!(engine.registry().viewer_count("cam1"), 0);
        assert!(transport.sessions().is_empty());

        // Without viewers the on-demand worker gives up on its next failure
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!engine.stream_exists("cam1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_unknown_stream() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let (engine, _) = engine(dialer.clone());

        let result = engine.attach_viewer("nope", &offer64()).await;
        assert!(matches!(result, Err(Error::StreamNotFound(_))));
        assert!(matches!(
            engine.stream_tracks("nope").await,
            Err(Error::StreamNotFound(_))
        ));
        assert_eq!(dialer.dial_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_offer_rejected_before_registration() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let (engine, _) = engine(dialer.clone());
        add_on_demand(&engine, "cam1");

        let result = engine.attach_viewer("cam1", "not base64!").await;
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::InvalidOffer(_)))
        ));
        assert_eq!(engine.registry().viewer_count("cam1"), 0);
        assert_eq!(dialer.dial_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_codecs_fail_attach() {
        let codecs = vec![
            CodecDescriptor::video(CodecId::H265),
            CodecDescriptor::audio(CodecId::Aac, 44_100, 2),
        ];
        let (engine, transport) = engine(FakeDialer::new(codecs));
        add_on_demand(&engine, "cam1");

        let result = engine.attach_viewer("cam1", &offer64()).await;
        assert!(matches!(result, Err(Error::NoSupportedTracks(_))));
        assert_eq!(engine.registry().viewer_count("cam1"), 0);
        assert!(transport.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_audio_is_skipped() {
        let codecs = vec![h264(), CodecDescriptor::audio(CodecId::Aac, 44_100, 2)];
        let (engine, _) = engine(FakeDialer::new(codecs));
        add_on_demand(&engine, "cam1");

        let answer = engine.attach_viewer("cam1", &offer64()).await.unwrap();
        assert_eq!(answer.tracks, vec!["video"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_h264_without_parameter_sets_is_not_ready() {
        let (engine, _) = engine(FakeDialer::new(vec![CodecDescriptor::h264(None), pcma()]));
        add_on_demand(&engine, "cam1");

        let result = engine.stream_tracks("cam1").await;
        assert!(matches!(result, Err(Error::CodecNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_url_registers_on_demand_stream() {
        let dialer = FakeDialer::new(vec![opus()]);
        let (engine, _) = engine(dialer.clone());
        let url = "rtmp://radio.local/live/main";

        let answer = engine.attach_url(url, &offer64()).await.unwrap();
        assert_eq!(answer.tracks, vec!["audio"]);

        let entry = engine.registry().get(url).unwrap();
        assert!(entry.options.on_demand);
        assert!(entry.working());
        assert_eq!(dialer.requests()[0].url, url);

        // A second viewer reuses the entry
        engine.attach_url(url, &offer64()).await.unwrap();
        assert_eq!(engine.registry().len(), 1);
        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_tracks_activates_stream() {
        let dialer = FakeDialer::new(vec![pcma()]);
        let (engine, _) = engine(dialer.clone());
        add_on_demand(&engine, "radio");

        assert_eq!(engine.stream_tracks("radio").await.unwrap(), vec![MediaKind::Audio]);
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(engine.stream_stats("radio").unwrap().connect_attempts, 1);
    }

    #[test]
    fn test_ice_config_replaced() {
        let (engine, _) = engine(FakeDialer::new(vec![]));
        assert_eq!(engine.ice_config(), IceConfig::default());

        let ice = IceConfig::default()
            .servers(["stun:stun.l.google.com:19302"])
            .port_range(50000, 50100);
        engine.set_ice_config(ice.clone());
        assert_eq!(engine.ice_config(), ice);
    }

    #[test]
    fn test_attach_answer_json() {
        let answer = AttachAnswer {
            tracks: vec!["video".into(), "audio".into()],
            sdp64: "dj0w".into(),
        };
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            serde_json::json!({ "tracks": ["video", "audio"], "sdp64": "dj0w" })
        );
    }
}
