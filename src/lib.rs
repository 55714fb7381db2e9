//! livecast: live-stream ingestion and WebRTC fan-out engine
//!
//! This crate pulls live sources over RTMP, keeps a registry of active streams
//! and fans every packet out to any number of browser viewers:
//! - Discovery of the sources that should be live, with on-demand activation
//! - One ingestion worker per stream with reconnect and idle shutdown
//! - Non-blocking fan-out into bounded per-viewer queues (drop-newest)
//! - Per-viewer WebRTC sessions gated on the first key frame
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use livecast::engine::{EngineConfig, StreamEngine};
//! use livecast::source::{RtmpDialer, StaticCatalog};
//! use livecast::transport::WebRtcTransport;
//!
//! # async fn example(offer64: String) -> livecast::Result<()> {
//! let catalog = StaticCatalog::new(["rtmp://camera.local/live/front"]);
//! let engine = StreamEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(catalog),
//!     Arc::new(RtmpDialer::new()),
//!     Arc::new(WebRtcTransport::new()),
//! );
//! engine.serve();
//!
//! let answer = engine
//!     .attach_viewer("rtmp://camera.local/live/front", &offer64)
//!     .await?;
//! println!("{}", serde_json::to_string(&answer).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod client;
pub mod engine;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod source;
pub mod stats;
pub mod transport;

pub use engine::{AttachAnswer, EngineConfig, StreamEngine};
pub use error::{Error, Result};
pub use registry::StreamRegistry;
