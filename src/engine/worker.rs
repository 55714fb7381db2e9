//! Ingestion worker
//!
//! One instance per running stream. It owns the stream's run claim in the
//! registry and goes through:
//!
//! ```text
//!   Connecting ──dial ok──► Streaming ──read error──► Retrying ─┐
//!       ▲  │                    │                               │
//!       │  └──dial failed───────┼──────────► (backoff) ─────────┘
//!       │                       │
//!       └───────────────────────┴──no video / no viewer / disconnect / removed──► Exiting
//! ```
//!
//! Exiting removes the entry (only if this instance still owns it) and
//! wakes the discovery loop. A "no viewer" exit re-checks the viewers under
//! the same lock that removes the entry; a viewer that attached in between
//! sends the worker back to Connecting.

use std::fmt;
use std::sync::Arc;

use tokio::time::{sleep, Instant};

use crate::error::Result;
use crate::media::is_audio_only;
use crate::registry::{RunState, StreamOptions, StreamSnapshot, Teardown, WorkerId};
use crate::source::{DialRequest, SourceConnection, SourceEvent};

use super::snapshot::Snapshotter;
use super::EngineContext;

/// Why a worker stopped for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// No key frame (or, audio-only, no packet) within the key-frame timeout
    NoVideo,
    /// On-demand stream with nobody watching
    NoViewer,
    /// The source ended the stream
    Disconnected,
    /// The entry was removed or claimed by another worker
    Removed,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerExit::NoVideo => "no video on stream",
            WorkerExit::NoViewer => "on-demand stream has no viewer",
            WorkerExit::Disconnected => "source disconnected",
            WorkerExit::Removed => "stream removed",
        })
    }
}

pub(crate) struct IngestWorker {
    ctx: Arc<EngineContext>,
    stream: String,
    worker: WorkerId,
}

impl IngestWorker {
    pub fn new(ctx: Arc<EngineContext>, stream: &str, worker: WorkerId) -> Self {
        Self {
            ctx,
            stream: stream.to_string(),
            worker,
        }
    }

    pub async fn run(self) -> WorkerExit {
        loop {
            let exit = self.reconnect_loop().await;
            let removed = match exit {
                WorkerExit::NoViewer => {
                    match self.ctx.registry.remove_if_unwatched(&self.stream, self.worker) {
                        Teardown::Watched => {
                            tracing::debug!(stream = %self.stream, worker = %self.worker, "Viewer attached while stopping");
                            continue;
                        }
                        teardown => teardown == Teardown::Removed,
                    }
                }
                _ => self.ctx.registry.remove_if_owned(&self.stream, self.worker),
            };

            if removed {
                self.ctx.dropped.notify_one();
                tracing::info!(stream = %self.stream, reason = %exit, "Stream dropped");
            } else {
                tracing::debug!(stream = %self.stream, worker = %self.worker, reason = %exit, "Worker exited");
            }
            return exit;
        }
    }

    /// The entry, as long as this worker still owns it
    fn owned_entry(&self) -> Option<StreamSnapshot> {
        self.ctx
            .registry
            .get(&self.stream)
            .filter(|e| e.run == RunState::Running { worker: self.worker })
    }

    async fn reconnect_loop(&self) -> WorkerExit {
        let config = &self.ctx.config;

        loop {
            let Some(entry) = self.owned_entry() else {
                return WorkerExit::Removed;
            };

            tracing::info!(stream = %self.stream, url = %entry.url, "Stream tries to connect");
            if let Some(metrics) = self.ctx.registry.metrics(&self.stream) {
                metrics.record_connect_attempt();
            }

            let request = DialRequest {
                stream: self.stream.clone(),
                url: entry.url.clone(),
                options: entry.options.clone(),
                dial_timeout: config.dial_timeout,
                read_write_timeout: config.read_write_timeout,
                probe_timeout: config.probe_timeout,
            };

            match self.ctx.dialer.dial(&request).await {
                Ok(conn) => match self.stream(conn, &entry.options).await {
                    Ok(exit) => return exit,
                    Err(e) => {
                        tracing::warn!(stream = %self.stream, error = %e, "Stream interrupted");
                    }
                },
                Err(e) => {
                    tracing::warn!(stream = %self.stream, error = %e, "Stream connect failed");
                }
            }

            if entry.options.on_demand && !self.ctx.registry.has_viewers(&self.stream) {
                return WorkerExit::NoViewer;
            }
            sleep(config.retry_backoff).await;
        }
    }

    /// Pump one connection until a terminal condition or an error
    async fn stream(
        &self,
        mut conn: Box<dyn SourceConnection>,
        options: &StreamOptions,
    ) -> Result<WorkerExit> {
        let id = self.stream.as_str();
        let registry = &self.ctx.registry;
        let config = &self.ctx.config;

        let mut codecs = conn.codecs();
        if registry.set_codecs(id, codecs.clone()).is_err() {
            return Ok(WorkerExit::Removed);
        }
        let Some(metrics) = registry.metrics(id) else {
            return Ok(WorkerExit::Removed);
        };
        let mut audio_only = is_audio_only(&codecs);
        let mut snapshots = Snapshotter::new(&config.snapshot, id);

        tracing::info!(
            stream = %id,
            tracks = codecs.len(),
            audio_only,
            "Stream connected"
        );

        let keyframe_deadline = sleep(config.keyframe_timeout);
        let viewer_check = sleep(config.viewer_idle_timeout);
        tokio::pin!(keyframe_deadline);
        tokio::pin!(viewer_check);

        loop {
            tokio::select! {
                _ = &mut viewer_check => {
                    if self.owned_entry().is_none() {
                        return Ok(WorkerExit::Removed);
                    }
                    if options.on_demand && !registry.has_viewers(id) {
                        return Ok(WorkerExit::NoViewer);
                    }
                    viewer_check
                        .as_mut()
                        .reset(Instant::now() + config.viewer_idle_timeout);
                }
                _ = &mut keyframe_deadline => return Ok(WorkerExit::NoVideo),
                event = conn.next_event() => match event? {
                    SourceEvent::Packet(packet) => {
                        let codec = codecs.get(packet.stream_index);
                        metrics.record_packet(
                            packet.data.len(),
                            codec.map_or(false, |c| c.is_video()),
                            packet.is_keyframe,
                        );
                        if packet.is_keyframe || audio_only {
                            keyframe_deadline
                                .as_mut()
                                .reset(Instant::now() + config.keyframe_timeout);
                        }

                        registry.cast(id, &packet);

                        if let Some(snapshots) = snapshots.as_mut() {
                            snapshots.offer(&packet, codec);
                        }
                    }
                    SourceEvent::CodecUpdate(update) => {
                        tracing::info!(stream = %id, tracks = update.len(), "Stream codecs updated");
                        if registry.set_codecs(id, update.clone()).is_err() {
                            return Ok(WorkerExit::Removed);
                        }
                        audio_only = is_audio_only(&update);
                        codecs = update;
                        metrics.record_codec_update();
                    }
                    SourceEvent::Disconnected(reason) => {
                        tracing::info!(stream = %id, reason = %reason, "Source disconnected");
                        return Ok(WorkerExit::Disconnected);
                    }
                },
            }
        }
    }
}
