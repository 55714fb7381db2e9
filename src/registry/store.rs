//! Stream registry implementation
//!
//! The single source of truth for every stream the engine knows about. One
//! registry-wide read/write lock guards all entries and their viewer maps;
//! it is never held across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::media::{CodecDescriptor, MediaPacket};
use crate::stats::{StreamMetrics, StreamStats};

use super::config::RegistryConfig;
use super::entry::{RunState, StreamEntry, StreamOptions, StreamSnapshot, WorkerId};
use super::error::RegistryError;
use super::queue::{Delivery, ViewerGuard, ViewerQueue, ViewerReceiver};

/// Per-cast delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub queued: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Outcome of [`StreamRegistry::remove_if_unwatched`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Removed,
    /// A viewer is attached; the entry and the worker's claim are kept
    Watched,
    /// Missing, or owned by another worker
    NotOwned,
}

/// Central registry for all known streams
pub struct StreamRegistry {
    /// Map of stream id to stream entry
    streams: RwLock<HashMap<String, StreamEntry>>,

    next_worker: AtomicU64,

    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_worker: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Insert a stream, or update the source of an existing one
    ///
    /// Codecs, viewers and run state of an existing entry are kept.
    pub fn upsert(&self, id: &str, url: &str, options: StreamOptions) {
        let mut streams = self.streams.write();
        match streams.get_mut(id) {
            Some(entry) => {
                entry.url = url.to_string();
                entry.options = options;
            }
            None => {
                streams.insert(id.to_string(), StreamEntry::new(url, options));
                tracing::debug!(stream = %id, "Stream registered");
            }
        }
    }

    /// Insert a stream unless one exists; returns whether it was inserted
    pub fn insert_if_absent(&self, id: &str, url: &str, options: StreamOptions) -> bool {
        let mut streams = self.streams.write();
        if streams.contains_key(id) {
            return false;
        }
        streams.insert(id.to_string(), StreamEntry::new(url, options));
        tracing::debug!(stream = %id, "Stream registered");
        true
    }

    /// Remove a stream unconditionally
    ///
    /// Dropping the entry closes every viewer queue, which ends their writers.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.streams.write().remove(id).is_some();
        if removed {
            tracing::debug!(stream = %id, "Stream removed");
        }
        removed
    }

    /// Remove a stream only if `worker` still owns it
    pub fn remove_if_owned(&self, id: &str, worker: WorkerId) -> bool {
        let mut streams = self.streams.write();
        let owned = matches!(
            streams.get(id).map(|e| e.run),
            Some(RunState::Running { worker: w }) if w == worker
        );
        if owned {
            streams.remove(id);
            tracing::debug!(stream = %id, worker = %worker, "Stream removed by its worker");
        }
        owned
    }

    /// Remove an idle on-demand stream if `worker` owns it and nobody watches
    ///
    /// The viewer check and the removal happen under one write lock, so a
    /// viewer added concurrently either keeps the entry or finds it gone.
    pub fn remove_if_unwatched(&self, id: &str, worker: WorkerId) -> Teardown {
        let mut streams = self.streams.write();
        let Some(entry) = streams.get(id) else {
            return Teardown::NotOwned;
        };
        if entry.run != (RunState::Running { worker }) {
            return Teardown::NotOwned;
        }
        if !entry.viewers.is_empty() {
            return Teardown::Watched;
        }
        streams.remove(id);
        tracing::debug!(stream = %id, worker = %worker, "Unwatched stream removed by its worker");
        Teardown::Removed
    }

    pub fn get(&self, id: &str) -> Option<StreamSnapshot> {
        self.streams.read().get(id).map(|e| e.snapshot(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.streams.read().contains_key(id)
    }

    /// All stream ids, sorted
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.streams.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of streams with a running worker
    pub fn working_count(&self) -> usize {
        self.streams
            .read()
            .values()
            .filter(|e| matches!(e.run, RunState::Running { .. }))
            .count()
    }

    /// Replace the stream's codec list
    pub fn set_codecs(&self, id: &str, codecs: Vec<CodecDescriptor>) -> Result<(), RegistryError> {
        let mut streams = self.streams.write();
        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;
        entry.codecs = Some(Arc::new(codecs));
        Ok(())
    }

    /// Current codec list; `None` if unknown or not negotiated yet
    pub fn codecs(&self, id: &str) -> Option<Arc<Vec<CodecDescriptor>>> {
        self.streams.read().get(id).and_then(|e| e.codecs.clone())
    }

    /// Register a viewer and hand back its queue
    ///
    /// The viewer stays registered until the returned guard is dropped.
    pub fn add_viewer(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<(ViewerGuard, ViewerReceiver), RegistryError> {
        let mut streams = self.streams.write();
        let entry = streams
            .get_mut(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.to_string()))?;

        let viewer = Uuid::new_v4();
        let (queue, rx) = ViewerQueue::bounded(self.config.viewer_queue_capacity);
        entry.viewers.insert(viewer, queue);

        tracing::info!(
            stream = %id,
            viewer = %viewer,
            viewers = entry.viewers.len(),
            "Viewer added"
        );

        Ok((ViewerGuard::new(Arc::clone(self), id.to_string(), viewer), rx))
    }

    /// Deregister a viewer; returns false if it was already gone
    pub fn remove_viewer(&self, id: &str, viewer: Uuid) -> bool {
        let mut streams = self.streams.write();
        let Some(entry) = streams.get_mut(id) else {
            return false;
        };
        let removed = entry.viewers.remove(&viewer).is_some();
        if removed {
            tracing::info!(
                stream = %id,
                viewer = %viewer,
                viewers = entry.viewers.len(),
                "Viewer removed"
            );
        }
        removed
    }

    pub fn has_viewers(&self, id: &str) -> bool {
        self.viewer_count(id) > 0
    }

    pub fn viewer_count(&self, id: &str) -> usize {
        self.streams.read().get(id).map_or(0, |e| e.viewers.len())
    }

    /// Offer a packet to every viewer of the stream without waiting
    pub fn cast(&self, id: &str, packet: &MediaPacket) -> FanOut {
        let streams = self.streams.read();
        let Some(entry) = streams.get(id) else {
            return FanOut::default();
        };

        let mut out = FanOut::default();
        for (viewer, queue) in &entry.viewers {
            match queue.offer(packet.clone()) {
                Delivery::Queued => out.queued += 1,
                Delivery::Dropped => {
                    out.dropped += 1;
                    tracing::debug!(stream = %id, viewer = %viewer, "Viewer queue full, packet dropped");
                }
                Delivery::Closed => out.closed += 1,
            }
        }
        entry.metrics.record_fanout(out.queued, out.dropped);
        out
    }

    /// Claim the stream for a new worker; `None` if one is already running
    pub fn try_begin_run(&self, id: &str) -> Option<WorkerId> {
        let mut streams = self.streams.write();
        let entry = streams.get_mut(id)?;
        match entry.run {
            RunState::Running { .. } => None,
            RunState::Idle => {
                let worker = WorkerId(self.next_worker.fetch_add(1, Ordering::Relaxed));
                entry.run = RunState::Running { worker };
                Some(worker)
            }
        }
    }

    /// Release the stream if `worker` still owns it
    pub fn release_run(&self, id: &str, worker: WorkerId) -> bool {
        let mut streams = self.streams.write();
        match streams.get_mut(id) {
            Some(entry) if entry.run == (RunState::Running { worker }) => {
                entry.run = RunState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn metrics(&self, id: &str) -> Option<Arc<StreamMetrics>> {
        self.streams.read().get(id).map(|e| Arc::clone(&e.metrics))
    }

    pub fn stats(&self, id: &str) -> Option<StreamStats> {
        self.streams
            .read()
            .get(id)
            .map(|e| e.metrics.snapshot(e.viewers.len()))
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::{CodecId, MediaKind};

    fn registry() -> Arc<StreamRegistry> {
        let registry = Arc::new(StreamRegistry::new());
        registry.upsert("cam1", "rtmp://origin/live/cam1", StreamOptions::default());
        registry
    }

    fn packet(n: u32) -> MediaPacket {
        MediaPacket::new(0, n, Bytes::from(n.to_be_bytes().to_vec()))
    }

    #[test]
    fn test_upsert_keeps_runtime_state() {
        let registry = registry();
        registry
            .set_codecs("cam1", vec![CodecDescriptor::h264(None)])
            .unwrap();
        let worker = registry.try_begin_run("cam1").unwrap();

        registry.upsert("cam1", "rtmp://backup/live/cam1", StreamOptions::default().debug(true));

        let snap = registry.get("cam1").unwrap();
        assert_eq!(snap.url, "rtmp://backup/live/cam1");
        assert!(snap.options.debug);
        assert_eq!(snap.codecs.unwrap().len(), 1);
        assert_eq!(snap.run, RunState::Running { worker });
        assert!(!registry.insert_if_absent("cam1", "x", StreamOptions::default()));
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = registry();
        registry.upsert("a", "rtmp://h/a/a", StreamOptions::default());
        registry.upsert("zz", "rtmp://h/a/zz", StreamOptions::default());

        assert_eq!(registry.list(), vec!["a", "cam1", "zz"]);
        assert!(registry.remove("zz"));
        assert!(!registry.remove("zz"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_codecs_replaced_wholesale() {
        let registry = registry();
        assert!(registry.codecs("cam1").is_none());

        registry
            .set_codecs(
                "cam1",
                vec![
                    CodecDescriptor::h264(None),
                    CodecDescriptor::audio(CodecId::Pcma, 8000, 1),
                ],
            )
            .unwrap();
        let before = registry.codecs("cam1").unwrap();

        registry
            .set_codecs("cam1", vec![CodecDescriptor::audio(CodecId::Opus, 48_000, 2)])
            .unwrap();
        let after = registry.codecs("cam1").unwrap();

        // An earlier reader keeps the complete old list
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].kind, MediaKind::Video);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].codec, CodecId::Opus);

        assert_eq!(
            registry.set_codecs("missing", vec![]),
            Err(RegistryError::StreamNotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_cast_drops_newest_for_slow_viewer() {
        let registry = registry();
        let (_guard, mut rx) = registry.add_viewer("cam1").unwrap();

        for n in 1..=100 {
            assert_eq!(registry.cast("cam1", &packet(n)).queued, 1);
        }
        let out = registry.cast("cam1", &packet(101));
        assert_eq!(out.dropped, 1);
        assert_eq!(out.queued, 0);

        for n in 1..=100 {
            assert_eq!(rx.recv().await.unwrap(), packet(n));
        }
        assert!(rx.try_recv().is_err());

        let stats = registry.stats("cam1").unwrap();
        assert_eq!(stats.delivered, 100);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_slow_viewer_does_not_affect_others() {
        let registry = registry();
        let (_slow, _slow_rx) = registry.add_viewer("cam1").unwrap();
        let (_fast, mut fast_rx) = registry.add_viewer("cam1").unwrap();

        for n in 1..=150 {
            registry.cast("cam1", &packet(n));
            if n > 100 {
                // The fast viewer keeps draining
                while fast_rx.try_recv().is_ok() {}
            }
        }
        let out = registry.cast("cam1", &packet(151));
        assert_eq!(out.queued, 1);
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn test_guard_removes_viewer_exactly_once() {
        let registry = registry();
        let (guard, _rx) = registry.add_viewer("cam1").unwrap();
        let viewer = guard.viewer_id();
        assert!(registry.has_viewers("cam1"));

        assert!(registry.remove_viewer("cam1", viewer));
        assert!(!registry.remove_viewer("cam1", viewer));
        drop(guard);
        assert_eq!(registry.viewer_count("cam1"), 0);

        let (guard, _rx) = registry.add_viewer("cam1").unwrap();
        drop(guard);
        assert!(!registry.has_viewers("cam1"));
    }

    #[test]
    fn test_add_viewer_to_unknown_stream() {
        let registry = registry();
        assert!(matches!(
            registry.add_viewer("nope"),
            Err(RegistryError::StreamNotFound(_))
        ));
    }

    #[test]
    fn test_run_claim_is_exclusive() {
        let registry = registry();
        let first = registry.try_begin_run("cam1").unwrap();
        assert!(registry.try_begin_run("cam1").is_none());
        assert!(registry.get("cam1").unwrap().working());
        assert_eq!(registry.working_count(), 1);

        assert!(registry.release_run("cam1", first));
        assert!(!registry.release_run("cam1", first));
        let second = registry.try_begin_run("cam1").unwrap();
        assert_ne!(first, second);
        assert!(registry.try_begin_run("missing").is_none());
    }

    #[test]
    fn test_stale_worker_cannot_remove_new_entry() {
        let registry = registry();
        let stale = registry.try_begin_run("cam1").unwrap();
        assert!(registry.remove_if_owned("cam1", stale));

        registry.upsert("cam1", "rtmp://origin/live/cam1", StreamOptions::default());
        let fresh = registry.try_begin_run("cam1").unwrap();

        assert!(!registry.remove_if_owned("cam1", stale));
        assert!(registry.contains("cam1"));
        assert!(registry.remove_if_owned("cam1", fresh));
        assert!(!registry.contains("cam1"));
    }

    #[test]
    fn test_unwatched_removal_rechecks_viewers() {
        let registry = registry();
        let worker = registry.try_begin_run("cam1").unwrap();

        // A viewer that arrived after the worker decided to stop
        let (guard, _rx) = registry.add_viewer("cam1").unwrap();
        assert_eq!(registry.remove_if_unwatched("cam1", worker), Teardown::Watched);
        assert!(registry.contains("cam1"));
        assert_eq!(
            registry.get("cam1").unwrap().run,
            RunState::Running { worker }
        );

        drop(guard);
        assert_eq!(registry.remove_if_unwatched("cam1", worker), Teardown::Removed);
        assert!(!registry.contains("cam1"));
        assert_eq!(registry.remove_if_unwatched("cam1", worker), Teardown::NotOwned);
    }

    #[test]
    fn test_unwatched_removal_requires_ownership() {
        let registry = registry();
        let worker = registry.try_begin_run("cam1").unwrap();
        registry.release_run("cam1", worker);
        let other = registry.try_begin_run("cam1").unwrap();

        assert_eq!(registry.remove_if_unwatched("cam1", worker), Teardown::NotOwned);
        assert!(registry.contains("cam1"));
        assert_eq!(registry.remove_if_unwatched("cam1", other), Teardown::Removed);
    }

    #[tokio::test]
    async fn test_remove_closes_viewer_queues() {
        let registry = registry();
        let (_guard, mut rx) = registry.add_viewer("cam1").unwrap();
        registry.remove("cam1");
        assert!(rx.recv().await.is_none());
    }
}
