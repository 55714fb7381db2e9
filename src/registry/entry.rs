//! Stream entry and state types
//!
//! This module defines the per-stream state stored in the registry. Entries
//! are only ever touched under the registry lock; callers outside the
//! registry see [`StreamSnapshot`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::media::CodecDescriptor;
use crate::stats::StreamMetrics;

use super::queue::ViewerQueue;

/// Ingestion options of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Ingest only while at least one viewer is attached
    pub on_demand: bool,
    /// Ignore the source's audio track
    pub disable_audio: bool,
    /// Verbose protocol logging for this source
    pub debug: bool,
}

impl StreamOptions {
    pub fn on_demand(mut self, on_demand: bool) -> Self {
        self.on_demand = on_demand;
        self
    }

    pub fn disable_audio(mut self, disable: bool) -> Self {
        self.disable_audio = disable;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Identity of one ingestion worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub(super) u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Whether an ingestion worker currently owns the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No worker; an attach or a discovery pass may start one
    Idle,
    /// A worker is dialing or streaming
    Running { worker: WorkerId },
}

/// Entry for a single stream in the registry
pub(crate) struct StreamEntry {
    pub url: String,
    pub options: StreamOptions,
    /// `None` until the first handshake; swapped wholesale on renegotiation
    pub codecs: Option<Arc<Vec<CodecDescriptor>>>,
    pub viewers: HashMap<Uuid, ViewerQueue>,
    pub run: RunState,
    pub metrics: Arc<StreamMetrics>,
}

impl StreamEntry {
    pub fn new(url: impl Into<String>, options: StreamOptions) -> Self {
        Self {
            url: url.into(),
            options,
            codecs: None,
            viewers: HashMap::new(),
            run: RunState::Idle,
            metrics: Arc::new(StreamMetrics::new()),
        }
    }

    pub fn snapshot(&self, id: &str) -> StreamSnapshot {
        StreamSnapshot {
            id: id.to_string(),
            url: self.url.clone(),
            options: self.options.clone(),
            codecs: self.codecs.clone(),
            viewer_count: self.viewers.len(),
            run: self.run,
        }
    }
}

/// Read-only copy of an entry
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub id: String,
    pub url: String,
    pub options: StreamOptions,
    pub codecs: Option<Arc<Vec<CodecDescriptor>>>,
    pub viewer_count: usize,
    pub run: RunState,
}

impl StreamSnapshot {
    /// True while an ingestion worker owns the stream
    pub fn working(&self) -> bool {
        matches!(self.run, RunState::Running { .. })
    }
}
