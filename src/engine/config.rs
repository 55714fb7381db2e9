//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::registry::{RegistryConfig, StreamOptions};
use crate::transport::IceConfig;

/// Still-frame capture options
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub enabled: bool,

    /// Minimum time between two captures of the same stream
    pub period: Duration,

    /// Captures go to `<root>/<stream>/images/`
    pub root: PathBuf,

    /// Log every capture at info level
    pub show_status: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: Duration::from_secs(60),
            root: PathBuf::from("./media"),
            show_status: false,
        }
    }
}

impl SnapshotConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn show_status(mut self, show: bool) -> Self {
        self.show_status = show;
        self
    }
}

/// Engine configuration options
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between two catalog polls
    pub discovery_interval: Duration,

    /// Prefix joined to catalog ids to form the source URL
    pub source_base_url: String,

    /// Options given to streams created by discovery
    pub default_options: StreamOptions,

    /// Upstream connect deadline
    pub dial_timeout: Duration,

    /// Upstream per-read/per-write deadline
    pub read_write_timeout: Duration,

    /// Time allowed for collecting the initial codec list
    pub probe_timeout: Duration,

    /// Pause before reconnecting a failed source
    pub retry_backoff: Duration,

    /// Stream is dead without a key frame for this long
    pub keyframe_timeout: Duration,

    /// On-demand viewer presence check period
    pub viewer_idle_timeout: Duration,

    /// Viewer session closes without a key frame for this long
    pub no_video_timeout: Duration,

    /// Codec wait: attempts times interval
    pub codec_wait_attempts: u32,
    pub codec_wait_interval: Duration,

    /// Delay of the "working streams" line after a discovery pass
    pub working_streams_log_delay: Duration,

    pub snapshot: SnapshotConfig,

    pub ice: IceConfig,

    pub registry: RegistryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(60),
            source_base_url: String::new(),
            default_options: StreamOptions::default(),
            dial_timeout: Duration::from_secs(3),
            read_write_timeout: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(1),
            keyframe_timeout: Duration::from_secs(20),
            viewer_idle_timeout: Duration::from_secs(20),
            no_video_timeout: Duration::from_secs(80),
            codec_wait_attempts: 100,
            codec_wait_interval: Duration::from_millis(50),
            working_streams_log_delay: Duration::from_millis(200),
            snapshot: SnapshotConfig::default(),
            ice: IceConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn source_base_url(mut self, base: impl Into<String>) -> Self {
        self.source_base_url = base.into();
        self
    }

    pub fn default_options(mut self, options: StreamOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Set both upstream socket deadlines
    pub fn network_timeouts(mut self, dial: Duration, read_write: Duration) -> Self {
        self.dial_timeout = dial;
        self.read_write_timeout = read_write;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn keyframe_timeout(mut self, timeout: Duration) -> Self {
        self.keyframe_timeout = timeout;
        self
    }

    pub fn viewer_idle_timeout(mut self, timeout: Duration) -> Self {
        self.viewer_idle_timeout = timeout;
        self
    }

    pub fn no_video_timeout(mut self, timeout: Duration) -> Self {
        self.no_video_timeout = timeout;
        self
    }

    pub fn codec_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.codec_wait_attempts = attempts.max(1);
        self.codec_wait_interval = interval;
        self
    }

    pub fn snapshot(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn ice(mut self, ice: IceConfig) -> Self {
        self.ice = ice;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Source URL for a catalog id
    pub fn source_url(&self, id: &str) -> String {
        format!("{}{}", self.source_base_url, id)
    }
}
