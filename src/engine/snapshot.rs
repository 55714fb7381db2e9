//! Periodic still-frame capture
//!
//! On a key frame, at most once per period, the access unit is written as
//! an Annex-B H.264 elementary stream (parameter sets + IDR) that any
//! decoder can turn into an image. Writes run off the ingestion path;
//! failures are logged and forgotten.

use std::path::{Path, PathBuf};

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::error::Result;
use crate::media::h264::avcc_to_annexb;
use crate::media::{CodecDescriptor, CodecId, MediaPacket};

use super::config::SnapshotConfig;

const SNAPSHOT_FILE: &str = "snapshot.h264";

pub(crate) struct Snapshotter {
    config: SnapshotConfig,
    stream: String,
    last: Option<Instant>,
    in_flight: Option<AbortHandle>,
}

impl Snapshotter {
    /// `None` when snapshots are disabled
    pub fn new(config: &SnapshotConfig, stream: &str) -> Option<Self> {
        config.enabled.then(|| Self {
            config: config.clone(),
            stream: stream.to_string(),
            last: None,
            in_flight: None,
        })
    }

    pub fn dir(&self) -> PathBuf {
        self.config
            .root
            .join(sanitize(&self.stream))
            .join("images")
    }

    pub fn path(&self) -> PathBuf {
        self.dir().join(SNAPSHOT_FILE)
    }

    fn due(&self) -> bool {
        self.last
            .map_or(true, |last| last.elapsed() >= self.config.period)
    }

    /// Capture `packet` if it is a due H.264 key frame
    ///
    /// The file is written by a spawned task; at most one write is in flight
    /// per stream. Returns the handle of the write when one was started.
    pub fn offer(
        &mut self,
        packet: &MediaPacket,
        codec: Option<&CodecDescriptor>,
    ) -> Option<JoinHandle<()>> {
        if !packet.is_keyframe || !self.due() {
            return None;
        }
        if self.in_flight.as_ref().is_some_and(|w| !w.is_finished()) {
            return None;
        }
        let avc = codec
            .filter(|c| c.codec == CodecId::H264)
            .and_then(|c| c.avc.as_ref())
            .filter(|avc| avc.has_parameter_sets())?;

        let frame = avcc_to_annexb(&packet.data, avc.nalu_length_size, Some(avc));
        self.last = Some(Instant::now());

        let stream = self.stream.clone();
        let dir = self.dir();
        let path = self.path();
        let show_status = self.config.show_status;
        let handle = tokio::spawn(async move {
            match write(&dir, &path, &frame).await {
                Ok(()) if show_status => {
                    tracing::info!(stream = %stream, path = %path.display(), "Snapshot created");
                }
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(stream = %stream, error = %e, "Snapshot failed");
                }
            }
        });
        self.in_flight = Some(handle.abort_handle());
        Some(handle)
    }
}

async fn write(dir: &Path, path: &Path, frame: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, frame).await?;
    Ok(())
}

/// Stream ids may be URLs; keep them to one path component
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::client::fake_server::AVC_SEQUENCE_HEADER;
    use crate::media::h264::AvcConfig;

    const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84];

    fn h264() -> CodecDescriptor {
        CodecDescriptor::h264(Some(
            AvcConfig::parse(Bytes::from_static(&AVC_SEQUENCE_HEADER[5..])).unwrap(),
        ))
    }

    fn keyframe() -> MediaPacket {
        MediaPacket::new(0, 0, Bytes::from_static(IDR)).keyframe(true)
    }

    #[test]
    fn test_disabled() {
        assert!(Snapshotter::new(&SnapshotConfig::default(), "cam1").is_none());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("cam-1_a.b"), "cam-1_a.b");
        assert_eq!(sanitize("rtmp://h:1935/live/x"), "rtmp___h_1935_live_x");
        assert_eq!(sanitize("../etc"), "_etc");
    }

    #[tokio::test]
    async fn test_capture_respects_period() {
        let dir = tempfile::tempdir().unwrap();
        let config = SnapshotConfig::default()
            .enabled(true)
            .root(dir.path())
            .period(Duration::from_secs(3600));
        let mut snapshots = Snapshotter::new(&config, "cam1").unwrap();
        let codec = h264();

        // Not a key frame
        assert!(snapshots
            .offer(&MediaPacket::new(0, 0, Bytes::from_static(IDR)), Some(&codec))
            .is_none());

        snapshots.offer(&keyframe(), Some(&codec)).unwrap().await.unwrap();
        let written = std::fs::read(snapshots.path()).unwrap();
        assert_eq!(&written[..5], &[0, 0, 0, 1, 0x67]);
        assert!(written.ends_with(&[0, 0, 0, 1, 0x65, 0x88, 0x84]));

        // Within the period nothing is rewritten
        std::fs::remove_file(snapshots.path()).unwrap();
        assert!(snapshots.offer(&keyframe(), Some(&codec)).is_none());
        assert!(!snapshots.path().exists());
    }

    #[tokio::test]
    async fn test_non_h264_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = SnapshotConfig::default().enabled(true).root(dir.path());
        let mut snapshots = Snapshotter::new(&config, "cam1").unwrap();

        assert!(snapshots
            .offer(&keyframe(), Some(&CodecDescriptor::video(CodecId::H265)))
            .is_none());
        assert!(snapshots.offer(&keyframe(), None).is_none());
        assert!(!snapshots.path().exists());
    }

    #[tokio::test]
    async fn test_capture_does_not_wait_for_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = SnapshotConfig::default()
            .enabled(true)
            .root(dir.path())
            .period(Duration::ZERO);
        let mut snapshots = Snapshotter::new(&config, "cam1").unwrap();
        let codec = h264();

        // Returns before the write ran; a second key frame is skipped while
        // the first write is still pending
        let first = snapshots.offer(&keyframe(), Some(&codec)).unwrap();
        assert!(!snapshots.path().exists());
        assert!(snapshots.offer(&keyframe(), Some(&codec)).is_none());

        first.await.unwrap();
        assert!(snapshots.path().exists());
        assert!(snapshots.offer(&keyframe(), Some(&codec)).is_some());
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the stream directory should go
        std::fs::write(dir.path().join("cam1"), b"").unwrap();
        let config = SnapshotConfig::default().enabled(true).root(dir.path());
        let mut snapshots = Snapshotter::new(&config, "cam1").unwrap();

        snapshots.offer(&keyframe(), Some(&h264())).unwrap().await.unwrap();
        assert!(!snapshots.path().exists());
    }
}
