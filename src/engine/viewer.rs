//! Viewer session writer
//!
//! Drains one viewer's queue into its transport session. Output starts at
//! the first key frame (immediately for audio-only sessions), and the
//! session closes when no key frame arrives within the no-video timeout.

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::registry::{ViewerGuard, ViewerReceiver};
use crate::transport::ViewerSink;

/// Why a viewer session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerExit {
    NoVideo,
    /// The stream went away and its queue closed
    StreamEnded,
    WriteFailed,
}

impl fmt::Display for ViewerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViewerExit::NoVideo => "no video",
            ViewerExit::StreamEnded => "stream ended",
            ViewerExit::WriteFailed => "write failed",
        })
    }
}

pub(crate) struct ViewerSession {
    guard: ViewerGuard,
    queue: ViewerReceiver,
    sink: Box<dyn ViewerSink>,
    audio_only: bool,
    no_video_timeout: Duration,
}

impl ViewerSession {
    pub fn new(
        guard: ViewerGuard,
        queue: ViewerReceiver,
        sink: Box<dyn ViewerSink>,
        audio_only: bool,
        no_video_timeout: Duration,
    ) -> Self {
        Self {
            guard,
            queue,
            sink,
            audio_only,
            no_video_timeout,
        }
    }

    pub async fn run(mut self) -> ViewerExit {
        let exit = self.drain().await;
        self.sink.close().await;

        tracing::info!(
            stream = %self.guard.stream_id(),
            viewer = %self.guard.viewer_id(),
            reason = %exit,
            "Viewer detached"
        );
        // Dropping the guard deregisters the viewer
        exit
    }

    async fn drain(&mut self) -> ViewerExit {
        let no_video = sleep(self.no_video_timeout);
        tokio::pin!(no_video);
        let mut started = false;

        loop {
            tokio::select! {
                _ = &mut no_video => return ViewerExit::NoVideo,
                packet = self.queue.recv() => {
                    let Some(packet) = packet else {
                        return ViewerExit::StreamEnded;
                    };
                    if packet.is_keyframe || self.audio_only {
                        no_video.as_mut().reset(Instant::now() + self.no_video_timeout);
                        started = true;
                    }
                    if !started {
                        continue;
                    }
                    if let Err(e) = self.sink.write_packet(&packet).await {
                        tracing::warn!(
                            viewer = %self.guard.viewer_id(),
                            error = %e,
                            "Viewer write failed"
                        );
                        return ViewerExit::WriteFailed;
                    }
                }
            }
        }
    }
}
