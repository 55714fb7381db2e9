//! RTMP source dialer

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::{ClientConfig, RtmpPuller};
use crate::error::Result;
use crate::media::CodecDescriptor;

use super::{DialRequest, SourceConnection, SourceDialer, SourceEvent};

/// Dials `rtmp://` sources with [`RtmpPuller`]
#[derive(Debug, Clone, Default)]
pub struct RtmpDialer {
    chunk_size: Option<u32>,
}

impl RtmpDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk size announced to upstream servers
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = Some(size);
        self
    }

    fn client_config(&self, request: &DialRequest) -> ClientConfig {
        let config = ClientConfig::new(request.url.clone())
            .dial_timeout(request.dial_timeout)
            .read_write_timeout(request.read_write_timeout)
            .disable_audio(request.options.disable_audio)
            .debug(request.options.debug);
        match self.chunk_size {
            Some(size) => config.chunk_size(size),
            None => config,
        }
    }
}

#[async_trait]
impl SourceDialer for RtmpDialer {
    async fn dial(&self, request: &DialRequest) -> Result<Box<dyn SourceConnection>> {
        let puller = RtmpPuller::connect(self.client_config(request)).await?;
        let source = RtmpSource::open(puller, request.probe_timeout).await?;

        tracing::debug!(
            stream = %request.stream,
            tracks = source.codecs.len(),
            "RTMP source probed"
        );
        Ok(Box::new(source))
    }
}

/// A playing RTMP session
pub struct RtmpSource<S> {
    puller: RtmpPuller<S>,
    codecs: Vec<CodecDescriptor>,
}

impl<S> RtmpSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Probe the initial codec list of an already playing puller
    pub async fn open(mut puller: RtmpPuller<S>, probe_timeout: Duration) -> Result<Self> {
        let codecs = puller.probe(probe_timeout).await?;
        Ok(Self { puller, codecs })
    }
}

#[async_trait]
impl<S> SourceConnection for RtmpSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn codecs(&self) -> Vec<CodecDescriptor> {
        self.codecs.clone()
    }

    async fn next_event(&mut self) -> Result<SourceEvent> {
        let event = SourceEvent::from(self.puller.next_event().await?);
        if let SourceEvent::CodecUpdate(codecs) = &event {
            self.codecs = codecs.clone();
        }
        Ok(event)
    }
}
