//! RTMP client configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::{CLIENT_CHUNK_SIZE, MAX_CHUNK_SIZE};

const DEFAULT_PORT: u16 = 1935;

/// Parsed `rtmp://host[:port]/app[/stream...]` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    /// Everything after the app, query string included
    pub stream: String,
}

impl RtmpUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("rtmp://")
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        if authority.is_empty() {
            return Err(Error::InvalidUrl(url.to_string()));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidUrl(url.to_string()))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), DEFAULT_PORT),
        };

        let (app, stream) = path.split_once('/').unwrap_or((path, ""));
        if app.is_empty() {
            return Err(Error::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            host,
            port,
            app: app.to_string(),
            stream: stream.to_string(),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `tcUrl` sent in `connect`
    pub fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

/// Options for one upstream play session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,

    /// TCP connect deadline
    pub dial_timeout: Duration,

    /// Deadline for every socket read and write
    pub read_write_timeout: Duration,

    /// Drop audio messages instead of demuxing them
    pub disable_audio: bool,

    /// Log every protocol message at debug level
    pub debug: bool,

    /// Buffer length announced with `SetBufferLength`
    pub buffer_length_ms: u32,

    /// Chunk size announced for our outgoing messages
    pub chunk_size: u32,

    /// `flashVer` sent in `connect`
    pub flash_ver: String,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dial_timeout: Duration::from_secs(3),
            read_write_timeout: Duration::from_secs(3),
            disable_audio: false,
            debug: false,
            buffer_length_ms: 3000,
            chunk_size: CLIENT_CHUNK_SIZE,
            flash_ver: "LNX 9,0,124,2".to_string(),
        }
    }

    pub fn parse_url(&self) -> Result<RtmpUrl> {
        RtmpUrl::parse(&self.url)
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn read_write_timeout(mut self, timeout: Duration) -> Self {
        self.read_write_timeout = timeout;
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

    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(128, MAX_CHUNK_SIZE);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_with_defaults() {
        let url = RtmpUrl::parse("rtmp://camera.local/live/front").unwrap();
        assert_eq!(url.host, "camera.local");
        assert_eq!(url.port, 1935);
        assert_eq!(url.app, "live");
        assert_eq!(url.stream, "front");
        assert_eq!(url.tc_url(), "rtmp://camera.local:1935/live");
    }

    #[test]
    fn test_parse_url_with_port_and_nested_stream() {
        let url = RtmpUrl::parse("rtmp://10.0.0.5:1936/app/inst/cam1?token=abc").unwrap();
        assert_eq!(url.addr(), "10.0.0.5:1936");
        assert_eq!(url.app, "app");
        assert_eq!(url.stream, "inst/cam1?token=abc");
    }

    #[test]
    fn test_parse_url_errors() {
        for bad in [
            "http://host/live/x",
            "rtmp:///live/x",
            "rtmp://host:notaport/live",
            "rtmp://host",
        ] {
            assert!(
                matches!(RtmpUrl::parse(bad), Err(Error::InvalidUrl(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_builder_chaining() {
        let config = ClientConfig::new("rtmp://h/live/s")
            .dial_timeout(Duration::from_secs(1))
            .read_write_timeout(Duration::from_secs(2))
            .disable_audio(true)
            .chunk_size(u32::MAX);

        assert_eq!(config.dial_timeout, Duration::from_secs(1));
        assert_eq!(config.read_write_timeout, Duration::from_secs(2));
        assert!(config.disable_audio);
        assert_eq!(config.chunk_size, MAX_CHUNK_SIZE);
        assert_eq!(config.parse_url().unwrap().stream, "s");
    }
}
