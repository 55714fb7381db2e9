//! Relay - Pulls RTMP sources and serves them to WebRTC viewers
//!
//! Run with: cargo run --example relay -- [--offer <file>] <rtmp-url>...
//!
//! Every url is registered as an always-on stream. With `--offer`, the file
//! is read as a base64 SDP offer, a viewer is attached to the first stream
//! and the JSON answer is printed to stdout. Per-stream statistics are
//! logged every ten seconds until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use livecast::engine::{EngineConfig, StreamEngine};
use livecast::source::{RtmpDialer, StaticCatalog};
use livecast::transport::WebRtcTransport;

fn print_usage() {
    eprintln!("Usage: relay [--offer <file>] <rtmp-url>...");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  relay rtmp://localhost/live/test_key");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let mut offer_file = None;
    let mut urls = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "--offer" => offer_file = args.next(),
            _ => urls.push(arg),
        }
    }
    if urls.is_empty() {
        print_usage();
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("livecast=info".parse()?)
                .add_directive("relay=info".parse()?),
        )
        .init();

    let engine = Arc::new(StreamEngine::new(
        EngineConfig::default().discovery_interval(Duration::from_secs(30)),
        Arc::new(StaticCatalog::new(urls.clone())),
        Arc::new(RtmpDialer::new()),
        Arc::new(WebRtcTransport::new()),
    ));
    let discovery = engine.serve();

    if let Some(path) = offer_file {
        let offer64 = tokio::fs::read_to_string(&path).await?;
        // Give discovery a moment to register the sources
        tokio::time::sleep(Duration::from_millis(500)).await;
        let answer = engine.attach_viewer(&urls[0], &offer64).await?;
        println!("{}", serde_json::to_string(&answer)?);
    }

    let reporter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let (_, ids) = engine.list_streams();
                for id in ids {
                    if let Some(stats) = engine.stream_stats(&id) {
                        tracing::info!(
                            stream = %id,
                            viewers = stats.viewers,
                            video_packets = stats.video_packets,
                            audio_packets = stats.audio_packets,
                            dropped = stats.dropped,
                            bitrate = stats.bitrate(),
                            "Stream stats"
                        );
                    }
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    reporter.abort();
    discovery.abort();
    Ok(())
}
