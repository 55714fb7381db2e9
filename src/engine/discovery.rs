//! Discovery loop
//!
//! Polls the catalog, registers sources the registry does not know yet and
//! starts workers for the always-on ones. A dropped stream wakes the loop
//! early so that a source still listed comes back without waiting a full
//! interval.

use std::sync::Arc;

use tokio::time::sleep;

use crate::error::Result;

use super::EngineContext;

pub(crate) async fn run(ctx: Arc<EngineContext>) {
    loop {
        match discover(&ctx).await {
            Ok(started) => {
                tracing::debug!(started, "Discovery pass complete");
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot get active streams");
            }
        }
        log_working_streams(&ctx);

        tokio::select! {
            _ = sleep(ctx.config.discovery_interval) => {}
            _ = ctx.dropped.notified() => {
                tracing::debug!("Stream dropped, rediscovering");
            }
        }
    }
}

/// One pass; returns the number of workers started
pub(crate) async fn discover(ctx: &Arc<EngineContext>) -> Result<usize> {
    let ids = ctx.catalog.list_active_source_ids().await?;
    let options = &ctx.config.default_options;

    let mut started = 0;
    for id in ids {
        let url = ctx.config.source_url(&id);
        if !ctx.registry.insert_if_absent(&id, &url, options.clone()) {
            continue;
        }
        tracing::info!(stream = %id, on_demand = options.on_demand, "Stream discovered");
        if !options.on_demand && ctx.start_worker(&id) {
            started += 1;
        }
    }
    Ok(started)
}

fn log_working_streams(ctx: &Arc<EngineContext>) {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        sleep(ctx.config.working_streams_log_delay).await;
        tracing::info!(streams = ctx.registry.working_count(), "Working streams");
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::test_support::*;
    use crate::engine::EngineConfig;
    use crate::error::Error;
    use crate::registry::StreamOptions;
    use crate::source::{SourceCatalog, StaticCatalog};
    use crate::transport::TransportFactory;

    struct UnreachableCatalog;

    #[async_trait]
    impl SourceCatalog for UnreachableCatalog {
        async fn list_active_source_ids(&self) -> Result<Vec<String>> {
            Err(Error::Catalog("database unavailable".into()))
        }
    }

    fn ctx_with(
        config: EngineConfig,
        catalog: Arc<dyn SourceCatalog>,
        dialer: Arc<FakeDialer>,
    ) -> Arc<EngineContext> {
        let transport: Arc<dyn TransportFactory> = RecordingTransport::new();
        Arc::new(EngineContext::new(config, catalog, dialer, transport))
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_starts_always_on_workers() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let config = EngineConfig::default().source_base_url("rtmp://origin/live/");
        let ctx = ctx_with(config, Arc::new(StaticCatalog::new(["cam1", "cam2"])), dialer.clone());

        assert_eq!(discover(&ctx).await.unwrap(), 2);
        wait_for_dials(&dialer, 2).await;

        assert_eq!(ctx.registry.list(), vec!["cam1", "cam2"]);
        assert_eq!(ctx.registry.working_count(), 2);
        let mut urls: Vec<String> = dialer.requests().into_iter().map(|r| r.url).collect();
        urls.sort();
        assert_eq!(urls, vec!["rtmp://origin/live/cam1", "rtmp://origin/live/cam2"]);

        // Known streams are left alone
        assert_eq!(discover(&ctx).await.unwrap(), 0);
        assert_eq!(dialer.dial_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_registers_on_demand_without_worker() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let config = EngineConfig::default().default_options(StreamOptions::default().on_demand(true));
        let ctx = ctx_with(config, Arc::new(StaticCatalog::new(["cam1"])), dialer.clone());

        assert_eq!(discover(&ctx).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(ctx.registry.contains("cam1"));
        assert!(!ctx.registry.get("cam1").unwrap().working());
        assert_eq!(dialer.dial_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_error_is_reported() {
        let ctx = ctx_with(
            EngineConfig::default(),
            Arc::new(UnreachableCatalog),
            FakeDialer::new(vec![]),
        );
        assert!(matches!(discover(&ctx).await, Err(Error::Catalog(_))));
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_source_picked_up_next_interval() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let catalog = Arc::new(StaticCatalog::new(["cam1"]));
        let config = EngineConfig::default().keyframe_timeout(Duration::from_secs(3600));
        let ctx = ctx_with(config, catalog.clone(), dialer.clone());
        let handle = tokio::spawn(run(Arc::clone(&ctx)));

        wait_for_dials(&dialer, 1).await;
        catalog.set(["cam1", "cam2"]);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!ctx.registry.contains("cam2"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(ctx.registry.contains("cam2"));
        assert_eq!(dialer.dial_count(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stream_is_rediscovered_immediately() {
        let dialer = FakeDialer::new(h264_pcma_codecs());
        let ctx = ctx_with(
            EngineConfig::default(),
            Arc::new(StaticCatalog::new(["cam1"])),
            dialer.clone(),
        );
        let handle = tokio::spawn(run(Arc::clone(&ctx)));

        // No key frame: the first worker gives up after 20 s
        wait_for_dials(&dialer, 1).await;
        tokio::time::sleep(Duration::from_millis(20_500)).await;

        assert_eq!(dialer.dial_count(), 2);
        assert!(ctx.registry.get("cam1").unwrap().working());

        handle.abort();
    }
}
