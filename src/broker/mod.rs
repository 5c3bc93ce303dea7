//! Broker core
//!
//! Wires the plugin manager, the streaming service and the casting service
//! together and runs them until asked to stop.

pub mod config;

pub use config::BrokerConfig;

use std::future::Future;
use std::sync::Arc;

use crate::cast::{CastingService, ChromecastProvider};
use crate::error::Result;
use crate::plugin::PluginManager;
use crate::streaming::{FrameIngestServer, VideoStreamingService};

/// The assembled core
pub struct Broker {
    config: BrokerConfig,
    plugins: Arc<PluginManager>,
    streaming: Arc<VideoStreamingService>,
    casting: Arc<CastingService>,
}

impl Broker {
    /// Discover plugins and register the configured cast providers
    pub async fn new(config: BrokerConfig) -> Self {
        let plugins = Arc::new(PluginManager::new(config.plugins.clone()));
        let streaming = Arc::new(VideoStreamingService::with_config(config.streaming.clone()));
        let casting = Arc::new(CastingService::with_config(
            Arc::clone(&streaming),
            config.casting.clone(),
        ));

        if let Some(ref chromecast) = config.chromecast {
            casting
                .register_provider(Arc::new(ChromecastProvider::new(chromecast.clone())))
                .await;
        }

        Self {
            config,
            plugins,
            streaming,
            casting,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub fn streaming(&self) -> &Arc<VideoStreamingService> {
        &self.streaming
    }

    pub fn casting(&self) -> &Arc<CastingService> {
        &self.casting
    }

    /// Run until `shutdown` resolves, then tear everything down
    ///
    /// Only binding the ingest listener can fail; once running, every failure
    /// stays inside the component it happened in.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ingest = FrameIngestServer::bind(Arc::clone(&self.streaming)).await?;
        let sweep = self.streaming.spawn_sweep_task();
        self.casting.initialize().await;

        if self.config.autostart_plugins {
            let started = self.plugins.start_all().await;
            tracing::info!(
                started,
                registered = self.plugins.registry().len(),
                "Plugins started"
            );
        }

        let result = ingest.run_until(shutdown).await;

        tracing::info!("Broker shutting down");
        sweep.abort();
        self.casting.cleanup().await;
        self.plugins.shutdown_all(self.config.shutdown_timeout).await;
        tracing::info!("Broker stopped");

        result
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}
