//! Broker configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cast::{CastingConfig, ChromecastConfig};
use crate::plugin::PluginManagerConfig;
use crate::streaming::StreamingConfig;

/// Everything the broker core needs to run
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub plugins: PluginManagerConfig,

    pub streaming: StreamingConfig,

    pub casting: CastingConfig,

    /// Chromecast provider settings; `None` registers no Chromecast provider
    pub chromecast: Option<ChromecastConfig>,

    /// Start every registered plugin on startup
    pub autostart_plugins: bool,

    /// Overall budget for stopping plugins on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            plugins: PluginManagerConfig::default(),
            streaming: StreamingConfig::default(),
            casting: CastingConfig::default(),
            chromecast: Some(ChromecastConfig::default()),
            autostart_plugins: true,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl BrokerConfig {
    /// Set the plugins directory
    pub fn plugins_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugins.plugins_root = root.into();
        self
    }

    /// Set the frame ingest address
    pub fn ingest_addr(mut self, addr: SocketAddr) -> Self {
        self.streaming.ingest_addr = addr;
        self
    }

    pub fn plugins(mut self, config: PluginManagerConfig) -> Self {
        self.plugins = config;
        self
    }

    pub fn streaming(mut self, config: StreamingConfig) -> Self {
        self.streaming = config;
        self
    }

    pub fn casting(mut self, config: CastingConfig) -> Self {
        self.casting = config;
        self
    }

    pub fn chromecast(mut self, config: Option<ChromecastConfig>) -> Self {
        self.chromecast = config;
        self
    }

    pub fn autostart_plugins(mut self, enabled: bool) -> Self {
        self.autostart_plugins = enabled;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
