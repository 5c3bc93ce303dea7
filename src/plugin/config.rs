//! Plugin manager configuration

use std::path::PathBuf;
use std::time::Duration;

/// Plugin manager configuration options
#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    /// Directory scanned for `*/plugin.json`
    pub plugins_root: PathBuf,

    /// Delay between startup probe attempts
    pub probe_interval: Duration,

    /// Per-attempt TCP connect timeout
    pub connect_timeout: Duration,

    /// Default RPC timeout for account and call operations
    pub rpc_timeout: Duration,

    /// How long a graceful stop waits for the process to exit
    pub stop_timeout: Duration,

    /// Overrides every descriptor's startup timeout when set
    pub startup_timeout: Option<Duration>,

    /// Host plugins listen on
    pub plugin_host: std::net::IpAddr,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            plugins_root: PathBuf::from("plugins"),
            probe_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            startup_timeout: None,
            plugin_host: std::net::Ipv4Addr::LOCALHOST.into(),
        }
    }
}

impl PluginManagerConfig {
    /// Create a config rooted at `plugins_root`
    pub fn with_root(plugins_root: impl Into<PathBuf>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            ..Default::default()
        }
    }

    /// Set the probe retry interval
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the per-attempt connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the RPC timeout
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the graceful stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Override the startup probe budget of every plugin
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }
}
