//! Casting configuration

use std::time::Duration;

/// Casting service configuration
#[derive(Debug, Clone)]
pub struct CastingConfig {
    /// Interval between discovery passes
    pub discovery_interval: Duration,
    /// Wait after a failed discovery pass before trying again
    pub discovery_error_backoff: Duration,
    /// Budget for one provider's discovery; exceeding it counts as a failed pass
    pub discovery_timeout: Duration,
    /// Log progress every this many frames sent per session (0 disables)
    pub progress_log_every: u64,
}

impl Default for CastingConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(60),
            discovery_error_backoff: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            progress_log_every: 100,
        }
    }
}

impl CastingConfig {
    /// Set the discovery interval
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the back-off after a failed discovery pass
    pub fn discovery_error_backoff(mut self, backoff: Duration) -> Self {
        self.discovery_error_backoff = backoff;
        self
    }

    /// Set the per-provider discovery budget
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the progress log period
    pub fn progress_log_every(mut self, frames: u64) -> Self {
        self.progress_log_every = frames;
        self
    }
}

/// A cast device as reported by a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastDevice {
    pub uuid: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub model: Option<String>,
}

impl CastDevice {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            host: host.into(),
            port: CHROMECAST_PORT,
            model: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Cast control port
pub const CHROMECAST_PORT: u16 = 8009;

/// Chromecast provider configuration
#[derive(Debug, Clone)]
pub struct ChromecastConfig {
    /// Timeout for reaching a device's control port
    pub connect_timeout: Duration,
    /// Devices announced without network discovery
    pub devices: Vec<CastDevice>,
}

impl Default for ChromecastConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            devices: Vec::new(),
        }
    }
}

impl ChromecastConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add a statically known device
    pub fn device(mut self, device: CastDevice) -> Self {
        self.devices.push(device);
        self
    }
}
