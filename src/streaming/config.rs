//! Video streaming configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::buffer::DEFAULT_CAPACITY;

/// Video streaming service configuration options
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Frames kept per call for late joiners
    pub max_frames_per_call: usize,

    /// Capacity of each subscriber queue
    pub subscriber_queue_capacity: usize,

    /// Calls without a frame for this long are swept
    pub stream_timeout: Duration,

    /// How often the inactivity sweep runs
    pub sweep_interval: Duration,

    /// Largest accepted JSON frame header
    pub max_header_size: usize,

    /// Largest accepted frame payload
    pub max_payload_size: usize,

    /// Frame ingest listener address
    pub ingest_addr: SocketAddr,

    /// Maximum concurrent ingest connections (0 = unlimited)
    pub max_ingest_connections: usize,

    /// Log a progress line every this many frames per call (0 = never)
    pub progress_log_every: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_frames_per_call: DEFAULT_CAPACITY,
            subscriber_queue_capacity: 50,
            stream_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            max_header_size: 64 * 1024,
            max_payload_size: 16 * 1024 * 1024, // 4K RGBA fits
            ingest_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 50051)),
            max_ingest_connections: 0,
            progress_log_every: 100,
        }
    }
}

impl StreamingConfig {
    /// Set the per-call ring size
    pub fn max_frames_per_call(mut self, frames: usize) -> Self {
        self.max_frames_per_call = frames.max(1);
        self
    }

    /// Set the subscriber queue capacity
    pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity.max(1);
        self
    }

    /// Set the inactivity threshold
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Set the sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the payload cap
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the ingest listener address
    pub fn ingest_addr(mut self, addr: SocketAddr) -> Self {
        self.ingest_addr = addr;
        self
    }

    /// Set the ingest connection limit
    pub fn max_ingest_connections(mut self, max: usize) -> Self {
        self.max_ingest_connections = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamingConfig::default();

        assert_eq!(config.max_frames_per_call, 10);
        assert_eq!(config.subscriber_queue_capacity, 50);
        assert_eq!(config.stream_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.progress_log_every, 100);
        assert!(config.ingest_addr.ip().is_loopback());
    }

    #[test]
    fn test_builder_clamps_zero() {
        let config = StreamingConfig::default()
            .max_frames_per_call(0)
            .subscriber_queue_capacity(0);

        assert_eq!(config.max_frames_per_call, 1);
        assert_eq!(config.subscriber_queue_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = StreamingConfig::default()
            .max_frames_per_call(4)
            .stream_timeout(Duration::from_millis(100))
            .sweep_interval(Duration::from_millis(20))
            .max_payload_size(1024)
            .ingest_addr(addr)
            .max_ingest_connections(8);

        assert_eq!(config.max_frames_per_call, 4);
        assert_eq!(config.stream_timeout, Duration::from_millis(100));
        assert_eq!(config.sweep_interval, Duration::from_millis(20));
        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.ingest_addr, addr);
        assert_eq!(config.max_ingest_connections, 8);
    }
}
