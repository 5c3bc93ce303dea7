//! Call Assist broker core
//!
//! Supervises protocol plugins, ingests their video frames and casts them.
//!
//! Run with: callassist-broker --plugins-root ./plugins
//!
//! SIGTERM or SIGINT force-kills every plugin immediately, then the remaining
//! services are torn down.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use callassist_core::broker::{Broker, BrokerConfig};
use callassist_core::cast::{CastDevice, CastingConfig, ChromecastConfig};
use callassist_core::plugin::PluginManagerConfig;
use callassist_core::streaming::StreamingConfig;

#[derive(Parser, Debug)]
#[command(name = "callassist-broker")]
#[command(version)]
#[command(about = "Plugin supervisor and video frame router for Call Assist")]
struct Args {
    /// Directory containing one sub-directory per plugin
    #[arg(long, default_value = "plugins")]
    plugins_root: PathBuf,

    /// Address plugins push video frames to
    #[arg(long, default_value = "127.0.0.1:50051")]
    ingest_addr: SocketAddr,

    /// Do not start plugins on startup
    #[arg(long)]
    no_autostart: bool,

    /// Frames kept per call
    #[arg(long, default_value_t = 10)]
    max_frames_per_call: usize,

    /// Per-subscriber queue capacity
    #[arg(long, default_value_t = 50)]
    queue_capacity: usize,

    /// Seconds without frames before a stream is dropped
    #[arg(long, default_value_t = 30)]
    stream_timeout: u64,

    /// Seconds between cast target discovery passes
    #[arg(long, default_value_t = 60)]
    discovery_interval: u64,

    /// Seconds allowed for stopping all plugins on shutdown
    #[arg(long, default_value_t = 10)]
    shutdown_timeout: u64,

    /// Chromecast device as NAME=HOST[:PORT]; may be repeated
    #[arg(long = "chromecast", value_name = "NAME=HOST[:PORT]")]
    chromecasts: Vec<String>,

    /// Disable the Chromecast provider
    #[arg(long)]
    no_chromecast: bool,
}

fn parse_device(spec: &str) -> Result<CastDevice, String> {
    let (name, addr) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=HOST[:PORT], got '{}'", spec))?;

    let device = match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| format!("invalid port in '{}'", spec))?;
            CastDevice::new(name, name, host).port(port)
        }
        None => CastDevice::new(name, name, addr),
    };
    Ok(device)
}

impl Args {
    fn into_config(self) -> Result<BrokerConfig, String> {
        let chromecast = if self.no_chromecast {
            None
        } else {
            let mut config = ChromecastConfig::default();
            for spec in &self.chromecasts {
                config = config.device(parse_device(spec)?);
            }
            Some(config)
        };

        Ok(BrokerConfig::default()
            .plugins(PluginManagerConfig::with_root(self.plugins_root))
            .streaming(
                StreamingConfig::default()
                    .ingest_addr(self.ingest_addr)
                    .max_frames_per_call(self.max_frames_per_call)
                    .subscriber_queue_capacity(self.queue_capacity)
                    .stream_timeout(Duration::from_secs(self.stream_timeout)),
            )
            .casting(CastingConfig::default().discovery_interval(Duration::from_secs(self.discovery_interval)))
            .chromecast(chromecast)
            .autostart_plugins(!self.no_autostart)
            .shutdown_timeout(Duration::from_secs(self.shutdown_timeout)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("callassist_core=info".parse()?)
                .add_directive("callassist_broker=info".parse()?),
        )
        .init();

    let config = args.into_config()?;
    let broker = Broker::new(config).await;

    tracing::info!(
        plugins = broker.plugins().registry().len(),
        ingest = %broker.config().streaming.ingest_addr,
        "Starting broker"
    );

    let signals = broker.plugins().install_signal_handlers()?;
    broker.run_until(signals.terminated()).await?;
    signals.close();

    Ok(())
}
