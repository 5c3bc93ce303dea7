//! Call Assist broker core
//!
//! Supervises out-of-process protocol plugins and routes the decoded video
//! frames they produce to casting targets.
//!
//! ```text
//!                 start/stop, accounts, calls
//!   orchestrator ─────────────────────────────► PluginManager ──► plugin processes
//!        │                                                            │
//!        │ start/stop cast                               frame records│
//!        ▼                                                            ▼
//!   CastingService ◄── subscription ── VideoStreamingService ◄── FrameIngestServer
//!        │
//!        └──► CastProvider (Chromecast, ...) ──► display
//! ```
//!
//! # Example
//!
//! ```no_run
//! use callassist_core::broker::{Broker, BrokerConfig};
//!
//! #[tokio::main]
//! async fn main() -> callassist_core::Result<()> {
//!     let broker = Broker::new(BrokerConfig::default().plugins_root("plugins")).await;
//!     broker.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```

pub mod broker;
pub mod cast;
pub mod error;
pub mod plugin;
pub mod rpc;
pub mod stats;
pub mod streaming;

pub use broker::{Broker, BrokerConfig};
pub use error::{Error, Result};
