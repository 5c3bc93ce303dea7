//! Protocol plugin supervision
//!
//! Plugins are independent processes, one per communication protocol. Each is
//! described by a `plugin.json` descriptor in its own directory and answers a
//! small JSON-lines control RPC on a loopback port.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use callassist_core::plugin::{PluginManager, PluginManagerConfig};
//!
//! let manager = Arc::new(PluginManager::new(PluginManagerConfig::with_root("plugins")));
//! let _watcher = manager.install_signal_handlers()?;
//!
//! if manager.start("matrix").await {
//!     println!("running: {:?}", manager.get_available_protocols().await);
//! }
//!
//! manager.shutdown_all(Duration::from_secs(5)).await;
//! ```

pub mod config;
pub mod instance;
pub mod manager;
pub mod metadata;
pub mod process;
pub mod registry;
pub mod signal;
pub mod state;

pub use config::PluginManagerConfig;
pub use instance::{PluginInfo, PluginInstance};
pub use manager::PluginManager;
pub use metadata::{
    CapabilityDescriptor, ExecutableSpec, FieldDefinition, FieldType, PluginMetadata,
    ProtocolSchema, Resolution, RpcSettings, RuntimeKind,
};
pub use process::ProcessTable;
pub use registry::{PluginEntry, PluginRegistry};
pub use signal::SignalWatcher;
pub use state::PluginState;
