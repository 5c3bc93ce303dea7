//! Per-plugin runtime state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::process::Child;

use crate::error::{Error, Result};
use crate::rpc::PluginClient;

use super::metadata::{CapabilityDescriptor, PluginMetadata};
use super::registry::PluginEntry;
use super::state::PluginState;

/// Runtime state of one protocol plugin
///
/// Owned by the plugin manager; nothing outside it mutates an instance.
#[derive(Debug)]
pub struct PluginInstance {
    /// Shared descriptor
    pub metadata: Arc<PluginMetadata>,

    /// Plugin directory
    pub dir: PathBuf,

    /// Current lifecycle state
    state: PluginState,

    /// Child process handle (None when no process is alive)
    pub child: Option<Child>,

    /// Persistent RPC client, set once the probe succeeded
    pub client: Option<Arc<PluginClient>>,

    /// Capabilities the running process reported during its startup probe
    pub capabilities: Option<CapabilityDescriptor>,

    /// Why the plugin last crashed
    pub last_error: Option<String>,

    /// When the current process was spawned
    pub started_at: Option<Instant>,

    /// Number of times the process was spawned
    pub launches: u32,
}

impl PluginInstance {
    /// Create a stopped instance for a registry entry
    pub fn new(entry: &PluginEntry) -> Self {
        Self {
            metadata: Arc::clone(&entry.metadata),
            dir: entry.dir.clone(),
            state: PluginState::Stopped,
            child: None,
            client: None,
            capabilities: None,
            last_error: None,
            started_at: None,
            launches: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(&mut self, next: PluginState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::debug!(
            protocol = %self.metadata.protocol,
            from = %self.state,
            to = %next,
            "Plugin state change"
        );
        self.state = next;

        match next {
            PluginState::Starting => {
                self.last_error = None;
                self.started_at = Some(Instant::now());
                self.launches += 1;
            }
            PluginState::Stopped | PluginState::Crashed => {
                self.client = None;
                self.capabilities = None;
                self.started_at = None;
            }
            PluginState::Running => {}
        }

        Ok(())
    }

    /// Record a failure and move to `Crashed`
    pub fn crash(&mut self, reason: impl Into<String>) {
        let reason = reason.into();

        if let Err(e) = self.transition(PluginState::Crashed) {
            tracing::warn!(protocol = %self.metadata.protocol, error = %e, "Ignoring crash report");
            return;
        }

        tracing::error!(protocol = %self.metadata.protocol, reason = %reason, "Plugin crashed");
        self.last_error = Some(reason);
    }

    /// Pid of the live child process
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Snapshot for callers outside the manager
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            protocol: self.metadata.protocol.clone(),
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            port: self.metadata.rpc.port,
            state: self.state,
            pid: self.pid(),
            last_error: self.last_error.clone(),
            uptime: self.started_at.map(|t| t.elapsed()),
            launches: self.launches,
        }
    }
}

/// Point-in-time view of a plugin instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub protocol: String,
    pub name: String,
    pub version: String,
    pub port: u16,
    pub state: PluginState,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    pub uptime: Option<std::time::Duration>,
    pub launches: u32,
}
