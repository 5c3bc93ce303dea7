//! Plugin lifecycle state machine
//!
//! ```text
//!            start                 probe ok
//! Stopped ──────────► Starting ──────────────► Running
//!    ▲                   │                     │   │
//!    │                   │ timeout / failure   │   │ stop + clean exit
//!    │                   ▼                     │   ▼
//!    │   start        Crashed ◄────────────────┘ Stopped
//!    └─────────────── (terminal until an explicit start)
//! ```
//!
//! There are no implicit retries: leaving `Crashed` always takes an explicit
//! start request.

use std::fmt;

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// No process
    Stopped,
    /// Process spawned, startup probe in progress
    Starting,
    /// Probe succeeded, RPC client connected
    Running,
    /// Probe failed, health check failed, process died, or stop was forced
    Crashed,
}

impl PluginState {
    /// Whether `self -> next` is one of the permitted transitions
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;

        matches!(
            (self, next),
            (Stopped, Starting)
                | (Crashed, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Running, Stopped)
                | (Running, Crashed)
        )
    }

    /// Lowercase name used in logs and schemas
    pub fn as_str(self) -> &'static str {
        match self {
            PluginState::Stopped => "stopped",
            PluginState::Starting => "starting",
            PluginState::Running => "running",
            PluginState::Crashed => "crashed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
