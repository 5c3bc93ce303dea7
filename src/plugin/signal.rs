//! Termination signal watcher
//!
//! SIGTERM and SIGINT are consumed on a dedicated OS thread rather than a
//! runtime task, so plugin processes get killed even when the async runtime is
//! stalled or already torn down.

use std::sync::Arc;
use std::thread::JoinHandle;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tokio::sync::watch;

use super::manager::PluginManager;

/// Background thread that turns termination signals into
/// [`PluginManager::emergency_cleanup`]
pub struct SignalWatcher {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
    terminated: watch::Receiver<bool>,
}

impl SignalWatcher {
    /// Register the handlers and start the watcher thread
    pub fn install(manager: Arc<PluginManager>) -> std::io::Result<Self> {
        let mut signals = Signals::new([SIGTERM, SIGINT])?;
        let handle = signals.handle();
        let (tx, terminated) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name("plugin-signal-watcher".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    tracing::warn!(signal, "Termination signal received");
                    manager.emergency_cleanup();
                    tx.send_replace(true);
                }
            })?;

        tracing::debug!("Signal handlers installed");

        Ok(Self {
            handle,
            thread: Some(thread),
            terminated,
        })
    }

    /// Resolves once a termination signal has been handled
    pub async fn terminated(&self) {
        let mut rx = self.terminated.clone();
        // The sender only disappears when the watcher is closed
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Whether a termination signal has been handled
    pub fn has_fired(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Unregister the handlers and join the thread
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Signal watcher thread panicked");
            }
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SignalWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalWatcher")
            .field("fired", &self.has_fired())
            .finish()
    }
}
