//! Plugin process table
//!
//! Tracks the pid of every spawned plugin that has not been reaped yet, behind
//! a plain `std::sync::Mutex`. Killing through the table never awaits, so the
//! same primitive serves the timeout branch of a graceful shutdown and the
//! signal watcher thread, which may run while the async runtime is gone.
//!
//! A pid stays in the table until its child has been waited on. Until then
//! the kernel keeps the pid reserved (zombie), so a late kill can never hit an
//! unrelated process.
//!
//! The table also remembers which plugins it force-killed since their last
//! spawn, so whoever reaps the child can tell a kill from a clean exit.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Signal used for polite termination requests
#[cfg(unix)]
const TERMINATE: libc::c_int = libc::SIGTERM;

/// Signal used for forced termination
#[cfg(unix)]
const KILL: libc::c_int = libc::SIGKILL;

/// Protocol id → pid of live (unreaped) plugin processes
#[derive(Debug, Default)]
pub struct ProcessTable {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pids: HashMap<String, u32>,
    killed: HashSet<String>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly spawned process
    pub fn register(&self, protocol: &str, pid: u32) {
        let mut inner = self.lock();
        inner.killed.remove(protocol);
        inner.pids.insert(protocol.to_string(), pid);
    }

    /// Forget a process once it has been reaped
    pub fn release(&self, protocol: &str) -> Option<u32> {
        self.lock().pids.remove(protocol)
    }

    pub fn pid(&self, protocol: &str) -> Option<u32> {
        self.lock().pids.get(protocol).copied()
    }

    /// Whether the current process of `protocol` was force-killed
    pub fn was_killed(&self, protocol: &str) -> bool {
        self.lock().killed.contains(protocol)
    }

    pub fn len(&self) -> usize {
        self.lock().pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pids.is_empty()
    }

    /// Ask one plugin process to terminate
    pub fn terminate(&self, protocol: &str) -> bool {
        match self.pid(protocol) {
            Some(pid) => send_signal(pid, Signal::Terminate),
            None => false,
        }
    }

    /// Force-kill one plugin process
    pub fn kill(&self, protocol: &str) -> bool {
        let pid = {
            let mut inner = self.lock();
            let Some(pid) = inner.pids.get(protocol).copied() else {
                return false;
            };
            inner.killed.insert(protocol.to_string());
            pid
        };

        tracing::warn!(protocol = %protocol, pid, "Force killing plugin process");
        send_signal(pid, Signal::Kill)
    }

    /// Force-kill every known plugin process
    ///
    /// Never blocks on the processes themselves and is safe to call
    /// repeatedly. Returns how many kill signals were delivered.
    pub fn kill_all(&self) -> usize {
        let pids: Vec<(String, u32)> = {
            let mut inner = self.lock();
            let pids: Vec<(String, u32)> = inner
                .pids
                .iter()
                .map(|(protocol, pid)| (protocol.clone(), *pid))
                .collect();
            inner.killed.extend(pids.iter().map(|(protocol, _)| protocol.clone()));
            pids
        };

        pids.into_iter()
            .filter(|(protocol, pid)| {
                tracing::warn!(protocol = %protocol, pid = *pid, "Force killing plugin process");
                send_signal(*pid, Signal::Kill)
            })
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> bool {
    let signum = match signal {
        Signal::Terminate => TERMINATE,
        Signal::Kill => KILL,
    };

    // SAFETY: kill(2) has no memory-safety preconditions
    unsafe { libc::kill(pid as libc::pid_t, signum) == 0 }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: Signal) -> bool {
    tracing::error!(pid, ?signal, "Process signals are not supported on this platform");
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spawn_sleeper() -> std::process::Child {
        std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep")
    }

    #[test]
    fn test_register_release() {
        let table = ProcessTable::new();
        table.register("matrix", 4242);

        assert_eq!(table.pid("matrix"), Some(4242));
        assert_eq!(table.len(), 1);
        assert_eq!(table.release("matrix"), Some(4242));
        assert!(table.is_empty());
    }

    #[test]
    fn test_kill_all_terminates_processes() {
        let table = ProcessTable::new();
        let mut a = spawn_sleeper();
        let mut b = spawn_sleeper();
        table.register("a", a.id());
        table.register("b", b.id());

        assert_eq!(table.kill_all(), 2);
        assert!(table.was_killed("a"));
        assert!(table.was_killed("b"));

        assert!(!a.wait().unwrap().success());
        assert!(!b.wait().unwrap().success());
        table.release("a");
        table.release("b");

        // Nothing left to kill
        assert_eq!(table.kill_all(), 0);

        // A new spawn starts with a clean record
        table.register("a", 4242);
        assert!(!table.was_killed("a"));
        table.release("a");
    }

    #[test]
    fn test_kill_unknown_protocol() {
        let table = ProcessTable::new();
        assert!(!table.kill("missing"));
        assert!(!table.terminate("missing"));
    }
}
