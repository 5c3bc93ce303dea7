//! Plugin manager
//!
//! Owns one [`PluginInstance`] per started protocol and drives it through the
//! lifecycle state machine. The instance map sits behind an async mutex that is
//! never held across an RPC or a process wait; long operations take what they
//! need out of the map, release the lock, and write the outcome back.
//!
//! Two shutdown paths share one force-kill primitive, [`ProcessTable`]:
//!
//! - [`PluginManager::shutdown_all`] asks every running plugin to stop and
//!   falls back to [`ProcessTable::kill_all`] once its deadline passes.
//! - [`PluginManager::emergency_cleanup`] calls [`ProcessTable::kill_all`]
//!   straight away. It never awaits, so a signal-watcher thread can call it
//!   while the runtime is busy or gone.
//!
//! A plugin whose process was force-killed always ends up `Crashed`, whichever
//! path notices the exit.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::rpc::{
    AccountConfig, CallEndRequest, CallEndResponse, CallStartRequest, CallStartResponse,
    PluginClient,
};

use super::config::PluginManagerConfig;
use super::instance::{PluginInfo, PluginInstance};
use super::metadata::{CapabilityDescriptor, PluginMetadata, ProtocolSchema};
use super::process::ProcessTable;
use super::registry::PluginRegistry;
use super::signal::SignalWatcher;
use super::state::PluginState;

/// How long to wait for a killed process to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Environment variable carrying the plugin's RPC port
const PORT_ENV: &str = "PORT";

/// How often `shutdown_all` checks on plugins that were still starting
const SETTLE_POLL: Duration = Duration::from_millis(10);

/// Supervises protocol plugin processes
pub struct PluginManager {
    config: PluginManagerConfig,
    registry: PluginRegistry,
    schemas: BTreeMap<String, ProtocolSchema>,
    instances: Mutex<HashMap<String, PluginInstance>>,
    processes: Arc<ProcessTable>,
    shutdown: CancellationToken,
    shutdown_started: AtomicBool,
}

impl PluginManager {
    /// Discover plugins under `config.plugins_root`
    pub fn new(config: PluginManagerConfig) -> Self {
        let registry = PluginRegistry::discover(&config.plugins_root);
        Self::with_registry(config, registry)
    }

    /// Create a manager over an already populated registry
    pub fn with_registry(config: PluginManagerConfig, registry: PluginRegistry) -> Self {
        let schemas = registry
            .iter()
            .map(|entry| (entry.metadata.protocol.clone(), entry.metadata.schema()))
            .collect();

        Self {
            config,
            registry,
            schemas,
            instances: Mutex::new(HashMap::new()),
            processes: Arc::new(ProcessTable::new()),
            shutdown: CancellationToken::new(),
            shutdown_started: AtomicBool::new(false),
        }
    }

    /// Plugin registry
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Pids of spawned, unreaped plugin processes
    pub fn processes(&self) -> &Arc<ProcessTable> {
        &self.processes
    }

    /// Every discovered protocol id, sorted
    pub fn registered_protocols(&self) -> Vec<String> {
        self.registry.protocols()
    }

    /// Whether shutdown has begun; no plugin starts after that
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start a plugin and wait for its startup probe
    ///
    /// Returns `true` once the plugin is running (immediately if it already
    /// was). Returns `false` for unknown protocols, while another start of the
    /// same plugin is in flight, after shutdown began, and when the probe fails.
    /// A failed probe force-kills the process and leaves the plugin `Crashed`.
    pub async fn start(&self, protocol: &str) -> bool {
        if self.is_shutdown_requested() {
            tracing::warn!(protocol = %protocol, "Refusing to start plugin during shutdown");
            return false;
        }

        let Some(entry) = self.registry.get(protocol) else {
            tracing::warn!(protocol = %protocol, "Cannot start unknown protocol");
            return false;
        };

        let mut child = {
            let mut instances = self.instances.lock().await;
            let instance = instances
                .entry(protocol.to_string())
                .or_insert_with(|| PluginInstance::new(entry));

            match instance.state() {
                PluginState::Running => return true,
                PluginState::Starting => {
                    tracing::debug!(protocol = %protocol, "Plugin already starting");
                    return false;
                }
                PluginState::Stopped | PluginState::Crashed => {}
            }

            if let Err(e) = instance.transition(PluginState::Starting) {
                tracing::error!(protocol = %protocol, error = %e, "Cannot start plugin");
                return false;
            }

            match spawn_process(&entry.metadata, &entry.dir) {
                Ok(child) => child,
                Err(e) => {
                    instance.crash(format!("spawn failed: {}", e));
                    return false;
                }
            }
        };

        let pid = child.id();
        if let Some(pid) = pid {
            self.processes.register(protocol, pid);
        }
        tracing::info!(
            protocol = %protocol,
            pid = ?pid,
            port = entry.metadata.rpc.port,
            "Plugin process spawned"
        );

        let outcome = self.probe(&entry.metadata, &mut child).await;

        if let Err(e) = &outcome {
            self.kill_and_reap(protocol, &mut child).await;
            tracing::warn!(protocol = %protocol, error = %e, "Plugin startup failed");
        }

        let mut instances = self.instances.lock().await;
        let Some(instance) = instances.get_mut(protocol) else {
            return false;
        };

        match outcome {
            Ok((client, capabilities)) => {
                instance.child = Some(child);
                instance.client = Some(Arc::new(client));
                instance.capabilities = Some(capabilities);

                if let Err(e) = instance.transition(PluginState::Running) {
                    tracing::error!(protocol = %protocol, error = %e, "Plugin state out of sync");
                    return false;
                }

                tracing::info!(protocol = %protocol, pid = ?pid, "Plugin running");
                true
            }
            Err(e) => {
                instance.crash(e.to_string());
                false
            }
        }
    }

    /// Start every registered plugin concurrently; returns how many are running
    pub async fn start_all(self: &Arc<Self>) -> usize {
        let mut tasks = JoinSet::new();
        for protocol in self.registry.protocols() {
            let manager = Arc::clone(self);
            tasks.spawn(async move { manager.start(&protocol).await });
        }

        let mut started = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Plugin start task failed"),
            }
        }

        tracing::info!(started, total = self.registry.len(), "Plugin autostart complete");
        started
    }

    /// Connect and query capabilities until success, process exit, shutdown,
    /// or the startup budget runs out
    async fn probe(
        &self,
        metadata: &PluginMetadata,
        child: &mut Child,
    ) -> Result<(PluginClient, CapabilityDescriptor)> {
        let probe_failed = |reason: String| Error::Connection {
            protocol: metadata.protocol.clone(),
            reason,
        };
        let budget = self
            .config
            .startup_timeout
            .unwrap_or_else(|| metadata.rpc.startup_timeout());
        let deadline = Instant::now() + budget;
        let addr = SocketAddr::new(self.config.plugin_host, metadata.rpc.port);
        let mut attempts: u32 = 0;

        loop {
            if self.is_shutdown_requested() {
                return Err(probe_failed("shutdown requested during startup".to_string()));
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(probe_failed(format!("process exited during startup ({})", status)));
                }
                Ok(None) => {}
                Err(e) => return Err(probe_failed(format!("cannot poll process: {}", e))),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(probe_failed(format!(
                    "startup probe timed out after {}ms ({} attempts)",
                    budget.as_millis(),
                    attempts
                )));
            }

            attempts += 1;
            let attempt = async {
                let client = PluginClient::connect(
                    addr,
                    self.config.connect_timeout.min(remaining),
                    self.config.rpc_timeout,
                )
                .await?;
                let capabilities = client.capabilities().await?;
                Ok::<_, crate::error::RpcError>((client, capabilities))
            };

            let outcome = tokio::select! {
                outcome = tokio::time::timeout(remaining, attempt) => outcome,
                _ = self.shutdown.cancelled() => continue,
            };

            match outcome {
                Ok(Ok((client, capabilities))) => {
                    tracing::debug!(
                        protocol = %metadata.protocol,
                        attempts,
                        video_codecs = ?capabilities.video_codecs,
                        "Startup probe succeeded"
                    );
                    return Ok((client, capabilities));
                }
                Ok(Err(e)) => {
                    tracing::trace!(protocol = %metadata.protocol, attempts, error = %e, "Probe attempt failed");
                }
                Err(_) => {}
            }

            let pause = self
                .config
                .probe_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Gracefully stop one plugin with the configured stop timeout
    ///
    /// Returns `true` if the process is gone without this call killing it, or
    /// if the plugin was not running. A plugin whose process was force-killed,
    /// here or elsewhere, ends up `Crashed`.
    pub async fn stop(&self, protocol: &str) -> bool {
        match self.stop_instance(protocol, self.config.stop_timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(protocol = %protocol, error = %e, "Plugin stop failed");
                false
            }
        }
    }

    async fn stop_instance(&self, protocol: &str, grace: Duration) -> Result<()> {
        let deadline = Instant::now() + grace;

        let (client, mut child) = {
            let mut instances = self.instances.lock().await;
            let Some(instance) = instances.get_mut(protocol) else {
                return match self.registry.get(protocol) {
                    Some(_) => Ok(()),
                    None => Err(Error::UnknownProtocol(protocol.to_string())),
                };
            };

            if instance.state() != PluginState::Running {
                // A crashed plugin can still own a force-killed child to reap
                let leftover = instance.child.take();
                drop(instances);
                if let Some(mut child) = leftover {
                    self.kill_and_reap(protocol, &mut child).await;
                }
                return Ok(());
            }

            // No child means another stop (or a crash reap) owns the process
            let Some(child) = instance.child.take() else {
                return Ok(());
            };

            (instance.client.clone(), child)
        };

        tracing::info!(protocol = %protocol, grace_ms = grace.as_millis() as u64, "Stopping plugin");

        if let Some(client) = client {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, client.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(protocol = %protocol, error = %e, "Shutdown RPC failed"),
                Err(_) => tracing::debug!(protocol = %protocol, "Shutdown RPC timed out"),
            }
        }

        self.processes.terminate(protocol);

        let remaining = deadline.saturating_duration_since(Instant::now());
        let exited = match tokio::time::timeout(remaining, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(protocol = %protocol, status = %status, "Plugin process exited");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(protocol = %protocol, error = %e, "Cannot wait for plugin process");
                false
            }
            Err(_) => false,
        };

        // Checked before release: another path may have killed the process
        let killed = self.processes.was_killed(protocol);
        if exited {
            self.processes.release(protocol);
        } else {
            self.kill_and_reap(protocol, &mut child).await;
        }

        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(protocol) {
            if instance.state() == PluginState::Running {
                if !exited {
                    instance.crash("force-killed after shutdown timeout");
                } else if killed {
                    instance.crash("process was force-killed");
                } else {
                    instance.transition(PluginState::Stopped)?;
                    tracing::info!(protocol = %protocol, "Plugin stopped");
                }
            }
        }

        if exited {
            Ok(())
        } else {
            Err(Error::ShutdownTimeout {
                protocol: protocol.to_string(),
                timeout: grace,
            })
        }
    }

    /// Stop every plugin within `timeout` in total
    ///
    /// Running plugins are stopped concurrently. Plugins still in their
    /// startup probe are force-killed at once and their start fails. When the
    /// deadline passes, every remaining process is force-killed and its plugin
    /// marked `Crashed`. Also blocks further starts. Only the first call does
    /// any work; later calls return immediately.
    pub async fn shutdown_all(self: &Arc<Self>, timeout: Duration) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Plugin shutdown already in progress");
            return;
        }
        self.shutdown.cancel();

        let (running, starting) = {
            let instances = self.instances.lock().await;
            let mut running = Vec::new();
            let mut starting = Vec::new();
            for (protocol, instance) in instances.iter() {
                match instance.state() {
                    PluginState::Starting => starting.push(protocol.clone()),
                    PluginState::Running => running.push(protocol.clone()),
                    _ if instance.child.is_some() => running.push(protocol.clone()),
                    _ => {}
                }
            }
            (running, starting)
        };

        if running.is_empty() && starting.is_empty() {
            tracing::debug!("No plugins to shut down");
            return;
        }

        tracing::info!(
            running = running.len(),
            starting = starting.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Shutting down plugins"
        );

        for protocol in &starting {
            self.processes.kill(protocol);
        }

        let mut tasks = JoinSet::new();
        for protocol in running.iter().cloned() {
            let manager = Arc::clone(self);
            tasks.spawn(async move {
                let result = manager.stop_instance(&protocol, timeout).await;
                (protocol, result)
            });
        }

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => {}
                    Ok((protocol, Err(e))) => {
                        tracing::warn!(protocol = %protocol, error = %e, "Plugin did not stop cleanly");
                    }
                    Err(e) => tracing::error!(error = %e, "Plugin stop task failed"),
                }
            }

            // Aborted starts reap their own process before leaving `Starting`
            while self.any_starting(&starting).await {
                tokio::time::sleep(SETTLE_POLL).await;
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            let killed = self.processes.kill_all();
            tracing::warn!(killed, "Plugin shutdown timed out, force killed remaining processes");

            tasks.abort_all();
            while tasks.join_next().await.is_some() {}

            let mut instances = self.instances.lock().await;
            for protocol in &running {
                if let Some(instance) = instances.get_mut(protocol) {
                    if instance.state() == PluginState::Running {
                        instance.child = None;
                        instance.crash(format!(
                            "force-killed after shutdown exceeded {}ms",
                            timeout.as_millis()
                        ));
                    }
                }
                self.processes.release(protocol);
            }
        }

        tracing::info!("Plugin shutdown complete");
    }

    async fn any_starting(&self, protocols: &[String]) -> bool {
        let instances = self.instances.lock().await;
        protocols.iter().any(|protocol| {
            matches!(
                instances.get(protocol),
                Some(instance) if instance.state() == PluginState::Starting
            )
        })
    }

    /// Force-kill every plugin process without awaiting anything
    ///
    /// Marks shutdown as requested so no new plugin starts afterwards.
    /// Running plugins are marked `Crashed` when the instance map is free;
    /// otherwise the next stop or health check does it. Callable from any
    /// thread, any number of times. Returns how many processes were signalled.
    pub fn emergency_cleanup(&self) -> usize {
        self.shutdown.cancel();

        let killed = self.processes.kill_all();
        tracing::warn!(killed, "Emergency cleanup: force killed plugin processes");

        if let Ok(mut instances) = self.instances.try_lock() {
            for instance in instances.values_mut() {
                if instance.state() == PluginState::Running {
                    instance.crash("force-killed by emergency cleanup");
                }
            }
        }

        killed
    }

    /// Watch SIGTERM/SIGINT on a dedicated thread and run
    /// [`emergency_cleanup`](Self::emergency_cleanup) when one arrives
    pub fn install_signal_handlers(self: &Arc<Self>) -> std::io::Result<SignalWatcher> {
        SignalWatcher::install(Arc::clone(self))
    }

    /// Probe a running plugin
    ///
    /// A process that has exited, or that fails its health RPC, is reaped and
    /// the plugin marked `Crashed`. Returns `true` only for a healthy plugin.
    pub async fn health_check(&self, protocol: &str) -> bool {
        let (client, timeout) = {
            let mut instances = self.instances.lock().await;
            let Some(instance) = instances.get_mut(protocol) else {
                return false;
            };
            if instance.state() != PluginState::Running {
                // Reap a force-killed child once it is gone
                if let Some(child) = instance.child.as_mut() {
                    if let Ok(Some(_)) = child.try_wait() {
                        instance.child = None;
                        self.processes.release(protocol);
                    }
                }
                return false;
            }
            let Some(child) = instance.child.as_mut() else {
                return false;
            };

            match child.try_wait() {
                Ok(Some(status)) => {
                    let reason = if self.processes.was_killed(protocol) {
                        format!("process was force-killed ({})", status)
                    } else {
                        format!("process exited unexpectedly ({})", status)
                    };
                    instance.child = None;
                    self.processes.release(protocol);
                    instance.crash(reason);
                    return false;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(protocol = %protocol, error = %e, "Cannot poll plugin process");
                }
            }

            (instance.client.clone(), instance.metadata.rpc.health_check_timeout())
        };

        let failure = match client {
            None => Some("no RPC client".to_string()),
            Some(client) => match client.health(timeout).await {
                Ok(status) if status.healthy => None,
                Ok(status) => Some(format!("plugin reports unhealthy: {}", status.message)),
                Err(e) => Some(format!("health check failed: {}", e)),
            },
        };

        let Some(reason) = failure else {
            return true;
        };

        let child = {
            let mut instances = self.instances.lock().await;
            match instances.get_mut(protocol) {
                Some(instance) if instance.state() == PluginState::Running => instance.child.take(),
                _ => return false,
            }
        };

        if let Some(mut child) = child {
            self.kill_and_reap(protocol, &mut child).await;
        }

        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(protocol) {
            if instance.state() == PluginState::Running {
                instance.crash(reason);
            }
        }
        false
    }

    async fn kill_and_reap(&self, protocol: &str, child: &mut Child) {
        if !self.processes.kill(protocol) {
            if let Err(e) = child.start_kill() {
                tracing::debug!(protocol = %protocol, error = %e, "Kill failed, process likely gone");
            }
        }

        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(protocol = %protocol, status = %status, "Plugin process reaped");
            }
            Ok(Err(e)) => {
                tracing::warn!(protocol = %protocol, error = %e, "Cannot reap plugin process");
            }
            Err(_) => {
                tracing::warn!(protocol = %protocol, "Plugin process still alive after kill");
            }
        }

        self.processes.release(protocol);
    }

    async fn running_client(&self, protocol: &str) -> Option<Arc<PluginClient>> {
        let instances = self.instances.lock().await;
        instances
            .get(protocol)
            .filter(|instance| instance.state() == PluginState::Running)
            .and_then(|instance| instance.client.clone())
    }

    /// Protocol ids of running plugins, sorted
    pub async fn get_available_protocols(&self) -> Vec<String> {
        let instances = self.instances.lock().await;
        let mut protocols: Vec<String> = instances
            .iter()
            .filter(|(protocol, instance)| {
                instance.state() == PluginState::Running && !self.processes.was_killed(protocol)
            })
            .map(|(protocol, _)| protocol.clone())
            .collect();
        protocols.sort();
        protocols
    }

    /// Account form schema of every discovered protocol
    pub fn get_protocol_schemas(&self) -> &BTreeMap<String, ProtocolSchema> {
        &self.schemas
    }

    /// Lifecycle state; `Stopped` for discovered plugins never started
    pub async fn get_plugin_state(&self, protocol: &str) -> Option<PluginState> {
        let instances = self.instances.lock().await;
        match instances.get(protocol) {
            Some(instance) => Some(instance.state()),
            None => self.registry.get(protocol).map(|_| PluginState::Stopped),
        }
    }

    /// Runtime snapshot of a plugin
    pub async fn get_plugin_info(&self, protocol: &str) -> Option<PluginInfo> {
        let instances = self.instances.lock().await;
        match instances.get(protocol) {
            Some(instance) => Some(instance.info()),
            None => self
                .registry
                .get(protocol)
                .map(|entry| PluginInstance::new(entry).info()),
        }
    }

    /// Capabilities reported by the running process, else those declared in
    /// the descriptor
    pub async fn get_plugin_capabilities(&self, protocol: &str) -> Option<CapabilityDescriptor> {
        let instances = self.instances.lock().await;
        let reported = instances
            .get(protocol)
            .and_then(|instance| instance.capabilities.clone());

        reported.or_else(|| {
            self.registry
                .get(protocol)
                .map(|entry| entry.metadata.capabilities.clone())
        })
    }

    /// Reason of the last crash
    pub async fn last_error(&self, protocol: &str) -> Option<String> {
        let instances = self.instances.lock().await;
        instances
            .get(protocol)
            .and_then(|instance| instance.last_error.clone())
    }

    /// Bring an account up on a running plugin
    ///
    /// Never errors: returns `false` when a required credential is missing,
    /// the plugin is not running, the RPC fails, or the plugin rejects the
    /// credentials.
    pub async fn initialize_plugin_account(
        &self,
        protocol: &str,
        account_id: &str,
        display_name: &str,
        credentials: HashMap<String, String>,
    ) -> bool {
        self.initialize_account(AccountConfig {
            protocol: protocol.to_string(),
            account_id: account_id.to_string(),
            display_name: display_name.to_string(),
            credentials,
            settings: HashMap::new(),
        })
        .await
    }

    /// Like [`initialize_plugin_account`](Self::initialize_plugin_account),
    /// with settings
    pub async fn initialize_account(&self, account: AccountConfig) -> bool {
        let protocol = account.protocol.as_str();

        let Some(entry) = self.registry.get(protocol) else {
            tracing::warn!(protocol = %protocol, "Cannot initialize account for unknown protocol");
            return false;
        };

        let missing = entry.metadata.missing_credentials(|key| {
            account
                .credentials
                .get(key)
                .map_or(false, |value| !value.is_empty())
        });
        if !missing.is_empty() {
            tracing::warn!(
                protocol = %protocol,
                account_id = %account.account_id,
                missing = ?missing,
                "Missing required credentials"
            );
            return false;
        }

        let Some(client) = self.running_client(protocol).await else {
            tracing::warn!(protocol = %protocol, "Cannot initialize account, plugin not running");
            return false;
        };

        match client.initialize(&account).await {
            Ok(response) if response.initialized => {
                tracing::info!(protocol = %protocol, account_id = %account.account_id, "Account initialized");
                true
            }
            Ok(response) => {
                tracing::warn!(
                    protocol = %protocol,
                    account_id = %account.account_id,
                    message = %response.message,
                    "Plugin rejected account"
                );
                false
            }
            Err(e) => {
                tracing::error!(protocol = %protocol, error = %e, "Account initialization failed");
                false
            }
        }
    }

    /// Place a call through a running plugin
    ///
    /// The plugin's success flag and message are passed through unchanged.
    pub async fn start_call(&self, protocol: &str, request: CallStartRequest) -> CallStartResponse {
        let Some(client) = self.running_client(protocol).await else {
            return CallStartResponse::failure(format!("plugin {} is not running", protocol));
        };

        match client.start_call(&request).await {
            Ok(response) => {
                tracing::info!(
                    protocol = %protocol,
                    call_id = %request.call_id,
                    success = response.success,
                    "Call start forwarded"
                );
                response
            }
            Err(e) => {
                tracing::error!(protocol = %protocol, call_id = %request.call_id, error = %e, "Call start failed");
                CallStartResponse::failure(e.to_string())
            }
        }
    }

    /// Hang up a call through a running plugin
    pub async fn end_call(&self, protocol: &str, request: CallEndRequest) -> CallEndResponse {
        let Some(client) = self.running_client(protocol).await else {
            return CallEndResponse::failure(format!("plugin {} is not running", protocol));
        };

        match client.end_call(&request).await {
            Ok(response) => {
                tracing::info!(protocol = %protocol, call_id = %request.call_id, "Call end forwarded");
                response
            }
            Err(e) => {
                tracing::error!(protocol = %protocol, call_id = %request.call_id, error = %e, "Call end failed");
                CallEndResponse::failure(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins_root", &self.config.plugins_root)
            .field("registered", &self.registry.len())
            .field("shutdown_requested", &self.is_shutdown_requested())
            .finish()
    }
}

/// Launch a plugin process in its working directory with `PORT` set
fn spawn_process(metadata: &PluginMetadata, dir: &Path) -> std::io::Result<Child> {
    let cwd = dir.join(&metadata.executable.working_directory);

    let (program, args) = metadata.executable.command.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")
    })?;

    // "./plugin" and "bin/plugin" resolve against the plugin directory,
    // bare names go through PATH
    let program_path = Path::new(program);
    let program = if program_path.is_relative() && program_path.components().count() > 1 {
        cwd.join(program_path)
    } else {
        PathBuf::from(program)
    };

    Command::new(program)
        .args(args)
        .current_dir(&cwd)
        .env(PORT_ENV, metadata.rpc.port.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}
