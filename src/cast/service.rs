//! Casting service
//!
//! Holds one provider per technology, the discovered targets, and the active
//! sessions. Two background loops run between [`CastingService::initialize`]
//! and [`CastingService::cleanup`]: frame dispatch, fed by a subscription on
//! the streaming service, and periodic target discovery.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::streaming::{FrameSubscription, SubscriptionId, VideoFrame, VideoStreamingService};

use super::config::CastingConfig;
use super::provider::CastProvider;
use super::target::{CastSession, CastTarget, Technology};

struct Background {
    cancel: CancellationToken,
    subscription_id: SubscriptionId,
    dispatch: JoinHandle<()>,
    discovery: JoinHandle<()>,
}

/// Routes call frames to cast sessions
pub struct CastingService {
    config: CastingConfig,
    video: Arc<VideoStreamingService>,
    providers: RwLock<HashMap<Technology, Arc<dyn CastProvider>>>,
    targets: RwLock<HashMap<String, CastTarget>>,
    sessions: RwLock<HashMap<String, CastSession>>,
    background: Mutex<Option<Background>>,
}

impl CastingService {
    /// Create a service with default configuration
    pub fn new(video: Arc<VideoStreamingService>) -> Self {
        Self::with_config(video, CastingConfig::default())
    }

    /// Create a service with custom configuration
    pub fn with_config(video: Arc<VideoStreamingService>, config: CastingConfig) -> Self {
        Self {
            config,
            video,
            providers: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            background: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CastingConfig {
        &self.config
    }

    /// Register a provider, replacing any previous one for its technology
    pub async fn register_provider(&self, provider: Arc<dyn CastProvider>) {
        let technology = provider.technology();
        tracing::info!(
            provider = provider.provider_name(),
            technology = %technology,
            "Cast provider registered"
        );

        if let Some(previous) = self.providers.write().await.insert(technology, provider) {
            tracing::warn!(
                provider = previous.provider_name(),
                technology = %technology,
                "Replaced cast provider"
            );
        }
    }

    fn provider_snapshot(providers: &HashMap<Technology, Arc<dyn CastProvider>>) -> Vec<Arc<dyn CastProvider>> {
        providers.values().cloned().collect()
    }

    async fn provider_for(&self, technology: Technology) -> Option<Arc<dyn CastProvider>> {
        self.providers.read().await.get(&technology).cloned()
    }

    /// Initialize providers and start the dispatch and discovery loops
    ///
    /// A provider that fails to initialize stays registered. Calling this
    /// twice is a no-op.
    pub async fn initialize(self: &Arc<Self>) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            tracing::debug!("Casting service already initialized");
            return;
        }

        let providers = Self::provider_snapshot(&*self.providers.read().await);
        for provider in &providers {
            if provider.initialize().await {
                tracing::info!(provider = provider.provider_name(), "Cast provider initialized");
            } else {
                tracing::error!(provider = provider.provider_name(), "Cast provider failed to initialize");
            }
        }

        let subscription = self.video.subscribe().await;
        let subscription_id = subscription.id();
        let cancel = CancellationToken::new();

        let dispatch = tokio::spawn(Arc::clone(self).dispatch_loop(subscription, cancel.child_token()));
        let discovery = tokio::spawn(Arc::clone(self).discovery_loop(cancel.child_token()));

        *background = Some(Background {
            cancel,
            subscription_id,
            dispatch,
            discovery,
        });

        tracing::info!(providers = providers.len(), "Casting service initialized");
    }

    /// Whether the background loops are running
    pub async fn is_initialized(&self) -> bool {
        self.background.lock().await.is_some()
    }

    async fn dispatch_loop(self: Arc<Self>, mut subscription: FrameSubscription, cancel: CancellationToken) {
        tracing::debug!(subscription_id = subscription.id(), "Cast dispatch started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = subscription.recv() => match frame {
                    Some(frame) => {
                        self.dispatch_frame(&frame).await;
                    }
                    None => {
                        tracing::warn!("Frame feed closed");
                        break;
                    }
                },
            }
        }
        tracing::debug!("Cast dispatch stopped");
    }

    async fn discovery_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let (_, failures) = tokio::select! {
                _ = cancel.cancelled() => break,
                pass = self.discovery_pass() => pass,
            };

            let wait = if failures > 0 {
                self.config.discovery_error_backoff
            } else {
                self.config.discovery_interval
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::debug!("Cast discovery stopped");
    }

    /// Deliver a frame to every matching session
    ///
    /// Returns how many sessions accepted it.
    async fn dispatch_frame(&self, frame: &VideoFrame) -> usize {
        let candidates: Vec<(String, Technology)> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.call_id == frame.call_id && s.state.accepts_frames())
                .map(|s| (s.session_id.clone(), s.target.technology))
                .collect()
        };

        let mut delivered = 0;
        for (session_id, technology) in candidates {
            let result = match self.provider_for(technology).await {
                Some(provider) => provider.send_frame(&session_id, frame).await,
                None => Err(crate::error::Error::Cast(format!("no provider for {}", technology))),
            };

            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(&session_id) else {
                continue;
            };

            match result {
                Ok(()) => {
                    delivered += 1;
                    session.record_delivery();
                    let every = self.config.progress_log_every;
                    if every > 0 && session.frames_sent % every == 0 {
                        tracing::info!(
                            session_id = %session_id,
                            frames = session.frames_sent,
                            target = %session.target.name,
                            "Cast progress"
                        );
                    }
                }
                Err(e) => {
                    if session.error_message.is_none() {
                        tracing::warn!(session_id = %session_id, error = %e, "Frame delivery failed");
                    }
                    session.record_failure(e.to_string());
                }
            }
        }
        delivered
    }

    async fn discovery_pass(&self) -> (Vec<CastTarget>, usize) {
        let providers = Self::provider_snapshot(&*self.providers.read().await);

        let mut found = Vec::new();
        let mut failures = 0;
        for provider in providers {
            match tokio::time::timeout(self.config.discovery_timeout, provider.discover_targets()).await {
                Ok(targets) => {
                    tracing::debug!(
                        provider = provider.provider_name(),
                        count = targets.len(),
                        "Cast targets discovered"
                    );
                    found.extend(targets);
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(
                        provider = provider.provider_name(),
                        timeout_ms = self.config.discovery_timeout.as_millis() as u64,
                        "Cast discovery timed out"
                    );
                }
            }
        }

        let mut registry = self.targets.write().await;
        for target in &found {
            registry.insert(target.target_id.clone(), target.clone());
        }

        (found, failures)
    }

    /// Run one discovery pass now
    ///
    /// Returns the targets found in this pass; the registry keeps earlier ones.
    pub async fn discover_targets(&self) -> Vec<CastTarget> {
        self.discovery_pass().await.0
    }

    /// Every known target, sorted by id
    pub async fn get_targets(&self) -> Vec<CastTarget> {
        let mut targets: Vec<CastTarget> = self.targets.read().await.values().cloned().collect();
        targets.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        targets
    }

    /// Start casting `call_id` to a known target
    ///
    /// Returns the new session id, or `None` if the target is unknown or
    /// disabled, no provider serves it, or the provider fails.
    pub async fn start_cast(&self, target_id: &str, call_id: &str) -> Option<String> {
        let target = self.targets.read().await.get(target_id).cloned();
        let Some(target) = target else {
            tracing::error!(target_id = %target_id, "Cast target not found");
            return None;
        };

        if !target.enabled {
            tracing::warn!(target_id = %target_id, "Cast target disabled");
            return None;
        }

        let Some(provider) = self.provider_for(target.technology).await else {
            tracing::error!(technology = %target.technology, "No cast provider for technology");
            return None;
        };

        match provider.start_cast(&target, call_id).await {
            Ok(session_id) => {
                tracing::info!(
                    session_id = %session_id,
                    call_id = %call_id,
                    target = %target.name,
                    "Cast session started"
                );
                self.sessions
                    .write()
                    .await
                    .insert(session_id.clone(), CastSession::new(&session_id, call_id, target));
                Some(session_id)
            }
            Err(e) => {
                tracing::error!(target = %target.name, call_id = %call_id, error = %e, "Failed to start cast");
                None
            }
        }
    }

    /// Stop a session
    ///
    /// The session is forgotten whatever the provider answers; the return
    /// value is the provider's result, `false` for an unknown session.
    pub async fn stop_cast(&self, session_id: &str) -> bool {
        let technology = self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.target.technology);
        let Some(technology) = technology else {
            tracing::warn!(session_id = %session_id, "Cast session not found");
            return false;
        };

        let stopped = match self.provider_for(technology).await {
            Some(provider) => provider.stop_cast(session_id).await,
            None => {
                tracing::error!(session_id = %session_id, technology = %technology, "No provider for session");
                false
            }
        };

        if let Some(session) = self.sessions.write().await.remove(session_id) {
            if stopped {
                tracing::info!(session_id = %session_id, frames = session.frames_sent, "Cast session stopped");
            } else {
                tracing::error!(session_id = %session_id, "Provider failed to stop cast session");
            }
        }
        stopped
    }

    /// Active sessions, oldest first
    pub async fn get_active_sessions(&self) -> Vec<CastSession> {
        let mut sessions: Vec<CastSession> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    pub async fn get_session_info(&self, session_id: &str) -> Option<CastSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Stop the loops, every session and every provider
    ///
    /// Waits for both loops to finish before touching sessions.
    pub async fn cleanup(&self) {
        tracing::info!("Cleaning up casting service");

        let background = self.background.lock().await.take();
        if let Some(background) = background {
            background.cancel.cancel();
            for (name, handle) in [("dispatch", background.dispatch), ("discovery", background.discovery)] {
                if let Err(e) = handle.await {
                    tracing::error!(task = name, error = %e, "Cast loop ended abnormally");
                }
            }
            self.video.unsubscribe(background.subscription_id).await;
        }

        let session_ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for session_id in session_ids {
            self.stop_cast(&session_id).await;
        }

        let providers = Self::provider_snapshot(&*self.providers.read().await);
        for provider in providers {
            provider.cleanup().await;
        }

        tracing::info!("Casting service cleanup complete");
    }
}

impl std::fmt::Debug for CastingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastingService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cast::target::CastState;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider that accepts everything and can be told to fail deliveries
    #[derive(Default)]
    struct MockProvider {
        fail_frames: AtomicBool,
        stop_result: AtomicBool,
        started: AtomicUsize,
        cleaned: AtomicBool,
    }

    #[async_trait]
    impl CastProvider for MockProvider {
        fn technology(&self) -> Technology {
            Technology::Custom
        }

        fn provider_name(&self) -> &str {
            "Mock Provider"
        }

        async fn initialize(&self) -> bool {
            true
        }

        async fn discover_targets(&self) -> Vec<CastTarget> {
            vec![CastTarget::new("mock_1", "Mock Display", Technology::Custom)]
        }

        async fn start_cast(&self, _target: &CastTarget, _call_id: &str) -> Result<String> {
            let n = self.started.fetch_add(1, Ordering::SeqCst);
            Ok(format!("session-{}", n))
        }

        async fn send_frame(&self, _session_id: &str, _frame: &VideoFrame) -> Result<()> {
            if self.fail_frames.load(Ordering::SeqCst) {
                Err(Error::Cast("display asleep".into()))
            } else {
                Ok(())
            }
        }

        async fn stop_cast(&self, _session_id: &str) -> bool {
            self.stop_result.load(Ordering::SeqCst)
        }

        async fn get_session_info(&self, _session_id: &str) -> Option<CastSession> {
            None
        }

        async fn cleanup(&self) {
            self.cleaned.store(true, Ordering::SeqCst);
        }
    }

    async fn service() -> (Arc<CastingService>, Arc<MockProvider>) {
        let video = Arc::new(VideoStreamingService::new());
        let service = Arc::new(CastingService::new(video));
        let provider = Arc::new(MockProvider::default());
        service.register_provider(provider.clone()).await;
        (service, provider)
    }

    fn frame(call_id: &str) -> VideoFrame {
        VideoFrame::new(call_id, "cam", Bytes::from_static(b"frame"))
    }

    #[tokio::test]
    async fn test_start_cast_unknown_target() {
        let (service, _) = service().await;
        assert!(service.start_cast("missing", "call-1").await.is_none());
        assert!(service.get_active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_cast_without_provider() {
        let video = Arc::new(VideoStreamingService::new());
        let service = CastingService::new(video);
        service
            .targets
            .write()
            .await
            .insert("cc".into(), CastTarget::new("cc", "TV", Technology::Chromecast));

        assert!(service.start_cast("cc", "call-1").await.is_none());
        assert!(service.get_active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_target() {
        let (service, provider) = service().await;
        let mut target = CastTarget::new("off", "Off", Technology::Custom);
        target.enabled = false;
        service.targets.write().await.insert("off".into(), target);

        assert!(service.start_cast("off", "call-1").await.is_none());
        assert_eq!(provider.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_routing_by_call_and_state() {
        let (service, provider) = service().await;
        service.discover_targets().await;

        let s1 = service.start_cast("mock_1", "call-1").await.unwrap();
        let s2 = service.start_cast("mock_1", "call-2").await.unwrap();

        assert_eq!(service.dispatch_frame(&frame("call-1")).await, 1);
        assert_eq!(service.get_session_info(&s1).await.unwrap().frames_sent, 1);
        assert_eq!(service.get_session_info(&s2).await.unwrap().frames_sent, 0);

        provider.fail_frames.store(true, Ordering::SeqCst);
        assert_eq!(service.dispatch_frame(&frame("call-1")).await, 0);
        let info = service.get_session_info(&s1).await.unwrap();
        assert_eq!(info.state, CastState::Error);
        assert_eq!(info.error_message.as_deref(), Some("Cast error: display asleep"));

        provider.fail_frames.store(false, Ordering::SeqCst);
        assert_eq!(service.dispatch_frame(&frame("call-1")).await, 1);
        let info = service.get_session_info(&s1).await.unwrap();
        assert_eq!(info.state, CastState::Streaming);
        assert_eq!(info.frames_sent, 2);
    }

    #[tokio::test]
    async fn test_stop_cast_always_forgets_session() {
        let (service, provider) = service().await;
        service.discover_targets().await;
        let session_id = service.start_cast("mock_1", "call-1").await.unwrap();

        provider.stop_result.store(false, Ordering::SeqCst);
        assert!(!service.stop_cast(&session_id).await);
        assert!(service.get_session_info(&session_id).await.is_none());

        assert!(!service.stop_cast("unknown").await);
    }

    #[tokio::test]
    async fn test_initialize_and_cleanup() {
        let (service, provider) = service().await;
        service.initialize().await;
        service.initialize().await;
        assert!(service.is_initialized().await);
        assert_eq!(service.video.subscriber_count().await, 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while service.get_targets().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "discovery never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.start_cast("mock_1", "call-1").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), service.cleanup())
            .await
            .unwrap();

        assert!(!service.is_initialized().await);
        assert!(service.get_active_sessions().await.is_empty());
        assert!(provider.cleaned.load(Ordering::SeqCst));
        assert_eq!(service.video.subscriber_count().await, 0);
    }
}
