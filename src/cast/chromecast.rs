//! Chromecast reference provider
//!
//! Devices come from a [`DeviceBrowser`]; a session holds an open connection to
//! the device's control port. Frames are staged per session on a watch channel
//! ([`ChromecastProvider::frame_feed`]) for a downstream media pipeline that
//! encodes them and serves a stream URL to the device. The cast protocol has
//! no raw-frame push, so until that pipeline exists the device itself receives
//! nothing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::error::{Error, Result};
use crate::streaming::VideoFrame;

use super::config::{CastDevice, ChromecastConfig};
use super::provider::CastProvider;
use super::target::{CastSession, CastState, CastTarget, Technology};

/// Platform discovery mechanism for cast devices
#[async_trait]
pub trait DeviceBrowser: Send + Sync {
    /// One browse pass
    async fn browse(&self) -> Result<Vec<CastDevice>>;
}

/// Browser over a fixed device list
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    devices: Vec<CastDevice>,
}

impl StaticBrowser {
    pub fn new(devices: Vec<CastDevice>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceBrowser for StaticBrowser {
    async fn browse(&self) -> Result<Vec<CastDevice>> {
        Ok(self.devices.clone())
    }
}

/// Latest staged frame of a session
pub type FrameFeed = watch::Receiver<Option<VideoFrame>>;

struct ActiveCast {
    session: CastSession,
    control: TcpStream,
    feed: watch::Sender<Option<VideoFrame>>,
}

/// Chromecast provider
pub struct ChromecastProvider {
    config: ChromecastConfig,
    browser: Box<dyn DeviceBrowser>,
    devices: Mutex<HashMap<String, CastDevice>>,
    sessions: Mutex<HashMap<String, ActiveCast>>,
}

impl ChromecastProvider {
    /// Provider browsing the devices listed in `config`
    pub fn new(config: ChromecastConfig) -> Self {
        let browser = StaticBrowser::new(config.devices.clone());
        Self::with_browser(config, browser)
    }

    /// Provider with a custom discovery mechanism
    pub fn with_browser(config: ChromecastConfig, browser: impl DeviceBrowser + 'static) -> Self {
        Self {
            config,
            browser: Box::new(browser),
            devices: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Target id for a device
    pub fn target_id(device: &CastDevice) -> String {
        format!("chromecast_{}", device.uuid)
    }

    fn target_for(device: &CastDevice) -> CastTarget {
        let mut target = CastTarget::new(Self::target_id(device), &device.name, Technology::Chromecast)
            .with_info("host", &device.host)
            .with_info("port", device.port.to_string())
            .with_info("uuid", &device.uuid);
        if let Some(ref model) = device.model {
            target = target.with_info("model", model);
        }
        target
    }

    /// Subscribe to the frames staged for a session
    pub async fn frame_feed(&self, session_id: &str) -> Option<FrameFeed> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|active| active.feed.subscribe())
    }

    async fn connect(&self, device: &CastDevice) -> Result<TcpStream> {
        let addr = (device.host.as_str(), device.port);
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::Cast(format!(
                "cannot reach {} at {}:{}: {}",
                device.name, device.host, device.port, e
            ))),
            Err(_) => Err(Error::Cast(format!(
                "timed out reaching {} at {}:{}",
                device.name, device.host, device.port
            ))),
        }
    }
}

/// Check the control connection without blocking
fn control_alive(control: &TcpStream) -> Result<()> {
    let mut buf = [0u8; 512];
    match control.try_read(&mut buf) {
        Ok(0) => Err(Error::Cast("device closed the control connection".into())),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

#[async_trait]
impl CastProvider for ChromecastProvider {
    fn technology(&self) -> Technology {
        Technology::Chromecast
    }

    fn provider_name(&self) -> &str {
        "Chromecast Provider"
    }

    async fn initialize(&self) -> bool {
        tracing::info!(
            static_devices = self.config.devices.len(),
            "Chromecast provider initialized"
        );
        true
    }

    async fn discover_targets(&self) -> Vec<CastTarget> {
        let browsed = self.browser.browse().await;

        let mut devices = self.devices.lock().await;
        match browsed {
            Ok(found) => {
                for device in found {
                    let target_id = Self::target_id(&device);
                    if !devices.contains_key(&target_id) {
                        tracing::info!(
                            target_id = %target_id,
                            name = %device.name,
                            host = %device.host,
                            "Discovered Chromecast"
                        );
                    }
                    devices.insert(target_id, device);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, known = devices.len(), "Chromecast browse failed");
            }
        }

        let mut targets: Vec<CastTarget> = devices.values().map(Self::target_for).collect();
        targets.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        targets
    }

    async fn start_cast(&self, target: &CastTarget, call_id: &str) -> Result<String> {
        let device = {
            let devices = self.devices.lock().await;
            devices.get(&target.target_id).cloned()
        };
        let Some(device) = device else {
            return Err(Error::Cast(format!("Chromecast {} not discovered", target.target_id)));
        };

        let control = self.connect(&device).await?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let (feed, _) = watch::channel(None);

        let session = CastSession::new(&session_id, call_id, target.clone());
        self.sessions.lock().await.insert(
            session_id.clone(),
            ActiveCast {
                session,
                control,
                feed,
            },
        );

        tracing::info!(
            session_id = %session_id,
            call_id = %call_id,
            device = %device.name,
            "Chromecast session started"
        );
        Ok(session_id)
    }

    async fn send_frame(&self, session_id: &str, frame: &VideoFrame) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(active) = sessions.get_mut(session_id) else {
            return Err(Error::Cast(format!("unknown Chromecast session {}", session_id)));
        };

        if let Err(e) = control_alive(&active.control) {
            active.session.record_failure(e.to_string());
            return Err(e);
        }

        active.feed.send_replace(Some(frame.clone()));
        active.session.record_delivery();
        Ok(())
    }

    async fn stop_cast(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id);
        let Some(mut active) = removed else {
            return false;
        };

        active.session.state = CastState::Disconnected;
        drop(active.control);

        tracing::info!(
            session_id = %session_id,
            frames = active.session.frames_sent,
            "Chromecast session stopped"
        );
        true
    }

    async fn get_session_info(&self, session_id: &str) -> Option<CastSession> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|active| active.session.clone())
    }

    async fn cleanup(&self) {
        let session_ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for session_id in session_ids {
            self.stop_cast(&session_id).await;
        }
        self.devices.lock().await.clear();
        tracing::info!("Chromecast provider cleaned up");
    }
}

impl std::fmt::Debug for ChromecastProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromecastProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn device() -> (TcpListener, CastDevice) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = CastDevice::new("1234", "Living Room", "127.0.0.1").port(port);
        (listener, device)
    }

    struct FlakyBrowser {
        device: CastDevice,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DeviceBrowser for FlakyBrowser {
        async fn browse(&self) -> Result<Vec<CastDevice>> {
            if self.fail.load(Ordering::SeqCst) {
                Err(Error::Cast("mdns unavailable".into()))
            } else {
                Ok(vec![self.device.clone()])
            }
        }
    }

    #[tokio::test]
    async fn test_discover_static_devices() {
        let (_listener, device) = device().await;
        let provider = ChromecastProvider::new(ChromecastConfig::default().device(device.model("Chromecast")));

        let targets = provider.discover_targets().await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target_id, "chromecast_1234");
        assert_eq!(targets[0].technology, Technology::Chromecast);
        assert_eq!(targets[0].info("host"), Some("127.0.0.1"));
        assert_eq!(targets[0].info("model"), Some("Chromecast"));
    }

    #[tokio::test]
    async fn test_failed_browse_keeps_known_targets() {
        let (_listener, device) = device().await;
        let fail = Arc::new(AtomicBool::new(false));
        let browser = FlakyBrowser {
            device,
            fail: Arc::clone(&fail),
        };
        let provider = ChromecastProvider::with_browser(ChromecastConfig::default(), browser);

        assert_eq!(provider.discover_targets().await.len(), 1);

        fail.store(true, Ordering::SeqCst);
        let targets = provider.discover_targets().await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target_id, "chromecast_1234");
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (listener, device) = device().await;
        let provider = ChromecastProvider::new(ChromecastConfig::default().device(device));
        let target = provider.discover_targets().await.remove(0);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let session_id = provider.start_cast(&target, "call-1").await.unwrap();
        let _device_side = accept.await.unwrap();

        let mut feed = provider.frame_feed(&session_id).await.unwrap();
        let frame = VideoFrame::new("call-1", "cam", Bytes::from_static(b"px")).at(7);
        provider.send_frame(&session_id, &frame).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), feed.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feed.borrow().as_ref().map(|f| f.timestamp), Some(7));

        let info = provider.get_session_info(&session_id).await.unwrap();
        assert_eq!(info.state, CastState::Streaming);
        assert_eq!(info.frames_sent, 1);

        assert!(provider.stop_cast(&session_id).await);
        assert!(!provider.stop_cast(&session_id).await);
        assert!(provider.get_session_info(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_closed_device_fails_delivery() {
        let (listener, device) = device().await;
        let provider = ChromecastProvider::new(ChromecastConfig::default().device(device));
        let target = provider.discover_targets().await.remove(0);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let session_id = provider.start_cast(&target, "call-1").await.unwrap();
        drop(accept.await.unwrap());

        let frame = VideoFrame::new("call-1", "cam", Bytes::from_static(b"px"));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if provider.send_frame(&session_id, &frame).await.is_err() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "close never observed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let info = provider.get_session_info(&session_id).await.unwrap();
        assert_eq!(info.state, CastState::Error);
        assert!(info.error_message.is_some());
    }

    #[tokio::test]
    async fn test_start_cast_requires_discovery() {
        let provider = ChromecastProvider::new(ChromecastConfig::default());
        let target = CastTarget::new("chromecast_missing", "Nowhere", Technology::Chromecast);
        assert!(provider.start_cast(&target, "call-1").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        let (listener, device) = device().await;
        drop(listener);
        let provider = ChromecastProvider::new(
            ChromecastConfig::default()
                .connect_timeout(Duration::from_millis(500))
                .device(device),
        );
        let target = provider.discover_targets().await.remove(0);
        assert!(provider.start_cast(&target, "call-1").await.is_err());
    }
}
