//! Cast provider interface

use async_trait::async_trait;

use crate::error::Result;
use crate::streaming::VideoFrame;

use super::target::{CastSession, CastTarget, Technology};

/// One casting technology
///
/// The casting service holds providers as trait objects keyed by
/// [`technology`](CastProvider::technology) and never branches on the
/// technology itself.
#[async_trait]
pub trait CastProvider: Send + Sync {
    /// Technology tag this provider serves
    fn technology(&self) -> Technology;

    /// Human readable provider name
    fn provider_name(&self) -> &str;

    /// Prepare the provider; `false` leaves it registered but unusable
    async fn initialize(&self) -> bool;

    /// Current set of reachable targets
    ///
    /// A partial failure returns what is known rather than an empty list.
    async fn discover_targets(&self) -> Vec<CastTarget>;

    /// Open a session on `target` for `call_id`, returning the session id
    async fn start_cast(&self, target: &CastTarget, call_id: &str) -> Result<String>;

    /// Deliver one frame to a session
    async fn send_frame(&self, session_id: &str, frame: &VideoFrame) -> Result<()>;

    /// Close a session; `false` if the provider did not know it or failed
    async fn stop_cast(&self, session_id: &str) -> bool;

    /// Provider-side view of a session
    async fn get_session_info(&self, session_id: &str) -> Option<CastSession>;

    /// Stop every session and release provider resources
    async fn cleanup(&self);
}
