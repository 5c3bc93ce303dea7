//! Casting
//!
//! Frames of a call can be mirrored to displays. Each casting technology is a
//! [`CastProvider`]; the [`CastingService`] owns the providers, discovered
//! targets and sessions, and routes frames from the streaming service to the
//! sessions of the matching call.
//!
//! ```text
//! VideoStreamingService ──► subscription ──► CastingService ──► CastProvider ──► device
//!                                              │
//!                                              └─ discovery loop ──► CastProvider::discover_targets
//! ```

pub mod chromecast;
pub mod config;
pub mod provider;
pub mod service;
pub mod target;

pub use chromecast::{ChromecastProvider, DeviceBrowser, FrameFeed, StaticBrowser};
pub use config::{CastDevice, CastingConfig, ChromecastConfig, CHROMECAST_PORT};
pub use provider::CastProvider;
pub use service::CastingService;
pub use target::{CastSession, CastState, CastTarget, Technology};
