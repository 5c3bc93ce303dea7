//! Cast targets and sessions

use std::collections::HashMap;
use std::fmt;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Casting technology; keys the provider map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    Chromecast,
    /// Home-automation media player entity
    MediaPlayer,
    FCast,
    Miracast,
    Custom,
}

impl Technology {
    pub fn as_str(self) -> &'static str {
        match self {
            Technology::Chromecast => "chromecast",
            Technology::MediaPlayer => "media_player",
            Technology::FCast => "f_cast",
            Technology::Miracast => "miracast",
            Technology::Custom => "custom",
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A display frames can be cast to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastTarget {
    pub target_id: String,
    /// Human readable name
    pub name: String,
    pub technology: Technology,
    /// Provider-specific connection details (host, port, uuid, ...)
    #[serde(default)]
    pub connection_info: HashMap<String, String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl CastTarget {
    pub fn new(target_id: impl Into<String>, name: impl Into<String>, technology: Technology) -> Self {
        Self {
            target_id: target_id.into(),
            name: name.into(),
            technology,
            connection_info: HashMap::new(),
            enabled: true,
        }
    }

    /// Add a connection attribute
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection_info.insert(key.into(), value.into());
        self
    }

    /// Look up a connection attribute
    pub fn info(&self, key: &str) -> Option<&str> {
        self.connection_info.get(key).map(String::as_str)
    }
}

/// Lifecycle state of a cast session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastState {
    Idle,
    /// Session created, no frame delivered yet
    Connecting,
    Connected,
    /// At least one frame delivered, the last delivery succeeded
    Streaming,
    /// The last delivery failed
    Error,
    Disconnected,
}

impl CastState {
    /// Whether the dispatch loop offers frames to a session in this state
    ///
    /// `Connecting` sessions need their first frame and `Error` sessions get a
    /// chance to recover; everything else is skipped.
    pub fn accepts_frames(self) -> bool {
        matches!(self, CastState::Connecting | CastState::Streaming | CastState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CastState::Idle => "idle",
            CastState::Connecting => "connecting",
            CastState::Connected => "connected",
            CastState::Streaming => "streaming",
            CastState::Error => "error",
            CastState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for CastState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call being cast to one target
#[derive(Debug, Clone)]
pub struct CastSession {
    pub session_id: String,
    pub call_id: String,
    pub target: CastTarget,
    pub state: CastState,
    /// Wall-clock start, for display
    pub started_at: SystemTime,
    pub last_frame_at: Option<Instant>,
    pub frames_sent: u64,
    pub error_message: Option<String>,
}

impl CastSession {
    /// New session in `Connecting`
    pub fn new(session_id: impl Into<String>, call_id: impl Into<String>, target: CastTarget) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: call_id.into(),
            target,
            state: CastState::Connecting,
            started_at: SystemTime::now(),
            last_frame_at: None,
            frames_sent: 0,
            error_message: None,
        }
    }

    /// Account for a delivered frame
    pub fn record_delivery(&mut self) {
        self.frames_sent += 1;
        self.last_frame_at = Some(Instant::now());
        self.state = CastState::Streaming;
        self.error_message = None;
    }

    /// Account for a failed delivery
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.state = CastState::Error;
        self.error_message = Some(message.into());
    }
}
