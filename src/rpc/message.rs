//! Control RPC message types
//!
//! Every exchange is one JSON object per line:
//!
//! ```text
//! core   → plugin   {"id":7,"method":"start_call","params":{...}}
//! plugin → core     {"id":7,"result":{"success":true,"message":"ringing"}}
//!                   {"id":7,"error":"unknown contact"}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin::CapabilityDescriptor;

/// Health probe
pub const METHOD_HEALTH: &str = "health";
/// Capability query (also the startup probe)
pub const METHOD_CAPABILITIES: &str = "capabilities";
/// Account initialization / credential validation
pub const METHOD_INITIALIZE: &str = "initialize";
/// Call initiation
pub const METHOD_START_CALL: &str = "start_call";
/// Call control: hang up
pub const METHOD_END_CALL: &str = "end_call";
/// Graceful shutdown request
pub const METHOD_SHUTDOWN: &str = "shutdown";

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Response envelope; exactly one of `result` / `error` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Health probe answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(default)]
    pub message: String,
}

/// Account to bring up on a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub protocol: String,
    pub account_id: String,
    pub display_name: String,
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

/// Answer to [`METHOD_INITIALIZE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub initialized: bool,
    #[serde(default)]
    pub message: String,
}

/// Outgoing call request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallStartRequest {
    pub call_id: String,
    pub target_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_capabilities: Option<CapabilityDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_capabilities: Option<CapabilityDescriptor>,
}

/// Answer to [`METHOD_START_CALL`], passed through to the caller unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStartResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_stream_url: Option<String>,
}

impl CallStartResponse {
    /// Failure result produced locally when the plugin could not be asked
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            remote_stream_url: None,
        }
    }
}

/// Hang-up request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallEndRequest {
    pub call_id: String,
    #[serde(default)]
    pub reason: String,
}

/// Answer to [`METHOD_END_CALL`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEndResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl CallEndResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
