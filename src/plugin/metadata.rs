//! Plugin descriptor types
//!
//! Each plugin directory carries a `plugin.json` descriptor:
//!
//! ```text
//! {
//!   "name": "Matrix",
//!   "protocol": "matrix",
//!   "executable": { "type": "node", "command": ["node", "dist/index.js"] },
//!   "grpc": { "port": 50061 },
//!   "capabilities": {
//!     "video_codecs": ["VP8", "H264"],
//!     "audio_codecs": ["OPUS"],
//!     "supported_resolutions": [{ "width": 1280, "height": 720, "framerate": 30 }],
//!     "realtime_media_support": true
//!   },
//!   "required_credentials": ["homeserver", "access_token"]
//! }
//! ```
//!
//! The parsed [`PluginMetadata`] is immutable and shared behind an `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Descriptor file name looked up in every plugin directory
pub const DESCRIPTOR_FILE: &str = "plugin.json";

const SECRET_WORDS: [&str; 4] = ["password", "token", "secret", "key"];

/// Runtime used to launch the plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Node.js script
    Node,
    /// Python module or script
    Python,
    /// Native executable
    Binary,
}

/// How to launch the plugin process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableSpec {
    /// Runtime tag
    #[serde(rename = "type")]
    pub runtime: RuntimeKind,
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Working directory relative to the plugin directory
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

/// Control RPC settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Port the plugin listens on (loopback)
    pub port: u16,
    /// Health RPC timeout in seconds
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout: u64,
    /// Startup probe budget in seconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: u64,
}

fn default_health_check_timeout() -> u64 {
    5
}

fn default_startup_timeout() -> u64 {
    30
}

impl RpcSettings {
    /// Health RPC timeout
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout)
    }

    /// Startup probe budget
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout)
    }
}

/// A supported video mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

/// Media capabilities declared by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Video codec names (e.g. "VP8")
    pub video_codecs: Vec<String>,
    /// Audio codec names (e.g. "OPUS")
    pub audio_codecs: Vec<String>,
    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
    /// Whether the plugin carries real-time media (WebRTC or similar)
    #[serde(alias = "webrtc_support")]
    pub realtime_media_support: bool,
    /// Free-form feature tags
    #[serde(default)]
    pub features: Vec<String>,
}

/// Input type of a credential or setting field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    #[default]
    String,
    Password,
    Url,
    Integer,
    Boolean,
    Select,
}

/// Credential or setting field with UI metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: String,
    /// Mask the value in forms and logs
    #[serde(default)]
    pub sensitive: bool,
    /// Choices for [`FieldType::Select`]
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub validation_pattern: String,
}

impl FieldDefinition {
    /// Build a required credential field from a bare key
    ///
    /// Keys that look secret (`password`, `token`, `secret`, `key`) become
    /// sensitive password fields.
    pub fn credential(key: &str) -> Self {
        let lowered = key.to_lowercase();
        let secret = SECRET_WORDS.iter().any(|w| lowered.contains(w));
        let words = key.replace('_', " ");

        Self {
            key: key.to_string(),
            display_name: title_case(&words),
            description: format!("Enter your {}", words),
            field_type: if secret {
                FieldType::Password
            } else {
                FieldType::String
            },
            required: true,
            default_value: String::new(),
            sensitive: secret,
            allowed_values: Vec::new(),
            placeholder: String::new(),
            validation_pattern: String::new(),
        }
    }

    /// Build an optional string setting from a bare key
    pub fn setting(key: &str) -> Self {
        let words = key.replace('_', " ");

        Self {
            key: key.to_string(),
            display_name: title_case(&words),
            description: format!("Configure {}", words),
            field_type: FieldType::String,
            required: false,
            default_value: String::new(),
            sensitive: false,
            allowed_values: Vec::new(),
            placeholder: String::new(),
            validation_pattern: String::new(),
        }
    }
}

fn title_case(words: &str) -> String {
    words
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Immutable metadata for one protocol plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Display name
    pub name: String,
    /// Protocol id (unique key)
    pub protocol: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub executable: ExecutableSpec,
    #[serde(rename = "grpc")]
    pub rpc: RpcSettings,
    pub capabilities: CapabilityDescriptor,
    /// Credential keys that must be supplied when initializing an account
    #[serde(default)]
    pub required_credentials: Vec<String>,
    #[serde(default)]
    pub optional_settings: Vec<String>,
    #[serde(default)]
    pub credential_fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub setting_fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub example_account_ids: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PluginMetadata {
    /// Load and validate a descriptor file
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_slice(&raw, path)
    }

    /// Parse and validate descriptor bytes; `path` is used for error reporting
    pub fn from_slice(raw: &[u8], path: &Path) -> Result<Self, ConfigurationError> {
        let metadata: PluginMetadata =
            serde_json::from_slice(raw).map_err(|e| ConfigurationError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        metadata.validated(path)
    }

    fn validated(mut self, path: &Path) -> Result<Self, ConfigurationError> {
        let empty = |field| ConfigurationError::EmptyField {
            path: path.to_path_buf(),
            field,
        };

        if self.protocol.trim().is_empty() {
            return Err(empty("protocol"));
        }
        if self.name.trim().is_empty() {
            return Err(empty("name"));
        }
        if self.executable.command.is_empty() || self.executable.command[0].is_empty() {
            return Err(empty("executable.command"));
        }
        if self.rpc.port == 0 {
            return Err(empty("grpc.port"));
        }

        // Rich field definitions win over the bare key lists
        if self.credential_fields.is_empty() {
            self.credential_fields = self
                .required_credentials
                .iter()
                .map(|k| FieldDefinition::credential(k))
                .collect();
        }
        if self.setting_fields.is_empty() {
            self.setting_fields = self
                .optional_settings
                .iter()
                .map(|k| FieldDefinition::setting(k))
                .collect();
        }
        if self.example_account_ids.is_empty() {
            self.example_account_ids = vec![
                format!("user@{}.example.com", self.protocol),
                "example_user".to_string(),
            ];
        }

        Ok(self)
    }

    /// Derive the form schema exposed to the configuration collaborator
    pub fn schema(&self) -> ProtocolSchema {
        ProtocolSchema {
            protocol: self.protocol.clone(),
            display_name: self.name.clone(),
            description: self.description.clone(),
            credential_fields: self.credential_fields.clone(),
            setting_fields: self.setting_fields.clone(),
            example_account_ids: self.example_account_ids.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    /// Credential keys from `required_credentials` absent in `supplied`
    pub fn missing_credentials<'a, I>(&'a self, supplied: I) -> Vec<&'a str>
    where
        I: Fn(&str) -> bool,
    {
        self.required_credentials
            .iter()
            .filter(|k| !supplied(k.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Account form schema for one protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSchema {
    pub protocol: String,
    pub display_name: String,
    pub description: String,
    pub credential_fields: Vec<FieldDefinition>,
    pub setting_fields: Vec<FieldDefinition>,
    pub example_account_ids: Vec<String>,
    pub capabilities: CapabilityDescriptor,
}
