//! Plugin control RPC
//!
//! Newline-delimited JSON over a loopback TCP connection to each plugin's
//! declared port. The core is always the client; plugins only answer.

pub mod client;
pub mod message;

pub use client::PluginClient;
pub use message::{
    AccountConfig, CallEndRequest, CallEndResponse, CallStartRequest, CallStartResponse,
    HealthStatus, InitializeResponse, RpcRequest, RpcResponse,
};
