//! Plugin control RPC client
//!
//! One persistent TCP connection per plugin, shared by all callers. Requests
//! are serialized over the connection; a call that times out or hits a
//! transport error drops the connection, and the next call reconnects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::RpcError;
use crate::plugin::CapabilityDescriptor;

use super::message::*;

/// Upper bound on a single response line
const MAX_LINE: usize = 1024 * 1024;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: SocketAddr, timeout: Duration) -> Result<Self, RpcError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::Transport(format!("connect to {} timed out", addr)))?
            .map_err(|e| RpcError::Transport(format!("connect to {}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    async fn exchange(&mut self, request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        let mut line =
            serde_json::to_vec(request).map_err(|e| RpcError::Malformed(e.to_string()))?;
        line.push(b'\n');

        let transport = |e: std::io::Error| RpcError::Transport(e.to_string());
        self.writer.write_all(&line).await.map_err(transport)?;
        self.writer.flush().await.map_err(transport)?;

        let mut buf = String::new();
        loop {
            buf.clear();
            let n = (&mut self.reader)
                .take(MAX_LINE as u64 + 1)
                .read_line(&mut buf)
                .await
                .map_err(transport)?;
            if n == 0 {
                return Err(RpcError::Transport("connection closed by plugin".into()));
            }
            if n > MAX_LINE {
                return Err(RpcError::Malformed(format!(
                    "response line exceeds {} bytes",
                    MAX_LINE
                )));
            }

            let response: RpcResponse = serde_json::from_str(buf.trim_end())
                .map_err(|e| RpcError::Malformed(e.to_string()))?;

            // Answers to requests that already timed out
            if response.id != request.id {
                tracing::debug!(expected = request.id, got = response.id, "Discarding stale RPC response");
                continue;
            }

            return Ok(response);
        }
    }
}

/// RPC stub for one plugin
pub struct PluginClient {
    addr: SocketAddr,
    connect_timeout: Duration,
    rpc_timeout: Duration,
    next_id: AtomicU64,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient")
            .field("addr", &self.addr)
            .field("rpc_timeout", &self.rpc_timeout)
            .finish()
    }
}

impl PluginClient {
    /// Connect to a plugin's control port
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Result<Self, RpcError> {
        let conn = Connection::open(addr, connect_timeout).await?;

        Ok(Self {
            addr,
            connect_timeout,
            rpc_timeout,
            next_id: AtomicU64::new(1),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Plugin address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Invoke `method` with the default RPC timeout
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.rpc_timeout).await
    }

    /// Invoke `method`, failing with [`RpcError::Timeout`] after `timeout`
    pub async fn call_with_timeout<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RpcError::Malformed(e.to_string()))?;
        let request = RpcRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };

        let mut slot = self.conn.lock().await;
        let result = match tokio::time::timeout(timeout, self.exchange_on(&mut slot, &request)).await
        {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                timeout,
            }),
        };

        if result.is_err() {
            // Connection state is unknown after a failed exchange
            *slot = None;
        }
        drop(slot);

        let response = result?;
        match (response.result, response.error) {
            (_, Some(message)) => Err(RpcError::Remote {
                method: method.to_string(),
                message,
            }),
            (result, None) => serde_json::from_value(result.unwrap_or(Value::Null))
                .map_err(|e| RpcError::Malformed(format!("{}: {}", method, e))),
        }
    }

    async fn exchange_on(
        &self,
        slot: &mut Option<Connection>,
        request: &RpcRequest,
    ) -> Result<RpcResponse, RpcError> {
        if slot.is_none() {
            tracing::debug!(addr = %self.addr, "Reconnecting to plugin");
            *slot = Some(Connection::open(self.addr, self.connect_timeout).await?);
        }

        match slot.as_mut() {
            Some(conn) => conn.exchange(request).await,
            None => Err(RpcError::Transport("connection unavailable".into())),
        }
    }

    /// Health probe
    pub async fn health(&self, timeout: Duration) -> Result<HealthStatus, RpcError> {
        self.call_with_timeout(METHOD_HEALTH, &Value::Null, timeout)
            .await
    }

    /// Capability query
    pub async fn capabilities(&self) -> Result<CapabilityDescriptor, RpcError> {
        self.call(METHOD_CAPABILITIES, &Value::Null).await
    }

    /// Validate credentials and bring an account up
    pub async fn initialize(&self, account: &AccountConfig) -> Result<InitializeResponse, RpcError> {
        self.call(METHOD_INITIALIZE, account).await
    }

    /// Place a call
    pub async fn start_call(&self, request: &CallStartRequest) -> Result<CallStartResponse, RpcError> {
        self.call(METHOD_START_CALL, request).await
    }

    /// Hang up a call
    pub async fn end_call(&self, request: &CallEndRequest) -> Result<CallEndResponse, RpcError> {
        self.call(METHOD_END_CALL, request).await
    }

    /// Ask the plugin to exit
    pub async fn shutdown(&self) -> Result<(), RpcError> {
        let _: Value = self.call(METHOD_SHUTDOWN, &Value::Null).await?;
        Ok(())
    }
}
