//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use callassist_core::rpc::{RpcRequest, RpcResponse};

/// Plugin that ignores SIGTERM and never exits on its own
pub const HANGING: &[&str] = &["sh", "-c", "trap '' TERM; exec sleep 30"];

/// Plugin that exits on SIGTERM
pub const POLITE: &[&str] = &["sleep", "30"];

/// In-test stand-in for a plugin's control endpoint
///
/// The plugin "process" is a plain `sleep`; this server answers its RPCs.
#[derive(Clone)]
pub struct FakePlugin {
    pub port: u16,
    pub healthy: Arc<AtomicBool>,
    pub answer_shutdown: Arc<AtomicBool>,
    pub shutdown_requests: Arc<AtomicUsize>,
}

impl FakePlugin {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let plugin = Self {
            port: listener.local_addr().unwrap().port(),
            healthy: Arc::new(AtomicBool::new(true)),
            answer_shutdown: Arc::new(AtomicBool::new(true)),
            shutdown_requests: Arc::new(AtomicUsize::new(0)),
        };

        let server = plugin.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let server = server.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let Ok(request) = serde_json::from_str::<RpcRequest>(&line) else {
                            break;
                        };
                        if let Some(response) = server.answer(&request) {
                            let mut out = serde_json::to_vec(&response).unwrap();
                            out.push(b'\n');
                            if write.write_all(&out).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        plugin
    }

    fn answer(&self, request: &RpcRequest) -> Option<RpcResponse> {
        let id = request.id;
        let result = match request.method.as_str() {
            "health" => json!({
                "healthy": self.healthy.load(Ordering::SeqCst),
                "message": "",
            }),
            "capabilities" => capabilities(),
            "initialize" => {
                let token = request.params["credentials"]["access_token"].as_str();
                json!({
                    "initialized": token == Some("good"),
                    "message": if token == Some("good") { "ok" } else { "invalid token" },
                })
            }
            "start_call" => json!({
                "success": true,
                "message": format!("ringing {}", request.params["target_address"].as_str().unwrap_or("")),
            }),
            "end_call" => json!({ "success": true, "message": "hung up" }),
            "shutdown" => {
                self.shutdown_requests.fetch_add(1, Ordering::SeqCst);
                if !self.answer_shutdown.load(Ordering::SeqCst) {
                    return None;
                }
                json!({ "stopping": true })
            }
            other => return Some(RpcResponse::err(id, format!("unknown method {}", other))),
        };
        Some(RpcResponse::ok(id, result))
    }
}

/// Capabilities the fake plugin reports at runtime
pub fn capabilities() -> Value {
    json!({
        "video_codecs": ["VP8", "H264"],
        "audio_codecs": ["OPUS"],
        "supported_resolutions": [{ "width": 1280, "height": 720, "framerate": 30 }],
        "realtime_media_support": true,
    })
}

/// Write `<root>/<dir>/plugin.json`
pub fn write_plugin(root: &Path, dir: &str, protocol: &str, port: u16, command: &[&str]) {
    let plugin_dir = root.join(dir);
    std::fs::create_dir_all(&plugin_dir).unwrap();

    let descriptor = json!({
        "name": format!("{} plugin", protocol),
        "protocol": protocol,
        "version": "0.1.0",
        "executable": { "type": "binary", "command": command },
        "grpc": { "port": port, "health_check_timeout": 1, "startup_timeout": 5 },
        "capabilities": {
            "video_codecs": ["H264"],
            "audio_codecs": ["OPUS"],
            "supported_resolutions": [{ "width": 640, "height": 480, "framerate": 15 }],
            "realtime_media_support": false,
        },
        "required_credentials": ["access_token"],
        "optional_settings": ["display_name"],
    });

    std::fs::write(
        plugin_dir.join("plugin.json"),
        serde_json::to_vec_pretty(&descriptor).unwrap(),
    )
    .unwrap();
}

/// Poll `check` every 20ms until it holds or `within` elapses
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Whether a process with `pid` still exists and is not a zombie
pub fn process_alive(pid: u32) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // State follows the parenthesised command name
        let state = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next());
        return state != Some("Z");
    }
    // Signal 0 only checks existence
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
