//! Plugin lifecycle against real child processes
#![cfg(unix)]

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use callassist_core::plugin::{PluginManager, PluginManagerConfig, PluginState};
use callassist_core::rpc::{CallEndRequest, CallStartRequest};

use common::{eventually, process_alive, write_plugin, FakePlugin, HANGING, POLITE};

fn config(root: &std::path::Path) -> PluginManagerConfig {
    PluginManagerConfig::with_root(root)
        .probe_interval(Duration::from_millis(50))
        .connect_timeout(Duration::from_millis(200))
        .rpc_timeout(Duration::from_millis(500))
        .stop_timeout(Duration::from_secs(2))
}

fn credentials(token: &str) -> HashMap<String, String> {
    HashMap::from([("access_token".to_string(), token.to_string())])
}

#[tokio::test]
async fn test_start_delegate_and_stop() {
    let root = tempfile::tempdir().unwrap();
    let plugin = FakePlugin::spawn().await;
    write_plugin(root.path(), "matrix", "matrix", plugin.port, POLITE);

    let manager = Arc::new(PluginManager::new(config(root.path())));
    assert_eq!(manager.get_plugin_state("matrix").await, Some(PluginState::Stopped));
    assert!(manager.get_available_protocols().await.is_empty());

    assert!(manager.start("matrix").await);
    assert!(manager.start("matrix").await, "second start is a no-op");
    assert_eq!(manager.get_plugin_state("matrix").await, Some(PluginState::Running));
    assert_eq!(manager.get_available_protocols().await, vec!["matrix".to_string()]);

    // Runtime capabilities override the descriptor
    let capabilities = manager.get_plugin_capabilities("matrix").await.unwrap();
    assert_eq!(capabilities.video_codecs, vec!["VP8", "H264"]);
    assert!(capabilities.realtime_media_support);

    let schemas = manager.get_protocol_schemas();
    assert_eq!(schemas["matrix"].credential_fields[0].key, "access_token");

    assert!(
        manager
            .initialize_plugin_account("matrix", "@me:example.org", "Me", credentials("good"))
            .await
    );
    assert!(
        !manager
            .initialize_plugin_account("matrix", "@me:example.org", "Me", credentials("bad"))
            .await
    );
    assert!(
        !manager
            .initialize_plugin_account("matrix", "@me:example.org", "Me", HashMap::new())
            .await,
        "missing credentials are rejected locally"
    );

    let response = manager
        .start_call(
            "matrix",
            CallStartRequest {
                call_id: "call-1".into(),
                target_address: "@bob:example.org".into(),
                ..Default::default()
            },
        )
        .await;
    assert!(response.success);
    assert_eq!(response.message, "ringing @bob:example.org");

    let ended = manager
        .end_call(
            "matrix",
            CallEndRequest {
                call_id: "call-1".into(),
                reason: "done".into(),
            },
        )
        .await;
    assert!(ended.success);

    let pid = manager.get_plugin_info("matrix").await.unwrap().pid.unwrap();
    assert!(manager.stop("matrix").await);
    assert_eq!(manager.get_plugin_state("matrix").await, Some(PluginState::Stopped));
    assert_eq!(plugin.shutdown_requests.load(Ordering::SeqCst), 1);
    assert!(!process_alive(pid));
    assert!(manager.processes().is_empty());

    // Calls against a stopped plugin fail without an RPC
    let response = manager.start_call("matrix", CallStartRequest::default()).await;
    assert!(!response.success);
}

#[tokio::test]
async fn test_failed_probe_kills_and_crashes() {
    let root = tempfile::tempdir().unwrap();
    // Reserve a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    write_plugin(root.path(), "xmpp", "xmpp", port, POLITE);

    let manager = PluginManager::new(config(root.path()).startup_timeout(Duration::from_millis(400)));

    let started = Instant::now();
    assert!(!manager.start("xmpp").await);
    assert!(started.elapsed() < Duration::from_secs(4));

    assert_eq!(manager.get_plugin_state("xmpp").await, Some(PluginState::Crashed));
    assert!(manager.last_error("xmpp").await.unwrap().contains("timed out"));
    assert!(manager.processes().is_empty());
    assert!(manager.get_available_protocols().await.is_empty());
}

#[tokio::test]
async fn test_unhealthy_plugin_stays_crashed_until_restarted() {
    let root = tempfile::tempdir().unwrap();
    let plugin = FakePlugin::spawn().await;
    write_plugin(root.path(), "sip", "sip", plugin.port, POLITE);

    let manager = PluginManager::new(config(root.path()));
    assert!(manager.start("sip").await);
    assert!(manager.health_check("sip").await);

    plugin.healthy.store(false, Ordering::SeqCst);
    assert!(!manager.health_check("sip").await);
    assert_eq!(manager.get_plugin_state("sip").await, Some(PluginState::Crashed));
    assert!(manager.processes().is_empty());

    // Nothing brings it back on its own
    plugin.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.get_plugin_state("sip").await, Some(PluginState::Crashed));

    assert!(manager.start("sip").await);
    let info = manager.get_plugin_info("sip").await.unwrap();
    assert_eq!(info.state, PluginState::Running);
    assert_eq!(info.launches, 2);
    assert!(info.last_error.is_none());

    assert!(manager.stop("sip").await);
}

#[tokio::test]
async fn test_shutdown_all_is_bounded_with_hanging_plugins() {
    let root = tempfile::tempdir().unwrap();
    let mut plugins = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let plugin = FakePlugin::spawn().await;
        plugin.answer_shutdown.store(false, Ordering::SeqCst);
        write_plugin(root.path(), name, name, plugin.port, HANGING);
        plugins.push(plugin);
    }

    let manager = Arc::new(PluginManager::new(config(root.path())));
    assert_eq!(manager.start_all().await, 3);

    let mut pids = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        pids.push(manager.get_plugin_info(name).await.unwrap().pid.unwrap());
    }

    let timeout = Duration::from_millis(500);
    let started = Instant::now();
    manager.shutdown_all(timeout).await;
    let elapsed = started.elapsed();
    assert!(elapsed < timeout + Duration::from_secs(3), "took {:?}", elapsed);

    assert!(manager.is_shutdown_requested());
    for name in ["alpha", "beta", "gamma"] {
        assert_eq!(manager.get_plugin_state(name).await, Some(PluginState::Crashed));
    }
    assert!(manager.processes().is_empty());
    let pids = &pids;
    assert!(
        eventually(Duration::from_secs(2), || async move {
            pids.iter().all(|pid| !process_alive(*pid))
        })
        .await
    );

    // Idempotent and blocks new starts
    let again = Instant::now();
    manager.shutdown_all(timeout).await;
    assert!(again.elapsed() < Duration::from_millis(100));
    assert!(!manager.start("alpha").await);
}

#[tokio::test]
async fn test_emergency_cleanup_from_another_thread() {
    let root = tempfile::tempdir().unwrap();
    let plugin = FakePlugin::spawn().await;
    plugin.answer_shutdown.store(false, Ordering::SeqCst);
    write_plugin(root.path(), "hang", "hang", plugin.port, HANGING);

    let manager = Arc::new(PluginManager::new(config(root.path())));
    assert!(manager.start("hang").await);
    let pid = manager.get_plugin_info("hang").await.unwrap().pid.unwrap();

    // No runtime on this thread: the call must complete without awaiting
    let killed = {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || manager.emergency_cleanup())
            .join()
            .unwrap()
    };
    assert_eq!(killed, 1);
    assert!(manager.is_shutdown_requested());
    assert!(!manager.start("hang").await);

    // Killed plugins are no longer offered
    assert_eq!(manager.get_plugin_state("hang").await, Some(PluginState::Crashed));
    assert!(manager.get_available_protocols().await.is_empty());

    // The next health check reaps the process
    let reaped = eventually(Duration::from_secs(3), || {
        let manager = Arc::clone(&manager);
        async move { !manager.health_check("hang").await && manager.processes().is_empty() }
    })
    .await;
    assert!(reaped);
    assert!(!process_alive(pid));
    assert_eq!(plugin.shutdown_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_after_emergency_keeps_plugins_crashed() {
    let root = tempfile::tempdir().unwrap();
    let plugin = FakePlugin::spawn().await;
    plugin.answer_shutdown.store(false, Ordering::SeqCst);
    write_plugin(root.path(), "hang", "hang", plugin.port, HANGING);

    let manager = Arc::new(PluginManager::new(config(root.path())));
    assert!(manager.start("hang").await);
    let pid = manager.get_plugin_info("hang").await.unwrap().pid.unwrap();

    assert_eq!(manager.emergency_cleanup(), 1);
    manager.shutdown_all(Duration::from_secs(1)).await;

    let info = manager.get_plugin_info("hang").await.unwrap();
    assert_eq!(info.state, PluginState::Crashed);
    assert!(info.last_error.unwrap().contains("force-killed"));
    assert!(manager.get_available_protocols().await.is_empty());
    assert!(manager.processes().is_empty());
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_shutdown_kills_plugin_still_starting() {
    let root = tempfile::tempdir().unwrap();
    // Nobody listens here, so the probe keeps retrying
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    write_plugin(root.path(), "slow", "slow", port, POLITE);

    let manager = Arc::new(PluginManager::new(
        config(root.path())
            .probe_interval(Duration::from_secs(3))
            .startup_timeout(Duration::from_secs(10)),
    ));

    let start = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.start("slow").await })
    };

    let spawned = eventually(Duration::from_secs(2), || {
        let manager = Arc::clone(&manager);
        async move { manager.processes().pid("slow").is_some() }
    })
    .await;
    assert!(spawned);
    let pid = manager.processes().pid("slow").unwrap();
    assert_eq!(manager.get_plugin_state("slow").await, Some(PluginState::Starting));

    let started = Instant::now();
    manager.shutdown_all(Duration::from_millis(200)).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(!process_alive(pid), "starting plugin survived shutdown");
    assert!(manager.processes().is_empty());
    assert_eq!(manager.get_plugin_state("slow").await, Some(PluginState::Crashed));

    assert!(!start.await.unwrap());
}

#[tokio::test]
async fn test_concurrent_shutdown_returns_immediately() {
    let root = tempfile::tempdir().unwrap();
    let plugin = FakePlugin::spawn().await;
    plugin.answer_shutdown.store(false, Ordering::SeqCst);
    write_plugin(root.path(), "hang", "hang", plugin.port, HANGING);

    let manager = Arc::new(PluginManager::new(config(root.path())));
    assert!(manager.start("hang").await);

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.shutdown_all(Duration::from_secs(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The first call is still waiting on the hanging plugin
    let again = Instant::now();
    manager.shutdown_all(Duration::from_secs(1)).await;
    assert!(again.elapsed() < Duration::from_millis(100));
    assert!(!first.is_finished());

    first.await.unwrap();
    assert_eq!(manager.get_plugin_state("hang").await, Some(PluginState::Crashed));
    assert!(manager.processes().is_empty());
}

#[tokio::test]
async fn test_duplicate_protocol_keeps_first() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "a-matrix", "matrix", 50061, POLITE);
    write_plugin(root.path(), "b-matrix", "matrix", 50062, POLITE);
    write_plugin(root.path(), "c-xmpp", "xmpp", 50063, POLITE);
    std::fs::create_dir_all(root.path().join("d-broken")).unwrap();
    std::fs::write(root.path().join("d-broken/plugin.json"), b"{ not json").unwrap();

    let manager = PluginManager::new(config(root.path()));
    assert_eq!(manager.registered_protocols(), vec!["matrix", "xmpp"]);

    let entry = manager.registry().get("matrix").unwrap();
    assert!(entry.dir.ends_with("a-matrix"));
    assert_eq!(entry.metadata.rpc.port, 50061);
}
