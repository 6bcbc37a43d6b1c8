//! Hub client and heartbeat loop against a mock hub.

use httpmock::prelude::*;
use pwnhub_agent::{Agent, AgentConfig, HubClient, HubError, IdentitySources};
use pwnhub_core::Patch;
use pwnhub_core::api::{HeartbeatRequest, RegisterRequest};
use serde_json::json;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn device_json(serial: &str) -> serde_json::Value {
    json!({
        "serial": serial,
        "name": null,
        "hostname": "pwn-alpha",
        "ssh_fingerprint": null,
        "image_generation": 0,
        "handshake_count": 2,
        "last_seen": "2024-06-01T12:00:00.000000000Z",
        "last_ip": "10.67.0.2",
        "ssh_provisioned": false
    })
}

fn client(server: &MockServer) -> HubClient {
    HubClient::new(&server.base_url(), Duration::from_secs(5)).unwrap()
}

/// Agent config whose identity and capture sources live in a temp dir.
fn agent_config(server: &MockServer, dir: &TempDir, interval_secs: u64) -> AgentConfig {
    let root = dir.path();
    std::fs::write(root.join("cpuinfo"), "Serial\t\t: 00000000a1b2c3d4\n").unwrap();
    std::fs::write(root.join("hostname"), "pwn-alpha\n").unwrap();
    std::fs::create_dir_all(root.join("handshakes")).unwrap();
    std::fs::write(root.join("handshakes/one.pcap"), b"x").unwrap();
    std::fs::write(root.join("handshakes/two.cap"), b"x").unwrap();

    let mut config = AgentConfig::new(server.base_url());
    config.heartbeat_interval_secs = interval_secs;
    config.error_cooldown_secs = 1;
    config.handshake_dir = root.join("handshakes");
    config.state_file = root.join("agent-id.json");
    config.identity = IdentitySources {
        cpuinfo_path: root.join("cpuinfo"),
        device_tree_serial_path: root.join("dt-serial"),
        machine_id_path: root.join("machine-id"),
        hostname_path: root.join("hostname"),
        ssh_host_key_dir: root.join("ssh"),
    };
    config
}

#[tokio::test]
async fn test_register_returns_device() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/devices/register")
                .json_body_partial(r#"{"serial": "AA:BB", "handshake_count": 2}"#);
            then.status(200).json_body(device_json("AA:BB"));
        })
        .await;

    let device = client(&server)
        .register(&RegisterRequest {
            serial: "AA:BB".to_string(),
            handshake_count: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(device.serial, "AA:BB");
    assert_eq!(device.last_ip.as_deref(), Some("10.67.0.2"));
}

#[tokio::test]
async fn test_heartbeat_sends_only_present_fields() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/devices/heartbeat")
                .json_body(json!({"serial": "AA", "handshake_count": 7}));
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await;

    let mut request = HeartbeatRequest::new("AA");
    request.handshake_count = Patch::Value(7);
    client(&server).heartbeat(&request).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_heartbeat_unknown_device() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/devices/heartbeat");
            then.status(404)
                .json_body(json!({"code": "not_found", "message": "device ZZ is not registered"}));
        })
        .await;

    let result = client(&server).heartbeat(&HeartbeatRequest::new("ZZ")).await;
    assert!(matches!(result, Err(HubError::UnknownDevice)));
}

#[tokio::test]
async fn test_error_body_is_surfaced() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/devices/register");
            then.status(400)
                .json_body(json!({"code": "invalid_request", "message": "serial must not be empty"}));
        })
        .await;

    let err = client(&server)
        .register(&RegisterRequest::default())
        .await
        .unwrap_err();
    match err {
        HubError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(code, "invalid_request");
            assert_eq!(message, "serial must not be empty");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_non_json_error_body_falls_back_to_text() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(502).body("upstream down");
        })
        .await;

    let err = client(&server).health().await.unwrap_err();
    match err {
        HubError::Api { status, message, .. } => {
            assert_eq!(status.as_u16(), 502);
            assert_eq!(message, "upstream down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_health_ok() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await;

    client(&server).health().await.unwrap();
}

#[tokio::test]
async fn test_agent_registers_with_identity_and_capture_count() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let register = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/devices/register")
                .json_body_partial(
                    r#"{"serial": "00000000a1b2c3d4", "hostname": "pwn-alpha", "image_generation": 0, "handshake_count": 2}"#,
                );
            then.status(200).json_body(device_json("00000000a1b2c3d4"));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let agent = Arc::new(Agent::new(Arc::new(agent_config(&server, &dir, 3600))).unwrap());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let agent = agent.clone();
        let cancel = cancel.clone();
        async move { agent.run(cancel).await }
    });

    for _ in 0..50 {
        if register.hits_async().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(register.hits_async().await, 1);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("agent did not stop after cancellation")
        .unwrap();
    assert!(dir.path().join("agent-id.json").exists());
}

#[tokio::test]
async fn test_agent_reregisters_when_hub_forgets_device() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let register = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/devices/register");
            then.status(200).json_body(device_json("00000000a1b2c3d4"));
        })
        .await;
    let heartbeat = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/devices/heartbeat")
                .body_contains("handshake_count");
            then.status(404)
                .json_body(json!({"code": "not_found", "message": "unknown"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::new(Arc::new(agent_config(&server, &dir, 1))).unwrap();
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        stopper.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), agent.run(cancel))
        .await
        .expect("agent did not stop after cancellation");

    assert!(heartbeat.hits_async().await >= 1);
    assert!(register.hits_async().await >= 2);
}

#[tokio::test]
async fn test_agent_keeps_running_while_hub_is_down() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let register = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/devices/register");
            then.status(503)
                .json_body(json!({"code": "unavailable", "message": "metadata store"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::new(Arc::new(agent_config(&server, &dir, 1))).unwrap();
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        stopper.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), agent.run(cancel))
        .await
        .expect("agent did not stop during cooldown");

    // Initial attempt plus the retry on the first tick.
    assert_eq!(register.hits_async().await, 2);
}

#[tokio::test]
async fn test_agent_with_oversized_interval_starts_and_stops() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let register = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/devices/register");
            then.status(200).json_body(device_json("00000000a1b2c3d4"));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = agent_config(&server, &dir, u64::MAX);
    config.error_cooldown_secs = u64::MAX;
    let agent = Arc::new(Agent::new(Arc::new(config)).unwrap());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let agent = agent.clone();
        let cancel = cancel.clone();
        async move { agent.run(cancel).await }
    });

    for _ in 0..50 {
        if register.hits_async().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(register.hits_async().await, 1);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("agent did not stop after cancellation")
        .expect("agent task panicked");
}
