mod common;

use common::{definition, TestDaemon};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next frame whose `type` matches, skipping others
async fn next_frame(socket: &mut Socket, kind: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let message = tokio::time::timeout_at(deadline, socket.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        let Ok(text) = message.to_text() else {
            continue;
        };
        let frame: Value = serde_json::from_str(text).unwrap();
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// Collect console frames until `needle` shows up
async fn wait_for_log(socket: &mut Socket, needle: &str) -> String {
    let mut seen = String::new();
    while !seen.contains(needle) {
        let frame = next_frame(socket, "console").await;
        for line in frame["data"]["logs"].as_array().unwrap() {
            seen.push_str(line.as_str().unwrap());
        }
    }
    seen
}

#[tokio::test]
async fn test_console_channel_end_to_end() {
    let test = TestDaemon::new().await;
    let workload = test
        .daemon
        .registry()
        .create(
            "echo",
            definition(json!({
                "install": [{"type": "writefile", "target": "ready.txt", "text": "ok"}],
                "run": {
                    "command": "sh",
                    "arguments": ["-c", "echo booted; while read line; do echo \"said $line\"; done"]
                }
            })),
        )
        .await
        .unwrap();
    workload
        .environment()
        .display_to_console("history before connect\n");

    let address = test.serve().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/server/echo/socket", address))
        .await
        .unwrap();

    // retained history is replayed on connect
    wait_for_log(&mut socket, "history before connect").await;

    send(&mut socket, json!({"type": "PING"})).await;
    next_frame(&mut socket, "pong").await;

    send(&mut socket, json!({"type": "install"})).await;
    wait_for_log(&mut socket, "Server installed").await;

    send(&mut socket, json!({"type": "start"})).await;
    wait_for_log(&mut socket, "booted").await;

    send(&mut socket, json!({"type": "start"})).await;
    let error = next_frame(&mut socket, "error").await;
    assert_eq!(error["data"]["code"], "already_running");

    send(&mut socket, json!({"type": "console", "command": "hi"})).await;
    wait_for_log(&mut socket, "said hi").await;

    send(&mut socket, json!({"type": "stat"})).await;
    let stat = next_frame(&mut socket, "stat").await;
    assert!(stat["data"]["memory"].as_f64().unwrap() >= 0.0);

    send(&mut socket, json!({"type": "file", "action": "get", "path": "/"})).await;
    let files = next_frame(&mut socket, "file").await;
    let names: Vec<_> = files["data"]["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"ready.txt".to_string()));

    send(&mut socket, json!({"type": "file", "action": "get", "path": "../../etc"})).await;
    let denied = next_frame(&mut socket, "file").await;
    assert!(denied["data"]["error"].is_string());

    send(&mut socket, json!({"type": "teleport"})).await;
    let unknown = next_frame(&mut socket, "error").await;
    assert_eq!(unknown["data"]["code"], "unknown_command");

    send(&mut socket, json!({"type": "kill"})).await;
    workload.environment().wait_for(Duration::from_secs(5)).await.unwrap();
    assert!(!workload.is_running().await.unwrap());

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn test_stat_sampling_does_not_delay_commands() {
    let test =
        TestDaemon::with_stats_window(tempfile::TempDir::new().unwrap(), Duration::from_secs(1)).await;
    let workload = test
        .daemon
        .registry()
        .create(
            "busy",
            definition(json!({"run": {"command": "sh", "arguments": ["-c", "echo up; sleep 30"]}})),
        )
        .await
        .unwrap();
    workload.start().await.unwrap();

    let address = test.serve().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/server/busy/socket", address))
        .await
        .unwrap();
    wait_for_log(&mut socket, "up").await;

    send(&mut socket, json!({"type": "stat"})).await;
    send(&mut socket, json!({"type": "ping"})).await;

    let mut order = Vec::new();
    while order.len() < 2 {
        let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        if let Some(kind @ ("stat" | "pong")) = frame["type"].as_str() {
            order.push(kind.to_string());
        }
    }
    assert_eq!(order, vec!["pong", "stat"]);

    workload.kill().await.unwrap();
    workload.environment().wait_for(Duration::from_secs(5)).await.unwrap();
    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn test_http_surface() {
    let test = TestDaemon::new().await;
    let address = test.serve().await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", address);

    let live: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert!(live["message"].is_string());

    let created = client
        .put(format!("{}/server/web", base))
        .json(&json!({
            "data": {"word": {"value": "hello"}},
            "run": {"command": "sh", "arguments": ["-c", "echo ${word}; sleep 30"]}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    let again = client
        .put(format!("{}/server/web", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["error"]["code"], "already_exists");

    let stats = client
        .get(format!("{}/server/web/stats", base))
        .send()
        .await
        .unwrap();
    assert_eq!(stats.status(), 409);

    let started = client
        .post(format!("{}/server/web/start", base))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), 204);

    let status: Value = client
        .get(format!("{}/server/web/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], true);

    let mut logs = String::new();
    for _ in 0..50 {
        let body: Value = client
            .get(format!("{}/server/web/logs?time=0", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        logs = body["logs"].as_str().unwrap().to_string();
        if logs.contains("hello") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(logs.contains("hello"));

    let deleted = client
        .delete(format!("{}/server/web", base))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    let missing = client
        .get(format!("{}/server/web", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}
