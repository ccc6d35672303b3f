//! Integration tests for the treerpc binary: start `treerpc serve` on an
//! auto-assigned port and talk to it with the library client and with
//! `treerpc call`.

use futures::StreamExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use treerpc::{BridgeClient, BridgeError, Value};

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_treerpc"))
}

/// Whether `/health` on `port` answers exactly `{"status": "ok"}`.
async fn is_healthy(http: &reqwest::Client, port: u16) -> bool {
    let body = async {
        http.get(format!("http://127.0.0.1:{port}/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await
    };
    matches!(body.await, Ok(body) if body == serde_json::json!({"status": "ok"}))
}

struct ServerProcess {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl ServerProcess {
    fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start `treerpc serve` and wait until `/health` answers.
async fn start_server(extra_args: &[&str]) -> Result<ServerProcess, String> {
    let mut child = tokio::process::Command::new(binary())
        .args(["serve", "--host", "127.0.0.1", "--port", "0", "--stream-interval-ms", "5"])
        .args(extra_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn treerpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut port = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    port = value.trim().parse::<u16>().ok();
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read treerpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port = port.ok_or_else(|| "RPC_PORT line not emitted by treerpc".to_string())?;
    let http = reqwest::Client::new();
    let mut healthy = false;
    for _ in 0..50 {
        if is_healthy(&http, port).await {
            healthy = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if !healthy {
        return Err(format!("treerpc failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(ServerProcess {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_demo_unary_methods() {
    let server = start_server(&[]).await.unwrap();
    let client = BridgeClient::new(&server.url()).unwrap();
    let api = client.proxy();

    assert_eq!(api.get("a").get("it").call(vec![]).await.unwrap(), Value::from("ok"));
    assert_eq!(api.get("a").get("it2").call(vec![]).await.unwrap(), Value::from("not ok"));
}

#[tokio::test]
async fn test_demo_nested_repeated_result() {
    let server = start_server(&[]).await.unwrap();
    let client = BridgeClient::new(&server.url()).unwrap();

    let result = client.call("it3", vec![]).await.unwrap();
    let items = result.as_list().unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.get("a"), Some(&Value::from("maybe ok")));
    assert_eq!(
        item.get("b"),
        Some(&Value::List(vec![Value::F32(0.0), Value::F32(1.0), Value::F32(2.0)]))
    );
    assert_eq!(item.get("c"), Some(&Value::from(vec![true, false])));
    assert_eq!(item.get("d"), Some(&Value::from(vec!["a", "b", "c"])));
    assert_eq!(
        item.get("e"),
        Some(&Value::List(vec![Value::from(&b"A"[..]), Value::from(&b"B"[..])]))
    );
}

#[tokio::test]
async fn test_demo_stream_yields_twenty_values() {
    let server = start_server(&[]).await.unwrap();
    let client = BridgeClient::new(&server.url()).unwrap();

    let values: Vec<f64> = client
        .call("st", vec![])
        .map(|item| item.unwrap().as_f64().unwrap())
        .collect()
        .await;
    assert_eq!(values, (0..20).map(f64::from).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_demo_request_stream_methods_rejected_by_client() {
    let server = start_server(&[]).await.unwrap();
    let client = BridgeClient::new(&server.url()).unwrap();

    for path in ["sum", "echo"] {
        let err = client.call(path, vec![]).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotSupported { .. }), "{path}: {err}");
    }
}

#[tokio::test]
async fn test_call_subcommand_prints_json() {
    let server = start_server(&[]).await.unwrap();
    let output = tokio::process::Command::new(binary())
        .args(["call", "--host", &server.url(), "a/it"])
        .stderr(Stdio::null())
        .output()
        .await
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"ok\"");
}

#[tokio::test]
async fn test_serve_with_custom_schema_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.json");
    let bundled = include_str!("../schema/demo.schema.json");
    std::fs::write(&path, bundled).unwrap();

    let server = start_server(&["--schema", path.to_str().unwrap()]).await.unwrap();
    let client = BridgeClient::new(&server.url()).unwrap();
    let schema = client.schema().await.unwrap();
    assert!(schema.method_by_name("srv", "st").is_some());
}

#[tokio::test]
async fn test_serve_fails_on_schema_missing_a_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.json");
    std::fs::write(&path, r#"{"nested": {}}"#).unwrap();

    let status = tokio::process::Command::new(binary())
        .args(["serve", "--port", "0", "--schema", path.to_str().unwrap()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .unwrap();
    assert!(!status.success());
}
