//! Integration tests for the postbridge-host binary.
//!
//! These tests start `postbridge-host serve` as a child process, discover its
//! port from stdout, and drive it with `postbridge-host ask`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_postbridge-host"))
}

struct ServerHandle {
    child: Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start `serve` and wait for it to announce its port.
async fn start_server() -> Result<ServerHandle, String> {
    let mut child = Command::new(binary())
        .arg("serve")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn postbridge-host: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("BRIDGE_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid BRIDGE_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read postbridge-host stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port = discovered_port
        .ok_or_else(|| "BRIDGE_PORT line not emitted by postbridge-host".to_string())?;

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(ServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

/// Run `ask` against `port` and return (success, stdout, stderr).
async fn run_ask(port: u16, extra: &[&str]) -> (bool, String, String) {
    let output = Command::new(binary())
        .arg("ask")
        .arg("--port")
        .arg(port.to_string())
        .arg("--timeout-secs")
        .arg("10")
        .args(extra)
        .output()
        .await
        .expect("failed to run postbridge-host ask");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

#[tokio::test]
async fn test_serve_announces_port() {
    let server = start_server().await.expect("server should start");
    assert_ne!(server.port, 0);
    server.stop().await;
}

#[tokio::test]
async fn test_ask_prints_echoed_reply() {
    let server = start_server().await.expect("server should start");

    let (ok, stdout, stderr) = run_ask(server.port, &["hello", "from", "the", "view"]).await;
    assert!(ok, "ask failed: {}", stderr);
    assert_eq!(stdout, "hello from the view");

    let (ok, stdout, stderr) = run_ask(server.port, &["--kind", "generate", "second prompt"]).await;
    assert!(ok, "ask failed: {}", stderr);
    assert_eq!(stdout, "second prompt");

    server.stop().await;
}

#[tokio::test]
async fn test_ask_rejects_unknown_kind() {
    let server = start_server().await.expect("server should start");

    let (ok, _stdout, stderr) = run_ask(server.port, &["--kind", "poem", "hi"]).await;
    assert!(!ok);
    assert!(stderr.contains("poem"), "unexpected stderr: {}", stderr);

    server.stop().await;
}

#[tokio::test]
async fn test_ask_without_server_fails() {
    // Grab a free port, then release it so nothing is listening there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (ok, stdout, _stderr) = run_ask(port, &["anyone there"]).await;
    assert!(!ok);
    assert!(stdout.is_empty());
}
