use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{anyhow, Context, Result};
use reqwest::StatusCode;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, Command},
    time::{sleep, timeout, Instant},
};

const BINARY: &str = env!("CARGO_BIN_EXE_transaction-log-kv");
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn state_survives_a_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("transaction.log");
    let client = reqwest::Client::new();

    // First life: write through the API.
    let (mut server, addr) = spawn_server(&log_path).await?;
    let base = format!("http://{addr}/v1");

    for (key, value) in [("a", "1"), ("a", "2")] {
        let status = client
            .put(format!("{base}/{key}"))
            .body(value)
            .send()
            .await?
            .status();
        assert_eq!(status, StatusCode::CREATED);
    }
    let status = client.delete(format!("{base}/b")).send().await?.status();
    assert_eq!(status, StatusCode::OK);
    let status = client
        .put(format!("{base}/b"))
        .body("3")
        .send()
        .await?
        .status();
    assert_eq!(status, StatusCode::CREATED);

    wait_for_lines(&log_path, 4).await?;
    let _ = server.kill().await;
    let _ = server.wait().await;

    // Second life: the replayed store answers reads.
    let (mut server, addr) = spawn_server(&log_path).await?;
    let base = format!("http://{addr}/v1");

    let a = client.get(format!("{base}/a")).send().await?;
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(a.text().await?, "2");
    let b = client.get(format!("{base}/b")).send().await?;
    assert_eq!(b.text().await?, "3");
    let missing = client.get(format!("{base}/c")).send().await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let _ = server.kill().await;
    let _ = server.wait().await;

    // The dump subcommand shows the same four events.
    let output = dump_file(&log_path).await?;
    assert!(output.status.success());
    let lines: Vec<serde_json::Value> = String::from_utf8(output.stdout)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[2],
        serde_json::json!({"sequence": 3, "kind": "DELETE", "key": "b"})
    );

    Ok(())
}

#[tokio::test]
async fn corrupt_log_prevents_serving() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("transaction.log");
    tokio::fs::write(&log_path, "1\tPUT\ta\t1\nbroken\n").await?;

    let status = timeout(
        READ_TIMEOUT,
        Command::new(BINARY)
            .arg("serve")
            .arg("--listen")
            .arg("127.0.0.1:0")
            .arg("file")
            .arg("--path")
            .arg(&log_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await
    .context("server should exit instead of serving")??;

    assert!(!status.success());
    Ok(())
}

#[tokio::test]
async fn dump_never_modifies_the_log() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("transaction.log");
    let raw = "1\tPUT\ta\t1\n2\tPUT\tb\t2";
    tokio::fs::write(&log_path, raw).await?;

    let output = dump_file(&log_path).await?;
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout)?.lines().count(), 1);
    assert_eq!(tokio::fs::read_to_string(&log_path).await?, raw);

    let missing = dir.path().join("missing.log");
    let output = dump_file(&missing).await?;
    assert!(!output.status.success());
    assert!(!missing.exists());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn sigterm_drains_pending_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("transaction.log");
    let client = reqwest::Client::new();

    let (mut server, addr) = spawn_server(&log_path).await?;
    for key in ["a", "b", "c"] {
        let status = client
            .put(format!("http://{addr}/v1/{key}"))
            .body("v")
            .send()
            .await?
            .status();
        assert_eq!(status, StatusCode::CREATED);
    }

    let pid = server.id().context("server already exited")?;
    let killed = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await?;
    assert!(killed.success());

    let status = timeout(READ_TIMEOUT, server.wait())
        .await
        .context("server did not stop on SIGTERM")??;
    assert!(status.success());
    assert_eq!(
        tokio::fs::read_to_string(&log_path).await?,
        "1\tPUT\ta\tv\n2\tPUT\tb\tv\n3\tPUT\tc\tv\n"
    );
    Ok(())
}

async fn dump_file(log_path: &Path) -> Result<std::process::Output> {
    Command::new(BINARY)
        .arg("dump")
        .arg("file")
        .arg("--path")
        .arg(log_path)
        .env("RUST_LOG", "warn")
        .output()
        .await
        .context("failed to run dump")
}

async fn spawn_server(log_path: &Path) -> Result<(Child, String)> {
    let mut cmd = Command::new(BINARY);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .arg("file")
        .arg("--path")
        .arg(log_path)
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stderr = child
        .stderr
        .take()
        .context("server stderr missing after spawn")?;
    let mut reader = BufReader::new(stderr);
    let addr = read_listen_addr(&mut reader).await?;

    // Drain additional server logs in the background so the pipe never fills.
    tokio::spawn(drain(reader));

    Ok((child, addr))
}

async fn read_listen_addr(reader: &mut BufReader<ChildStderr>) -> Result<String> {
    loop {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for listening banner"))??;
        if bytes == 0 {
            return Err(anyhow!("server exited before listening"));
        }
        if !line.contains("listening on") {
            continue;
        }
        let addr = line
            .split_whitespace()
            .last()
            .context("unexpected banner format")?;
        return Ok(addr.to_string());
    }
}

async fn drain(mut reader: BufReader<ChildStderr>) {
    let mut buffer = String::new();
    while matches!(reader.read_line(&mut buffer).await, Ok(bytes) if bytes > 0) {
        buffer.clear();
    }
}

/// Responses are sent before the writer persists, so wait for the records to land.
async fn wait_for_lines(path: &Path, expected: usize) -> Result<()> {
    let deadline = Instant::now() + READ_TIMEOUT;
    loop {
        let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        if content.lines().count() >= expected {
            return Ok(());
        }
        if Instant::now() > deadline {
            return Err(anyhow!("log holds {} records, expected {expected}", content.lines().count()));
        }
        sleep(Duration::from_millis(20)).await;
    }
}
