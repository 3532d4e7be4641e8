use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn binary_relays_between_tcp_clients() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line-relay");

    let (mut relay_child, mut relay_stdout) = spawn_relay(&binary).await?;
    let addr = read_relay_addr(&mut relay_stdout).await?;

    // Drain additional relay logs in the background so the pipe never fills.
    let relay_log_task = tokio::spawn(async move {
        drain_stdout(relay_stdout).await;
    });

    let mut alice = BufReader::new(TcpStream::connect(&addr).await.context("alice connect")?);
    let mut bob = BufReader::new(TcpStream::connect(&addr).await.context("bob connect")?);

    // Bob's greeting reaching Alice means both are registered.
    send_line(&mut bob, "hi").await?;
    assert_eq!(read_line_expect(&mut alice, "alice hears bob").await?, "hi");
    assert_eq!(read_line_expect(&mut bob, "bob echo").await?, "hi");

    send_line(&mut alice, "hello").await?;
    assert_eq!(read_line_expect(&mut bob, "bob hears alice").await?, "hello");
    assert_eq!(read_line_expect(&mut alice, "alice echo").await?, "hello");

    // Alice leaves; Bob keeps chatting with himself.
    send_line(&mut alice, "STOP").await?;
    let mut rest = String::new();
    let closed = timeout(READ_TIMEOUT, alice.read_line(&mut rest)).await??;
    assert_eq!(closed, 0, "alice should be disconnected, got '{rest}'");

    send_line(&mut bob, "alone now").await?;
    assert_eq!(read_line_expect(&mut bob, "bob after stop").await?, "alone now");

    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    let _ = relay_log_task.await;

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn sigint_closes_clients_and_exits_cleanly() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line-relay");

    let (mut relay_child, mut relay_stdout) = spawn_relay(&binary).await?;
    let addr = read_relay_addr(&mut relay_stdout).await?;
    let relay_log_task = tokio::spawn(drain_stdout(relay_stdout));

    let mut client = BufReader::new(TcpStream::connect(&addr).await.context("client connect")?);
    send_line(&mut client, "before shutdown").await?;
    assert_eq!(
        read_line_expect(&mut client, "echo before shutdown").await?,
        "before shutdown"
    );

    let pid = relay_child.id().context("relay has no pid")?;
    let kill = std::process::Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .status()
        .context("failed to run kill")?;
    assert!(kill.success(), "kill -INT exited with {kill}");

    let mut rest = String::new();
    let closed = timeout(READ_TIMEOUT, client.read_line(&mut rest)).await??;
    assert_eq!(closed, 0, "client should be disconnected, got '{rest}'");

    let status = timeout(READ_TIMEOUT, relay_child.wait()).await??;
    assert!(status.success(), "relay exited with {status}");

    assert!(
        TcpStream::connect(&addr).await.is_err(),
        "relay should no longer accept connections"
    );

    let _ = relay_log_task.await;
    Ok(())
}

async fn spawn_relay(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_relay_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let mut line = String::new();
    let bytes = timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| anyhow!("timed out waiting for relay banner"))??;
    if bytes == 0 {
        return Err(anyhow!("relay did not emit listening address"));
    }

    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected relay banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("relay banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn send_line(stream: &mut BufReader<TcpStream>, line: &str) -> Result<()> {
    let stream = stream.get_mut();
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn read_line_expect(stream: &mut BufReader<TcpStream>, description: &str) -> Result<String> {
    let mut line = String::new();
    let bytes = timeout(READ_TIMEOUT, stream.read_line(&mut line))
        .await
        .map_err(|_| anyhow!("{description}: timed out waiting for line"))??;
    if bytes == 0 {
        return Err(anyhow!("{description}: stream closed"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
