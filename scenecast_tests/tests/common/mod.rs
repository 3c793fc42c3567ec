//! Shared helpers for socket-level tests.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use futures_util::StreamExt;
use scenecast_server::{pool::PoolStatus, BroadcastPool};
use scenecast_shared::config::PoolConfig;
use tokio::{io::AsyncReadExt, net::TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Ephemeral port, short poll interval.
pub fn test_config(connect_timeout_ms: u64) -> PoolConfig {
    PoolConfig {
        first_port: 0,
        max_attempts: 1,
        poll_interval_ms: 10,
        connect_timeout_ms,
        ..Default::default()
    }
}

pub fn start_pool(connect_timeout_ms: u64) -> anyhow::Result<BroadcastPool> {
    Ok(BroadcastPool::with_config(&test_config(connect_timeout_ms))?)
}

pub async fn connect(pool: &BroadcastPool) -> anyhow::Result<Client> {
    let (ws, _) = connect_async(pool.ws_url())
        .await
        .with_context(|| format!("connect {}", pool.ws_url()))?;
    Ok(ws)
}

/// Polls the pool status until `ready` holds.
pub async fn wait_for_status(
    pool: &BroadcastPool,
    ready: impl Fn(&PoolStatus) -> bool,
) -> anyhow::Result<PoolStatus> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let status = pool
            .status_async()
            .await
            .context("pool loop has stopped")?;
        if ready(&status) {
            return Ok(status);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("pool never reached the expected state, last status {status:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until the pool reports exactly `n` live connections.
pub async fn wait_for_connections(pool: &BroadcastPool, n: usize) -> anyhow::Result<()> {
    wait_for_status(pool, |s| s.live_connections == n).await?;
    Ok(())
}

/// Plain TCP connection that never sends the websocket upgrade.
pub async fn connect_raw(pool: &BroadcastPool) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect((pool.host(), pool.port()))
        .await
        .context("raw connect")?;
    Ok(stream)
}

/// True once the server side has dropped `stream`.
pub async fn closed_by_server(stream: &mut TcpStream) -> anyhow::Result<bool> {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(WAIT, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => Ok(true),
        Ok(Ok(_)) => Ok(false),
        Err(_) => bail!("server kept the socket open"),
    }
}

/// Next binary frame; control frames are skipped.
pub async fn next_binary(ws: &mut Client) -> anyhow::Result<Bytes> {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .context("timed out waiting for a frame")?
            .context("stream ended")??;
        match frame {
            Message::Binary(b) => return Ok(b),
            Message::Close(_) => bail!("server closed the connection"),
            _ => continue,
        }
    }
}

/// True if nothing arrives on `ws` within `window`.
pub async fn stays_quiet(ws: &mut Client, window: Duration) -> bool {
    tokio::time::timeout(window, ws.next()).await.is_err()
}
