//! Client side of the liveness protocol.
//!
//! Callers probe the coordinator's plain-HTTP health endpoint before sending
//! real work, retrying on a fixed delay until acknowledged. By default the
//! retry is unbounded — a caller that cares can cap it with
//! [`ProbeOptions::max_attempts`].

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub uptime: u64,
    pub peers: usize,
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Fixed delay between probes.
    pub interval: Duration,
    /// `None` retries until acknowledged.
    pub max_attempts: Option<u32>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// One probe: `GET /health` over a raw TCP connection.
pub async fn probe(addr: &str) -> Result<HealthReport> {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect to {addr}"))?;
    let request =
        format!("GET /health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw);
    let body = text
        .split("\r\n\r\n")
        .nth(1)
        .context("health response had no body")?;
    serde_json::from_str(body.trim()).context("health response was not valid JSON")
}

/// Probe on a fixed delay until the coordinator acknowledges.
pub async fn wait_until_ready(addr: &str, options: ProbeOptions) -> Result<HealthReport> {
    let mut attempts = 0u32;
    loop {
        match probe(addr).await {
            Ok(report) if report.status == "ok" => return Ok(report),
            Ok(report) => debug!(status = %report.status, "coordinator not ready"),
            Err(e) => debug!(err = %e, "liveness probe failed"),
        }
        attempts += 1;
        if let Some(cap) = options.max_attempts {
            if attempts >= cap {
                bail!("coordinator not ready after {attempts} probe(s)");
            }
        }
        tokio::time::sleep(options.interval).await;
    }
}
