//! Shared utilities for integration tests.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rpc_resilience::config::{ProviderConfig, ResilienceConfig};
use rpc_resilience::queue::Attempt;
use rpc_resilience::{OperationError, Provider};

/// Minimal JSON-RPC backend. Answers every call with `"ok"` while healthy,
/// HTTP 503 otherwise.
#[derive(Clone)]
pub struct MockRpc {
    pub addr: SocketAddr,
    pub healthy: Arc<AtomicBool>,
    pub calls: Arc<AtomicU32>,
}

impl MockRpc {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mock = Self {
            addr: listener.local_addr().unwrap(),
            healthy: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicU32::new(0)),
        };

        let state = mock.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        let state = state.clone();
                        tokio::spawn(async move { state.answer(socket).await });
                    }
                    Err(_) => break,
                }
            }
        });
        mock
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    async fn answer(&self, mut socket: TcpStream) {
        if read_request(&mut socket).await.is_none() {
            return;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (status, body) = if self.healthy.load(Ordering::SeqCst) {
            ("200 OK", json!({"jsonrpc": "2.0", "id": 1, "result": "ok"}).to_string())
        } else {
            ("503 Service Unavailable", "unavailable".to_string())
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }
}

/// Read one HTTP request (headers plus Content-Length body).
async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            return Some(buf);
        }
    }
}

/// Configuration with the given providers, no background probes and no
/// metrics exporter.
pub fn config_with(providers: Vec<ProviderConfig>) -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.providers = providers;
    config.health_check.enabled = false;
    config.observability.metrics_enabled = false;
    config
}

pub fn provider(name: &str, priority: u32) -> ProviderConfig {
    let mut p = ProviderConfig::new(name, format!("http://{}.invalid", name));
    p.priority = priority;
    p
}

/// A JSON-RPC call through the chosen provider, returning `result`.
pub fn rpc_attempt(client: reqwest::Client, method: &'static str) -> impl Attempt {
    move |provider: Arc<Provider>| {
        let request = provider
            .post(&client)
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": method}));
        async move {
            let response = request.send().await?.error_for_status()?;
            let body: Value = response.json().await?;
            Ok::<_, OperationError>(body["result"].clone())
        }
    }
}
