//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use resilient_http::observability::StatsSink;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Scripted reply of the mock backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delay: Duration,
}

impl MockResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Handle to a running mock backend.
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockBackend {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests fully received so far.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Bodies of every received request, in arrival order.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().unwrap().clone()
    }
}

/// Start a backend answering the n-th request (0-based) with `f(n)`.
pub async fn start_programmable_backend<F>(f: F) -> MockBackend
where
    F: Fn(u32) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicU32::new(0)),
        bodies: Arc::new(Mutex::new(Vec::new())),
    };
    let f = Arc::new(f);

    let state = backend.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    let state = state.clone();
                    tokio::spawn(async move {
                        serve_one(socket, state, f).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    backend
}

/// Start a backend replaying `script` in order, repeating the last entry.
pub async fn start_scripted_backend(script: Vec<MockResponse>) -> MockBackend {
    assert!(!script.is_empty());
    start_programmable_backend(move |n| script[(n as usize).min(script.len() - 1)].clone()).await
}

async fn serve_one<F>(mut socket: TcpStream, state: MockBackend, f: Arc<F>)
where
    F: Fn(u32) -> MockResponse,
{
    let Some(body) = read_request(&mut socket).await else {
        return;
    };
    state.bodies.lock().unwrap().push(body);
    let n = state.hits.fetch_add(1, Ordering::SeqCst);

    let reply = f(n);
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let reason = StatusCode::from_u16(reply.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reason,
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(reply.body.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Read one request head plus its `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(buf[head_end..].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A port with nothing listening on it.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

/// `StatsSink` keeping every counter and histogram sample in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    counters: Mutex<HashMap<&'static str, u64>>,
    samples: Mutex<HashMap<&'static str, Vec<f64>>>,
    modules: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn samples(&self, name: &str) -> Vec<f64> {
        self.samples
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Every `pkg` label value seen.
    pub fn modules(&self) -> Vec<String> {
        self.modules.lock().unwrap().clone()
    }

    fn note_labels(&self, labels: &[(&'static str, String)]) {
        let mut modules = self.modules.lock().unwrap();
        for (key, value) in labels {
            if *key == "pkg" && !modules.contains(value) {
                modules.push(value.clone());
            }
        }
    }
}

impl StatsSink for RecordingSink {
    fn increment(&self, name: &'static str, value: u64, labels: &[(&'static str, String)]) {
        *self.counters.lock().unwrap().entry(name).or_default() += value;
        self.note_labels(labels);
    }

    fn record_seconds(&self, name: &'static str, seconds: f64, labels: &[(&'static str, String)]) {
        self.samples
            .lock()
            .unwrap()
            .entry(name)
            .or_default()
            .push(seconds);
        self.note_labels(labels);
    }
}
