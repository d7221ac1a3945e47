//! Test doubles: an in-process HTTP stub and fake model backends.
//!
//! Compiled for this crate's tests and, through the `test-util` feature,
//! for dependent crates' tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::backend::{LoadedModel, ModelLoader};
use crate::client::CompletionParams;
use crate::error::LocalAIError;
use crate::hardware::{GpuInfo, GpuProbe};

/// A one-route HTTP server answering every request with the same response.
pub struct StubServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::spawn(status, body.into(), None).await
    }

    /// Stub that advertises `declared_len` bytes but closes the connection
    /// after sending `body`.
    pub async fn truncated(body: impl Into<Vec<u8>>, declared_len: usize) -> Self {
        Self::spawn(200, body.into(), Some(declared_len)).await
    }

    async fn spawn(status: u16, body: Vec<u8>, declared_len: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let body = Arc::new(body);
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (h, r) = (hits.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                h.fetch_add(1, Ordering::SeqCst);
                let (body, r) = (body.clone(), r.clone());
                tokio::spawn(respond(socket, status, body, declared_len, r));
            }
        });

        Self {
            url,
            hits,
            requests,
        }
    }

    /// Number of accepted connections.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Raw requests received so far (head and body).
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn respond(
    mut socket: TcpStream,
    status: u16,
    body: Arc<Vec<u8>>,
    declared_len: Option<usize>,
    log: Arc<Mutex<Vec<String>>>,
) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    log.lock().unwrap().push(String::from_utf8_lossy(&buf).to_string());

    let response_head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        declared_len.unwrap_or(body.len())
    );
    socket.write_all(response_head.as_bytes()).await.ok()?;
    socket.write_all(&body).await.ok()?;
    socket.shutdown().await.ok()
}

/// Probe with a fixed answer.
pub struct FakeProbe(pub Option<GpuInfo>);

impl FakeProbe {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn gpu(name: &str) -> Self {
        Self(Some(GpuInfo {
            name: name.to_string(),
            memory_mb: 8192,
        }))
    }
}

impl GpuProbe for FakeProbe {
    fn probe(&self) -> Option<GpuInfo> {
        self.0.clone()
    }
}

/// Loader that records load attempts and hands out [`FakeModel`]s.
#[derive(Default)]
pub struct FakeLoader {
    fail_gpu: bool,
    fail_file: Option<String>,
    delay: Duration,
    loads: Mutex<Vec<(PathBuf, bool)>>,
    live: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every accelerated load fail.
    pub fn failing_gpu(mut self) -> Self {
        self.fail_gpu = true;
        self
    }

    /// Make every load of a file named `file_name` fail.
    pub fn failing_for(mut self, file_name: &str) -> Self {
        self.fail_file = Some(file_name.to_string());
        self
    }

    /// Make every completion take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(path, use_gpu)` for every load attempt, in order.
    pub fn loads(&self) -> Vec<(PathBuf, bool)> {
        self.loads.lock().unwrap().clone()
    }

    /// Models currently alive (loaded and not yet dropped).
    pub fn live_models(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of completions observed running at once.
    pub fn max_concurrent_completions(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self, path: &Path, use_gpu: bool) -> Result<Box<dyn LoadedModel>, LocalAIError> {
        self.loads.lock().unwrap().push((path.to_path_buf(), use_gpu));

        if use_gpu && self.fail_gpu {
            return Err(LocalAIError::ServerDied("CUDA error: out of memory".to_string()));
        }
        if let Some(bad) = &self.fail_file {
            if path.file_name().is_some_and(|n| n.to_string_lossy() == bad.as_str()) {
                return Err(LocalAIError::ServerStartTimeout);
            }
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeModel {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            delay: self.delay,
            live: self.live.clone(),
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
        }))
    }
}

/// Model that answers `"<file name>: ..."` with at most `max_tokens` words.
pub struct FakeModel {
    name: String,
    delay: Duration,
    live: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl LoadedModel for FakeModel {
    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, LocalAIError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let words: Vec<&str> = std::iter::once(self.name.as_str())
            .chain(prompt.split_whitespace())
            .take(params.max_tokens as usize)
            .collect();
        Ok(words.join(" "))
    }
}

impl Drop for FakeModel {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
