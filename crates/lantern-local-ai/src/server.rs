//! Process manager for llama-server.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::LlamaCppClient;
use crate::error::LocalAIError;
use crate::paths;
use crate::DEFAULT_PORT;

/// GPU layer count that offloads every layer llama.cpp can place on the device.
pub const ALL_GPU_LAYERS: u32 = 999;

/// Context window passed to llama-server.
pub const CTX_SIZE: u32 = 8192;

/// Manager for one llama-server process serving one model.
pub struct LlamaCppServer {
    binary: PathBuf,
    model: PathBuf,
    port: u16,
    gpu_layers: u32,
    process: Option<Child>,
}

impl LlamaCppServer {
    /// Create a server manager for `model` using the located llama-server binary.
    pub fn new(model: impl Into<PathBuf>) -> Result<Self, LocalAIError> {
        let binary = paths::find_llama_server().ok_or_else(|| {
            LocalAIError::ServerBinaryNotFound(
                paths::bundled_llama_server_path().display().to_string(),
            )
        })?;
        Ok(Self::with_binary(binary, model))
    }

    /// Create a server manager with an explicit binary.
    pub fn with_binary(binary: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            port: DEFAULT_PORT,
            gpu_layers: 0,
            process: None,
        }
    }

    /// Set a custom port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Number of layers to offload to the accelerator; `0` is CPU-only.
    pub fn with_gpu_layers(mut self, layers: u32) -> Self {
        self.gpu_layers = layers;
        self
    }

    /// Get the port this server is configured to use.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn model(&self) -> &Path {
        &self.model
    }

    /// Start the llama-server process.
    pub fn start(&mut self) -> Result<(), LocalAIError> {
        if !self.model.is_file() {
            return Err(LocalAIError::ModelFileMissing {
                id: self.model.display().to_string(),
                path: self.model.clone(),
            });
        }

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        info!(
            "Starting llama-server on port {} with model {:?} ({} GPU layers)",
            self.port, self.model, self.gpu_layers
        );

        let child = Command::new(&self.binary)
            .arg("--model")
            .arg(&self.model)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--ctx-size")
            .arg(CTX_SIZE.to_string())
            .arg("--batch-size")
            .arg("512")
            .arg("--threads")
            .arg(threads.to_string())
            .arg("--n-gpu-layers")
            .arg(self.gpu_layers.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LocalAIError::ServerStartFailed(e.to_string()))?;

        debug!("llama-server process started with PID: {}", child.id());
        self.process = Some(child);

        Ok(())
    }

    /// Wait for the server to become ready, failing fast if the process exits.
    ///
    /// Our own child is checked before every health probe, so a foreign
    /// process answering on the same port never counts as ready.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<(), LocalAIError> {
        let client = self.client();
        let start = std::time::Instant::now();
        let check_interval = Duration::from_millis(250);

        debug!("Waiting for llama-server to become ready...");

        while start.elapsed() < timeout {
            match self.process.as_mut().map(Child::try_wait) {
                Some(Ok(None)) => {}
                Some(Ok(Some(status))) => {
                    self.process = None;
                    return Err(LocalAIError::ServerDied(status.to_string()));
                }
                Some(Err(e)) => {
                    self.process = None;
                    return Err(LocalAIError::ServerDied(e.to_string()));
                }
                None => return Err(LocalAIError::ServerDied("process not started".to_string())),
            }

            if client.check_health().await.is_ok() {
                info!("llama-server ready after {:?}", start.elapsed());
                return Ok(());
            }

            sleep(check_interval).await;
        }

        Err(LocalAIError::ServerStartTimeout)
    }

    /// Stop the server process.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.process.take() {
            info!("Stopping llama-server (PID: {})", child.id());

            // Try graceful shutdown first
            #[cfg(unix)]
            {
                unsafe {
                    libc::kill(child.id() as i32, libc::SIGTERM);
                }
                std::thread::sleep(Duration::from_millis(300));
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Server exited with status: {:?}", status);
                }
                Ok(None) => {
                    warn!("Server didn't exit gracefully, killing...");
                    let _ = child.kill();
                    let _ = child.wait();
                }
                Err(e) => {
                    warn!("Error checking server status: {}", e);
                    let _ = child.kill();
                }
            }
        }
    }

    /// Get a client connected to this server.
    pub fn client(&self) -> LlamaCppClient {
        LlamaCppClient::with_port(self.port)
    }
}

/// A port on 127.0.0.1 that nothing was listening on a moment ago.
pub fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

impl Drop for LlamaCppServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubServer;

    #[test]
    fn test_server_config() {
        let server = LlamaCppServer::with_binary("/bin/llama-server", "/m/x.gguf")
            .with_port(9999)
            .with_gpu_layers(ALL_GPU_LAYERS);
        assert_eq!(server.port(), 9999);
        assert_eq!(server.gpu_layers, ALL_GPU_LAYERS);
        assert_eq!(server.model(), Path::new("/m/x.gguf"));
    }

    #[test]
    fn test_start_requires_model_file() {
        let mut server = LlamaCppServer::with_binary("/bin/true", "/definitely/missing.gguf");
        let err = server.start().unwrap_err();
        assert!(matches!(err, LocalAIError::ModelFileMissing { .. }));
    }

    #[tokio::test]
    async fn test_wait_ready_requires_a_started_process() {
        let mut server = LlamaCppServer::with_binary("/bin/true", "/m/x.gguf");
        let err = server.wait_ready(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LocalAIError::ServerDied(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_foreign_server_on_port_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("x.gguf");
        std::fs::write(&model, b"gguf").unwrap();

        // Something else already answers health checks on the port.
        let other = StubServer::start(200, r#"{"status":"ok"}"#).await;
        let port: u16 = other.url.rsplit(':').next().unwrap().parse().unwrap();

        let mut server = LlamaCppServer::with_binary("/bin/false", &model).with_port(port);
        server.start().unwrap();
        let child = server.process.as_mut().unwrap();
        while child.try_wait().unwrap().is_none() {
            std::thread::sleep(Duration::from_millis(10));
        }

        let err = server.wait_ready(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, LocalAIError::ServerDied(_)), "{err:?}");
        assert!(server.process.is_none());
    }

    #[test]
    fn test_free_port_is_bindable() {
        let port = free_port().unwrap();
        assert_ne!(port, 0);
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }
}
