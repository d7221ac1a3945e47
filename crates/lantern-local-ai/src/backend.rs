//! Model loading seam between the engine and llama.cpp.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::client::{CompletionParams, LlamaCppClient};
use crate::error::LocalAIError;
use crate::server::{free_port, LlamaCppServer, ALL_GPU_LAYERS};

/// How long a freshly started llama-server may take to load its weights.
pub const READY_TIMEOUT: Duration = Duration::from_secs(120);

/// A model resident in memory and ready to generate.
///
/// Dropping the handle releases the model.
#[async_trait]
pub trait LoadedModel: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams)
        -> Result<String, LocalAIError>;
}

/// Loads weights from disk into a [`LoadedModel`].
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, path: &Path, use_gpu: bool) -> Result<Box<dyn LoadedModel>, LocalAIError>;
}

/// Loader that runs each model in a dedicated llama-server process on a
/// free local port.
#[derive(Debug, Clone, Default)]
pub struct LlamaServerLoader;

impl LlamaServerLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelLoader for LlamaServerLoader {
    async fn load(&self, path: &Path, use_gpu: bool) -> Result<Box<dyn LoadedModel>, LocalAIError> {
        let layers = if use_gpu { ALL_GPU_LAYERS } else { 0 };
        let mut server = LlamaCppServer::new(path)?
            .with_port(free_port()?)
            .with_gpu_layers(layers);

        server.start()?;
        if let Err(e) = server.wait_ready(READY_TIMEOUT).await {
            server.stop();
            return Err(e);
        }

        debug!("Model {:?} served on port {}", path, server.port());
        let client = server.client();
        Ok(Box::new(ServerModel { server, client }))
    }
}

/// A model held by a running llama-server.
struct ServerModel {
    // Kept for its Drop, which stops the process.
    #[allow(dead_code)]
    server: LlamaCppServer,
    client: LlamaCppClient,
}

#[async_trait]
impl LoadedModel for ServerModel {
    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, LocalAIError> {
        self.client.complete(prompt, params).await
    }
}
