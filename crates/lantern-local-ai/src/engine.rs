//! Local inference engine.
//!
//! The engine owns at most one loaded model. Nothing is loaded at
//! construction; the first inference call probes the hardware and loads
//! the active model, trying an accelerated load first and falling back to
//! CPU once if that fails. All operations that touch the loaded model run
//! under one async mutex, so inference and model switches never overlap.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{LlamaServerLoader, LoadedModel, ModelLoader};
use crate::client::CompletionParams;
use crate::error::LocalAIError;
use crate::hardware::{GpuInfo, GpuProbe, NvidiaSmiProbe};
use crate::model::{ModelManager, ProgressFn};
use crate::prompt::{self, Prompt};
use crate::registry::{ModelRegistry, ModelSpec};
use crate::DEFAULT_MODEL_ID;

/// Snapshot of the engine for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub model_id: String,
    pub model_name: String,
    pub model_path: PathBuf,
    /// `None` until the hardware has been probed.
    pub hardware: Option<Option<GpuInfo>>,
    pub use_gpu: bool,
    pub loaded: bool,
}

struct EngineState {
    spec: ModelSpec,
    model_path: PathBuf,
    hardware: Option<Option<GpuInfo>>,
    use_gpu: bool,
    /// Set once an accelerated load has failed; later loads go straight to CPU.
    gpu_failed: bool,
    loaded: Option<Box<dyn LoadedModel>>,
}

/// Engine running quantized models on this machine.
pub struct LocalEngine {
    registry: Arc<ModelRegistry>,
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn GpuProbe>,
    state: Mutex<EngineState>,
}

impl LocalEngine {
    /// Create an engine for `model_id`, or the default model when `None`.
    ///
    /// Only resolves the model entry and path; the weights need not exist yet.
    pub async fn new(
        registry: Arc<ModelRegistry>,
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn GpuProbe>,
        model_id: Option<&str>,
    ) -> Result<Self, LocalAIError> {
        let spec = match model_id {
            Some(id) => registry.get(id).await?,
            None => default_spec(&registry).await?,
        };
        let model_path = registry.model_path(&spec);
        debug!("Local engine targets '{}' at {:?}", spec.id, model_path);

        Ok(Self {
            registry,
            loader,
            probe,
            state: Mutex::new(EngineState {
                spec,
                model_path,
                hardware: None,
                use_gpu: false,
                gpu_failed: false,
                loaded: None,
            }),
        })
    }

    /// Create an engine backed by llama-server and `nvidia-smi` detection.
    pub async fn with_llama_server(
        registry: Arc<ModelRegistry>,
        model_id: Option<&str>,
    ) -> Result<Self, LocalAIError> {
        Self::new(
            registry,
            Arc::new(LlamaServerLoader::new()),
            Arc::new(NvidiaSmiProbe::new()),
            model_id,
        )
        .await
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Id of the active model.
    pub async fn model_id(&self) -> String {
        self.state.lock().await.spec.id.clone()
    }

    /// Spec and on-disk path of the active model.
    pub async fn target(&self) -> (ModelSpec, PathBuf) {
        let state = self.state.lock().await;
        (state.spec.clone(), state.model_path.clone())
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        EngineStatus {
            model_id: state.spec.id.clone(),
            model_name: state.spec.name.clone(),
            model_path: state.model_path.clone(),
            hardware: state.hardware.clone(),
            use_gpu: state.use_gpu,
            loaded: state.loaded.is_some(),
        }
    }

    /// Run a raw prompt, loading the active model first if needed.
    pub async fn run(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LocalAIError> {
        let params = CompletionParams::new(max_tokens, temperature);
        let mut state = self.state.lock().await;

        let model = match state.loaded.take() {
            Some(model) => model,
            None => self.load(&mut state).await?,
        };
        let model = state.loaded.insert(model);

        let started = std::time::Instant::now();
        let text = model.complete(prompt, &params).await?;
        debug!(
            "Local completion: {} chars in {:?}",
            text.len(),
            started.elapsed()
        );
        Ok(text)
    }

    /// Run a prepared [`Prompt`] with its own token budget.
    pub async fn run_prompt(&self, prompt: &Prompt) -> Result<String, LocalAIError> {
        self.run(&prompt.text, prompt.max_tokens, prompt.temperature)
            .await
    }

    /// Explain a file from (possibly long) content.
    pub async fn analyze_file(&self, path: &Path, content: &str) -> Result<String, LocalAIError> {
        self.run_prompt(&prompt::file_prompt(path, content)).await
    }

    /// Explain a directory from a prebuilt manifest.
    pub async fn analyze_directory(
        &self,
        path: &Path,
        manifest: &str,
    ) -> Result<String, LocalAIError> {
        self.run_prompt(&prompt::directory_prompt(path, manifest))
            .await
    }

    /// Answer a general question with optional context.
    pub async fn ask(&self, question: &str, context: Option<&str>) -> Result<String, LocalAIError> {
        self.run_prompt(&prompt::ask_prompt(question, context)).await
    }

    /// Download the active model's weights if they are not on disk yet.
    ///
    /// The engine lock is not held during the transfer.
    pub async fn download_model(
        &self,
        manager: &ModelManager,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<PathBuf, LocalAIError> {
        let (spec, path) = self.target().await;
        manager.download(&spec, &path, progress).await
    }

    /// Make `id` the active model and load it.
    ///
    /// Validation happens before anything is released, so a failed switch
    /// leaves the current model in place. If the new weights fail to load,
    /// the previous model stays the target and is reloaded on next use.
    pub async fn switch_model(&self, id: &str) -> Result<(), LocalAIError> {
        let mut state = self.state.lock().await;
        if state.spec.id == id {
            debug!("Model '{}' already active", id);
            return Ok(());
        }

        let spec = self.registry.get(id).await?;
        let path = self.registry.model_path(&spec);
        if !path.is_file() {
            return Err(LocalAIError::ModelFileMissing {
                id: spec.id,
                path,
            });
        }

        info!("Switching local model '{}' -> '{}'", state.spec.id, spec.id);
        if state.loaded.take().is_some() {
            debug!("Released model '{}'", state.spec.id);
        }
        let previous_spec = std::mem::replace(&mut state.spec, spec);
        let previous_path = std::mem::replace(&mut state.model_path, path);

        match self.load(&mut state).await {
            Ok(model) => {
                state.loaded = Some(model);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Loading '{}' failed; staying on '{}' (reloaded on next use)",
                    state.spec.id, previous_spec.id
                );
                state.spec = previous_spec;
                state.model_path = previous_path;
                Err(e)
            }
        }
    }

    /// Drop the loaded model, if any. The next call reloads it.
    pub async fn unload(&self) {
        let mut state = self.state.lock().await;
        if state.loaded.take().is_some() {
            info!("Unloaded local model '{}'", state.spec.id);
        }
    }

    /// Probe the hardware again and allow another accelerated attempt.
    pub async fn reprobe_hardware(&self) -> Option<GpuInfo> {
        let gpu = self.detect_gpu().await;
        let mut state = self.state.lock().await;
        state.hardware = Some(gpu.clone());
        state.gpu_failed = false;
        gpu
    }

    async fn load(&self, state: &mut EngineState) -> Result<Box<dyn LoadedModel>, LocalAIError> {
        if !state.model_path.is_file() {
            return Err(LocalAIError::ModelFileMissing {
                id: state.spec.id.clone(),
                path: state.model_path.clone(),
            });
        }

        let gpu = match &state.hardware {
            Some(gpu) => gpu.clone(),
            None => {
                let gpu = self.detect_gpu().await;
                state.hardware = Some(gpu.clone());
                gpu
            }
        };

        state.use_gpu = gpu.is_some() && !state.gpu_failed;
        if state.use_gpu {
            match self.loader.load(&state.model_path, true).await {
                Ok(model) => {
                    info!("Loaded '{}' with GPU acceleration", state.spec.id);
                    return Ok(model);
                }
                Err(e) => {
                    warn!(
                        "GPU load of '{}' failed ({}); retrying on CPU",
                        state.spec.id, e
                    );
                    state.use_gpu = false;
                    state.gpu_failed = true;
                }
            }
        }

        let model = self.loader.load(&state.model_path, false).await?;
        info!("Loaded '{}' on CPU", state.spec.id);
        Ok(model)
    }

    async fn detect_gpu(&self) -> Option<GpuInfo> {
        let probe = self.probe.clone();
        match tokio::task::spawn_blocking(move || probe.probe()).await {
            Ok(gpu) => gpu,
            Err(e) => {
                warn!("Hardware probe failed: {}", e);
                None
            }
        }
    }
}

async fn default_spec(registry: &ModelRegistry) -> Result<ModelSpec, LocalAIError> {
    let models = registry.get_registry().await;
    models
        .get(DEFAULT_MODEL_ID)
        .or_else(|| models.values().next())
        .cloned()
        .ok_or_else(|| LocalAIError::UnknownModel(DEFAULT_MODEL_ID.to_string()))
}
