//! Local AI backend for Lantern using llama.cpp.
//!
//! Lantern manages its own llama-server process, a catalog of quantized
//! models and their downloads, so explanations work without any account
//! or network access once weights are on disk.

mod backend;
mod client;
mod engine;
mod error;
mod hardware;
mod model;
pub mod paths;
pub mod prompt;
mod registry;
mod server;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backend::{LlamaServerLoader, LoadedModel, ModelLoader};
pub use client::{CompletionParams, LlamaCppClient};
pub use engine::{EngineStatus, LocalEngine};
pub use error::LocalAIError;
pub use hardware::{GpuInfo, GpuProbe, NvidiaSmiProbe};
pub use model::{ModelManager, ProgressFn};
pub use prompt::Prompt;
pub use registry::{ModelRegistry, ModelSpec, RegistrySource};
pub use server::LlamaCppServer;

/// Port a `LlamaCppServer` uses unless `with_port` picks another.
pub const DEFAULT_PORT: u16 = 11436;

/// Model used when nothing else has been selected.
pub const DEFAULT_MODEL_ID: &str = "phi-3.5-mini-q4";
