//! # Lantern AI core
//!
//! Routes "explain this file / directory" requests from the file manager
//! to the configured provider and keeps long calls off the interactive
//! thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌───────────────────────────┐
//! │  Interactive │ -> │    Bridge    │ -> │      ProviderRouter       │
//! │     loop     │ <- │ (tokio pool) │    │ local │ selfhost/gpt │ ...│
//! └──────────────┘    └──────────────┘    └───────────────────────────┘
//!        ^  BridgeEvent                        │
//!        └─────────────────────────────  SettingsStore / env
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use lantern_ai::{Bridge, ProviderRouter, Stage};
//!
//! let router = Arc::new(ProviderRouter::from_env());
//! let (bridge, mut events) = Bridge::new(runtime.handle().clone(), 2);
//!
//! bridge.submit(path.display().to_string(), move |reporter| async move {
//!     reporter.stage(Stage::Prepared);
//!     reporter.stage(Stage::Running);
//!     let text = router.explain_file(&path, &content).await?;
//!     reporter.stage(Stage::Formatting);
//!     Ok(text)
//! })?;
//! ```

mod app_config;
mod bridge;
mod config;
pub mod env;
mod error;
mod gemini;
mod openai;
mod provider;
mod remote;
mod router;

pub use app_config::{gated_download_token, AppConfig, AppConfigStore};
pub use bridge::{Bridge, BridgeEvent, Stage, StageReporter, Ticket};
pub use config::{
    EffectiveSettings, ProviderConfig, SetOutcome, SettingsStore, GEMINI_BASE_URL,
    GEMINI_DEFAULT_MODEL, OPENAI_BASE_URL, OPENAI_DEFAULT_MODEL,
};
pub use env::{EnvSource, ProcessEnv};
pub use error::{AIError, ConfigError};
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use provider::Provider;
pub use remote::{Backend, CopilotBackend, REMOTE_TIMEOUT};
pub use router::ProviderRouter;

// Re-export local AI types
pub use lantern_local_ai::{
    paths as local_ai_paths, EngineStatus, GpuInfo, LocalAIError, ModelSpec, ProgressFn,
    DEFAULT_MODEL_ID,
};
