//! General Lantern configuration (`config.json`).
//!
//! Only the gated-download token matters here; any other keys (display
//! preferences and the like) are carried through untouched.

use std::path::{Path, PathBuf};

use lantern_local_ai::paths;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{read_json, write_json_private};
use crate::env::{self, EnvSource};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Token for gated model downloads.
    #[serde(default)]
    pub hf_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct AppConfigStore {
    path: PathBuf,
}

impl AppConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `LANTERN_CONFIG`, or `<config_dir>/lantern/config.json`.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        match env::lookup(env, env::APP_CONFIG_ENV) {
            Some(path) => Self::new(path),
            None => Self::new(paths::config_dir().join("config.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AppConfig {
        match read_json(&self.path) {
            Ok(cfg) => cfg.unwrap_or_default(),
            Err(e) => {
                warn!("Using default app config: {}", e);
                AppConfig::default()
            }
        }
    }

    pub fn save(&self, cfg: &AppConfig) -> Result<(), ConfigError> {
        write_json_private(&self.path, cfg)
    }

    /// Store (or with `None`, clear) the download token.
    ///
    /// A corrupt file is reported rather than replaced, so the preferences
    /// it holds are not lost.
    pub fn set_hf_token(&self, token: Option<&str>) -> Result<(), ConfigError> {
        let mut cfg: AppConfig = read_json(&self.path)?.unwrap_or_default();
        cfg.hf_token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        self.save(&cfg)?;
        info!(
            "Download token {}",
            if cfg.hf_token.is_some() { "saved" } else { "cleared" }
        );
        Ok(())
    }
}

/// Token for gated downloads: `LANTERN_HF_TOKEN` first, then the app config.
pub fn gated_download_token(env: &dyn EnvSource, store: &AppConfigStore) -> Option<String> {
    env::lookup(env, env::HF_TOKEN_ENV).or_else(|| {
        store
            .load()
            .hf_token
            .filter(|t| !t.trim().is_empty())
    })
}
