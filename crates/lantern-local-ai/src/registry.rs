//! Registry of downloadable local models.
//!
//! The registry is resolved once per process. Resolution walks a fallback
//! chain so that there is always at least one usable model:
//!
//! 1. the remote JSON manifest (`LANTERN_MODELS_URL` or the default URL),
//! 2. the local override file `models.local.json`,
//! 3. a single built-in spec.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::LocalAIError;
use crate::paths;
use crate::DEFAULT_MODEL_ID;

/// Environment override for the manifest URL.
pub const MODELS_URL_ENV: &str = "LANTERN_MODELS_URL";

/// Default remote manifest of available models.
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/lantern-fm/lantern/main/models.json";

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of the model manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Unique key within the registry.
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Directory under the models base directory.
    pub subdir: String,
    /// GGUF filename inside `subdir`.
    pub filename: String,
    pub download_url: String,
    #[serde(default = "default_ram_gb")]
    pub recommended_ram_gb: u32,
    /// Expected SHA256 of the weights, verified after download when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

fn default_ram_gb() -> u32 {
    8
}

impl ModelSpec {
    /// The built-in spec used when no manifest can be read.
    pub fn builtin() -> Self {
        Self {
            id: DEFAULT_MODEL_ID.to_string(),
            name: "Phi-3.5-mini (Q4_K_M)".to_string(),
            description: "Fast, low-RAM; good default on laptops and small VMs.".to_string(),
            subdir: "phi-3.5-mini".to_string(),
            filename: "Phi-3.5-mini-instruct-Q4_K_M.gguf".to_string(),
            download_url: "https://huggingface.co/bartowski/Phi-3.5-mini-instruct-GGUF/resolve/main/Phi-3.5-mini-instruct-Q4_K_M.gguf".to_string(),
            recommended_ram_gb: 8,
            sha256: None,
        }
    }
}

/// Where the registry looks for its manifest.
#[derive(Debug, Clone)]
pub struct RegistrySource {
    /// Remote manifest URL; `None` skips the network step.
    pub manifest_url: Option<String>,
    /// Local override file.
    pub fallback_path: PathBuf,
}

impl RegistrySource {
    /// Resolve the source from the environment and the standard paths.
    pub fn from_env() -> Self {
        let manifest_url = std::env::var(MODELS_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MANIFEST_URL.to_string());

        Self {
            manifest_url: Some(manifest_url),
            fallback_path: paths::models_override_path(),
        }
    }
}

/// Lazily loaded, process-lifetime registry of model specs.
pub struct ModelRegistry {
    source: RegistrySource,
    models_dir: PathBuf,
    models: OnceCell<IndexMap<String, ModelSpec>>,
}

impl ModelRegistry {
    /// Create a registry that will resolve `source` on first use.
    pub fn new(source: RegistrySource, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            models_dir: models_dir.into(),
            models: OnceCell::new(),
        }
    }

    /// Create a registry using environment overrides and standard paths.
    pub fn from_env() -> Self {
        Self::new(RegistrySource::from_env(), paths::models_dir())
    }

    /// Create an already-resolved registry from a list of specs.
    pub fn with_specs(models_dir: impl Into<PathBuf>, specs: Vec<ModelSpec>) -> Self {
        let registry = Self::new(
            RegistrySource {
                manifest_url: None,
                fallback_path: PathBuf::new(),
            },
            models_dir,
        );
        // A fresh cell cannot already be initialized.
        let _ = registry.models.set(index_specs(specs));
        registry
    }

    /// Base directory that model paths are resolved against.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// All known specs keyed by id, in manifest order.
    pub async fn get_registry(&self) -> &IndexMap<String, ModelSpec> {
        self.models.get_or_init(|| self.resolve_specs()).await
    }

    /// All known specs in manifest order.
    pub async fn list(&self) -> Vec<ModelSpec> {
        self.get_registry().await.values().cloned().collect()
    }

    /// Look up a spec by id.
    pub async fn get(&self, id: &str) -> Result<ModelSpec, LocalAIError> {
        self.get_registry()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LocalAIError::UnknownModel(id.to_string()))
    }

    /// Look up a spec by id, or by 1-based position in the listing.
    pub async fn lookup(&self, id_or_index: &str) -> Result<ModelSpec, LocalAIError> {
        let id_or_index = id_or_index.trim();
        let registry = self.get_registry().await;

        if let Some(spec) = registry.get(id_or_index) {
            return Ok(spec.clone());
        }

        id_or_index
            .parse::<usize>()
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| registry.get_index(index))
            .map(|(_, spec)| spec.clone())
            .ok_or_else(|| LocalAIError::UnknownModel(id_or_index.to_string()))
    }

    /// On-disk location of a spec's weights. Does not check existence.
    pub fn model_path(&self, spec: &ModelSpec) -> PathBuf {
        self.models_dir.join(&spec.subdir).join(&spec.filename)
    }

    /// On-disk location of the weights for `id`.
    pub async fn get_model_path(&self, id: &str) -> Result<PathBuf, LocalAIError> {
        let spec = self.get(id).await?;
        Ok(self.model_path(&spec))
    }

    async fn resolve_specs(&self) -> IndexMap<String, ModelSpec> {
        if let Some(url) = &self.source.manifest_url {
            match fetch_manifest(url).await {
                Ok(specs) if !specs.is_empty() => {
                    info!("Loaded {} model specs from {}", specs.len(), url);
                    return index_specs(specs);
                }
                Ok(_) => warn!("Model manifest at {} is empty", url),
                Err(e) => warn!("Could not fetch model manifest from {}: {}", url, e),
            }
        }

        match read_manifest_file(&self.source.fallback_path) {
            Ok(Some(specs)) if !specs.is_empty() => {
                info!(
                    "Loaded {} model specs from {:?}",
                    specs.len(),
                    self.source.fallback_path
                );
                return index_specs(specs);
            }
            Ok(_) => debug!("No local model manifest at {:?}", self.source.fallback_path),
            Err(e) => warn!(
                "Ignoring unreadable model manifest {:?}: {}",
                self.source.fallback_path, e
            ),
        }

        info!("Using built-in model spec '{}'", DEFAULT_MODEL_ID);
        index_specs(vec![ModelSpec::builtin()])
    }
}

async fn fetch_manifest(url: &str) -> Result<Vec<ModelSpec>, LocalAIError> {
    let client = reqwest::Client::builder()
        .timeout(MANIFEST_TIMEOUT)
        .build()?;

    let specs = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<ModelSpec>>()
        .await?;

    Ok(specs)
}

fn read_manifest_file(path: &Path) -> Result<Option<Vec<ModelSpec>>, LocalAIError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn index_specs(specs: Vec<ModelSpec>) -> IndexMap<String, ModelSpec> {
    let mut registry = IndexMap::with_capacity(specs.len());
    for spec in specs {
        if registry.contains_key(&spec.id) {
            warn!("Duplicate model id '{}' in manifest, keeping the first", spec.id);
            continue;
        }
        registry.insert(spec.id.clone(), spec);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spec(id: &str) -> ModelSpec {
        ModelSpec {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: String::new(),
            subdir: format!("{}-dir", id),
            filename: format!("{}.gguf", id),
            download_url: format!("https://example.invalid/{}.gguf", id),
            recommended_ram_gb: 4,
            sha256: None,
        }
    }

    #[tokio::test]
    async fn test_builtin_when_nothing_else_available() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(
            RegistrySource {
                manifest_url: None,
                fallback_path: dir.path().join("missing.json"),
            },
            dir.path(),
        );

        let models = registry.list().await;
        assert_eq!(models, vec![ModelSpec::builtin()]);
    }

    #[tokio::test]
    async fn test_fallback_file_used_when_remote_unreachable() {
        let dir = tempdir().unwrap();
        let fallback = dir.path().join("models.local.json");
        std::fs::write(
            &fallback,
            r#"[{"id":"tiny","name":"Tiny","subdir":"tiny","filename":"tiny.gguf",
                "download_url":"https://example.invalid/tiny.gguf"}]"#,
        )
        .unwrap();

        let registry = ModelRegistry::new(
            RegistrySource {
                // Port 9 (discard) on localhost is never serving HTTP here.
                manifest_url: Some("http://127.0.0.1:9/models.json".to_string()),
                fallback_path: fallback,
            },
            dir.path(),
        );

        let tiny = registry.get("tiny").await.unwrap();
        assert_eq!(tiny.recommended_ram_gb, 8);
        assert_eq!(tiny.description, "");
        assert_eq!(registry.get_registry().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_fallback_degrades_to_builtin() {
        let dir = tempdir().unwrap();
        let fallback = dir.path().join("models.local.json");
        std::fs::write(&fallback, "not json at all").unwrap();

        let registry = ModelRegistry::new(
            RegistrySource {
                manifest_url: None,
                fallback_path: fallback,
            },
            dir.path(),
        );

        assert!(registry.get(DEFAULT_MODEL_ID).await.is_ok());
    }

    #[tokio::test]
    async fn test_model_path_is_deterministic() {
        let registry = ModelRegistry::with_specs("/models", vec![spec("a")]);
        let path = registry.get_model_path("a").await.unwrap();
        assert_eq!(path, PathBuf::from("/models/a-dir/a.gguf"));
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let registry = ModelRegistry::with_specs("/models", vec![spec("a")]);
        let err = registry.get("nope").await.unwrap_err();
        assert!(matches!(err, LocalAIError::UnknownModel(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_lookup_by_index_and_duplicates() {
        let registry =
            ModelRegistry::with_specs("/models", vec![spec("a"), spec("b"), spec("a")]);

        assert_eq!(registry.list().await.len(), 2);
        assert_eq!(registry.lookup("2").await.unwrap().id, "b");
        assert_eq!(registry.lookup(" a ").await.unwrap().id, "a");
        assert!(registry.lookup("0").await.is_err());
        assert!(registry.lookup("3").await.is_err());
    }
}
