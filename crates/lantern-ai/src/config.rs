//! Provider settings.
//!
//! Settings live in a small human-editable JSON file. Reads never fail:
//! a missing or corrupt file yields the defaults. Writes replace the file
//! atomically and restrict it to the owner, since it holds API keys.

use std::fs;
use std::path::{Path, PathBuf};

use lantern_local_ai::paths;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::env::{self, EnvSource, ProcessEnv};
use crate::error::ConfigError;
use crate::provider::Provider;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";

/// Persisted provider selection and credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Kept as written so an unknown value does not discard the file.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub local_model_id: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub copilot_api_key: Option<String>,
    #[serde(default)]
    pub selfhost_base_url: Option<String>,
    #[serde(default)]
    pub selfhost_api_key: Option<String>,
    #[serde(default)]
    pub selfhost_model: Option<String>,
    /// Fields this version does not know about.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_provider() -> String {
    Provider::Local.to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            local_model_id: None,
            openai_api_key: None,
            gemini_api_key: None,
            copilot_api_key: None,
            selfhost_base_url: None,
            selfhost_api_key: None,
            selfhost_model: None,
            extra: Map::new(),
        }
    }
}

impl ProviderConfig {
    /// Stored API key for `provider`, if any.
    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        let key = match provider {
            Provider::Local => None,
            Provider::Selfhost => self.selfhost_api_key.as_deref(),
            Provider::Gpt => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
            Provider::Copilot => self.copilot_api_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }

    fn api_key_slot(&mut self, provider: Provider) -> Option<&mut Option<String>> {
        match provider {
            Provider::Local => None,
            Provider::Selfhost => Some(&mut self.selfhost_api_key),
            Provider::Gpt => Some(&mut self.openai_api_key),
            Provider::Gemini => Some(&mut self.gemini_api_key),
            Provider::Copilot => Some(&mut self.copilot_api_key),
        }
    }
}

/// Result of a protect-by-default settings update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    pub changed: bool,
    /// Field that already had a value and was left alone.
    pub blocked_field: Option<&'static str>,
}

impl SetOutcome {
    fn changed() -> Self {
        Self {
            changed: true,
            blocked_field: None,
        }
    }

    fn blocked(field: &'static str) -> Self {
        Self {
            changed: false,
            blocked_field: Some(field),
        }
    }
}

/// Settings after layering environment over file over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    /// Raw provider name; parsed at dispatch time.
    pub provider: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Remote model name, or the local model id for `local`.
    pub model: Option<String>,
}

/// Reads and writes the provider settings file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `LANTERN_AI_CONFIG`, or `<config_dir>/lantern/ai.json`.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        match env::lookup(env, env::AI_CONFIG_ENV) {
            Some(path) => Self::new(path),
            None => Self::new(paths::config_dir().join("ai.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings file. `Ok(None)` when it does not exist.
    pub fn try_load(&self) -> Result<Option<ProviderConfig>, ConfigError> {
        read_json(&self.path)
    }

    /// Read the settings file, substituting defaults when it is missing
    /// or unreadable.
    pub fn load(&self) -> ProviderConfig {
        match self.try_load() {
            Ok(Some(cfg)) => cfg,
            Ok(None) => ProviderConfig::default(),
            Err(ConfigError::Corrupt { path, source }) => {
                warn!("Ignoring corrupt settings file {:?}: {}", path, source);
                ProviderConfig::default()
            }
            Err(e) => {
                warn!("Using default settings: {}", e);
                ProviderConfig::default()
            }
        }
    }

    pub fn save(&self, cfg: &ProviderConfig) -> Result<(), ConfigError> {
        write_json_private(&self.path, cfg)
    }

    /// Store `api_key` for `provider` and make it active.
    ///
    /// An existing key is only replaced when `overwrite` is set; otherwise
    /// nothing changes and the protected field is reported.
    pub fn set_provider_and_key(
        &self,
        provider: Provider,
        api_key: &str,
        overwrite: bool,
    ) -> Result<SetOutcome, ConfigError> {
        let mut cfg = self.load();

        if let Some(field) = provider.key_field() {
            if cfg.api_key(provider).is_some() && !overwrite {
                debug!("Not replacing existing {}", field);
                return Ok(SetOutcome::blocked(field));
            }
            if let Some(slot) = cfg.api_key_slot(provider) {
                *slot = non_empty(api_key);
            }
        }

        cfg.provider = provider.to_string();
        self.save(&cfg)?;
        info!("Active AI provider set to {}", provider);
        Ok(SetOutcome::changed())
    }

    /// Configure the selfhost endpoint and make it active.
    ///
    /// Each supplied field already holding a value blocks the whole update
    /// unless `overwrite` is set; the first such field is reported.
    pub fn set_selfhost_config(
        &self,
        base_url: &str,
        api_key: Option<&str>,
        model: Option<&str>,
        overwrite: bool,
    ) -> Result<SetOutcome, ConfigError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        let api_key = api_key.and_then(non_empty);
        let model = model.and_then(non_empty);

        let mut cfg = self.load();

        if !overwrite {
            let updates = [
                ("selfhost_base_url", true, &cfg.selfhost_base_url),
                ("selfhost_api_key", api_key.is_some(), &cfg.selfhost_api_key),
                ("selfhost_model", model.is_some(), &cfg.selfhost_model),
            ];
            let blocked = updates.iter().find(|(_, supplied, current)| {
                *supplied && current.as_deref().is_some_and(|v| !v.trim().is_empty())
            });
            if let Some((field, _, _)) = blocked {
                debug!("Not replacing existing {}", field);
                return Ok(SetOutcome::blocked(*field));
            }
        }

        cfg.selfhost_base_url = Some(base_url.to_string());
        if api_key.is_some() {
            cfg.selfhost_api_key = api_key;
        }
        if model.is_some() {
            cfg.selfhost_model = model;
        }
        cfg.provider = Provider::Selfhost.to_string();
        self.save(&cfg)?;
        info!("Selfhost provider configured at {}", base_url);
        Ok(SetOutcome::changed())
    }

    /// Make `provider` active, keeping every stored credential.
    pub fn set_active_provider(&self, provider: Provider) -> Result<(), ConfigError> {
        let mut cfg = self.load();
        cfg.provider = provider.to_string();
        self.save(&cfg)?;
        info!("Active AI provider set to {}", provider);
        Ok(())
    }

    /// Remember `id` as the local model and make `local` active.
    pub fn set_local_model(&self, id: &str) -> Result<(), ConfigError> {
        let mut cfg = self.load();
        cfg.local_model_id = Some(id.to_string());
        cfg.provider = Provider::Local.to_string();
        self.save(&cfg)
    }

    /// Effective settings using the process environment.
    pub fn get_effective_settings(&self) -> EffectiveSettings {
        self.effective_settings_with(&ProcessEnv)
    }

    /// Layer `env` over the stored settings over the built-in defaults.
    ///
    /// Recomputed on every call so edits and environment changes apply
    /// without a restart.
    pub fn effective_settings_with(&self, env: &dyn EnvSource) -> EffectiveSettings {
        let cfg = self.load();
        let provider = env::lookup(env, env::PROVIDER_ENV)
            .unwrap_or_else(|| cfg.provider.trim().to_string())
            .to_ascii_lowercase();

        let (base_url, api_key, model) = match provider.parse::<Provider>() {
            Ok(Provider::Local) => (None, None, cfg.local_model_id.clone()),
            Ok(Provider::Selfhost) => (
                cfg.selfhost_base_url.clone(),
                cfg.api_key(Provider::Selfhost).map(str::to_string),
                cfg.selfhost_model.clone(),
            ),
            Ok(Provider::Gpt) => (
                Some(OPENAI_BASE_URL.to_string()),
                cfg.api_key(Provider::Gpt).map(str::to_string),
                Some(OPENAI_DEFAULT_MODEL.to_string()),
            ),
            Ok(Provider::Gemini) => (
                Some(GEMINI_BASE_URL.to_string()),
                cfg.api_key(Provider::Gemini).map(str::to_string),
                Some(GEMINI_DEFAULT_MODEL.to_string()),
            ),
            Ok(Provider::Copilot) => (
                None,
                cfg.api_key(Provider::Copilot).map(str::to_string),
                None,
            ),
            Err(_) => (None, None, None),
        };

        EffectiveSettings {
            provider,
            base_url: env::lookup(env, env::BASE_URL_ENV).or(base_url),
            api_key: env::lookup(env, env::API_KEY_ENV).or(api_key),
            model: env::lookup(env, env::MODEL_ENV).or(model),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a JSON file. `Ok(None)` when the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ConfigError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `value` as pretty JSON through a temp file and rename, then
/// restrict the file to its owner where supported.
pub(crate) fn write_json_private<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut text = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    text.push('\n');

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;

    if let Err(e) = restrict_to_owner(path) {
        warn!("Could not restrict permissions on {:?}: {}", path, e);
    }
    debug!("Saved {:?}", path);
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};

    fn store() -> (TempDir, SettingsStore) {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("lantern").join("ai.json"));
        (dir, store)
    }

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (_dir, store) = store();
        assert!(store.try_load().unwrap().is_none());
        assert_eq!(store.load(), ProviderConfig::default());
        assert_eq!(store.load().provider, "local");
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"\x00{not json at all").unwrap();

        assert!(matches!(store.try_load(), Err(ConfigError::Corrupt { .. })));
        assert_eq!(store.load(), ProviderConfig::default());
    }

    #[test]
    fn test_save_load_round_trip_keeps_unknown_fields() {
        let (_dir, store) = store();
        let mut cfg = ProviderConfig {
            provider: "gemini".to_string(),
            local_model_id: Some("qwen2.5-3b".to_string()),
            gemini_api_key: Some("g-key".to_string()),
            selfhost_base_url: Some("http://10.0.0.5:8000/v1".to_string()),
            ..ProviderConfig::default()
        };
        cfg.extra
            .insert("theme".to_string(), Value::String("dark".to_string()));

        store.save(&cfg).unwrap();
        assert_eq!(store.load(), cfg);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = store();
        store.save(&ProviderConfig::default()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_existing_key_is_protected() {
        let (_dir, store) = store();

        let first = store
            .set_provider_and_key(Provider::Gpt, " sk-one ", false)
            .unwrap();
        assert_eq!(first, SetOutcome::changed());

        let second = store
            .set_provider_and_key(Provider::Gpt, "sk-two", false)
            .unwrap();
        assert!(!second.changed);
        assert_eq!(second.blocked_field, Some("openai_api_key"));
        assert_eq!(store.load().openai_api_key.as_deref(), Some("sk-one"));
    }

    #[test]
    fn test_overwrite_replaces_key() {
        let (_dir, store) = store();
        store
            .set_provider_and_key(Provider::Gpt, "sk-one", false)
            .unwrap();

        let outcome = store
            .set_provider_and_key(Provider::Gpt, "sk-two", true)
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(store.load().openai_api_key.as_deref(), Some("sk-two"));
    }

    #[test]
    fn test_switching_provider_keeps_other_keys() {
        let (_dir, store) = store();
        store
            .set_provider_and_key(Provider::Gpt, "sk-one", false)
            .unwrap();
        store
            .set_provider_and_key(Provider::Gemini, "g-one", false)
            .unwrap();
        store
            .set_provider_and_key(Provider::Local, "", false)
            .unwrap();

        let cfg = store.load();
        assert_eq!(cfg.provider, "local");
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-one"));
        assert_eq!(cfg.gemini_api_key.as_deref(), Some("g-one"));

        store.set_active_provider(Provider::Gpt).unwrap();
        let cfg = store.load();
        assert_eq!(cfg.provider, "gpt");
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-one"));
    }

    #[test]
    fn test_selfhost_requires_base_url() {
        let (_dir, store) = store();
        let err = store
            .set_selfhost_config("  / ", Some("key"), None, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyBaseUrl));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_selfhost_trims_url_and_protects_fields() {
        let (_dir, store) = store();
        let outcome = store
            .set_selfhost_config(" http://gpu-box:8080/v1/ ", Some("k1"), Some("llama3"), false)
            .unwrap();
        assert!(outcome.changed);

        let cfg = store.load();
        assert_eq!(cfg.provider, "selfhost");
        assert_eq!(cfg.selfhost_base_url.as_deref(), Some("http://gpu-box:8080/v1"));
        assert_eq!(cfg.selfhost_api_key.as_deref(), Some("k1"));
        assert_eq!(cfg.selfhost_model.as_deref(), Some("llama3"));

        let blocked = store
            .set_selfhost_config("http://other:8080/v1", Some("k2"), None, false)
            .unwrap();
        assert_eq!(blocked.blocked_field, Some("selfhost_base_url"));
        assert_eq!(store.load(), cfg);

        store
            .set_selfhost_config("http://other:8080/v1", None, None, true)
            .unwrap();
        let cfg = store.load();
        assert_eq!(cfg.selfhost_base_url.as_deref(), Some("http://other:8080/v1"));
        assert_eq!(cfg.selfhost_api_key.as_deref(), Some("k1"));
        assert_eq!(cfg.selfhost_model.as_deref(), Some("llama3"));
    }

    #[test]
    fn test_selfhost_partial_update_reports_key_field() {
        let (_dir, store) = store();
        let mut cfg = ProviderConfig::default();
        cfg.selfhost_api_key = Some("k1".to_string());
        store.save(&cfg).unwrap();

        let outcome = store
            .set_selfhost_config("http://box/v1", Some("k2"), None, false)
            .unwrap();
        assert_eq!(outcome.blocked_field, Some("selfhost_api_key"));
        assert_eq!(store.load().selfhost_base_url, None);
    }

    #[test]
    fn test_env_overrides_provider_without_touching_file() {
        let (_dir, store) = store();
        store.set_local_model("phi-3.5-mini-q4").unwrap();
        let before = fs::read(store.path()).unwrap();

        let settings = store.effective_settings_with(&env(&[(env::PROVIDER_ENV, "gpt")]));

        assert_eq!(settings.provider, "gpt");
        assert_eq!(settings.base_url.as_deref(), Some(OPENAI_BASE_URL));
        assert_eq!(settings.model.as_deref(), Some(OPENAI_DEFAULT_MODEL));
        assert_eq!(settings.api_key, None);
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_env_overrides_apply_independently() {
        let (_dir, store) = store();
        store
            .set_provider_and_key(Provider::Gemini, "stored-key", false)
            .unwrap();

        let settings = store.effective_settings_with(&env(&[(env::MODEL_ENV, "gemini-2.0-flash")]));
        assert_eq!(settings.provider, "gemini");
        assert_eq!(settings.api_key.as_deref(), Some("stored-key"));
        assert_eq!(settings.model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(settings.base_url.as_deref(), Some(GEMINI_BASE_URL));

        let settings = store.effective_settings_with(&env(&[
            (env::API_KEY_ENV, "env-key"),
            (env::BASE_URL_ENV, "http://proxy/v1beta"),
        ]));
        assert_eq!(settings.api_key.as_deref(), Some("env-key"));
        assert_eq!(settings.base_url.as_deref(), Some("http://proxy/v1beta"));
    }

    #[test]
    fn test_local_settings_carry_model_id() {
        let (_dir, store) = store();
        store.set_local_model("qwen2.5-3b").unwrap();

        let settings = store.effective_settings_with(&env(&[]));
        assert_eq!(settings.provider, "local");
        assert_eq!(settings.model.as_deref(), Some("qwen2.5-3b"));
    }

    #[test]
    fn test_unknown_stored_provider_is_kept() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{"provider": "claude", "openai_api_key": "sk-keep"}"#,
        )
        .unwrap();

        let cfg = store.load();
        assert_eq!(cfg.provider, "claude");
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-keep"));
        assert_eq!(store.effective_settings_with(&env(&[])).provider, "claude");
    }
}
