//! Routing of requests to the configured provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lantern_local_ai::prompt::{self, Prompt};
use lantern_local_ai::{
    EngineStatus, GpuProbe, LlamaServerLoader, LocalEngine, ModelLoader,
    ModelManager, ModelRegistry, ModelSpec, NvidiaSmiProbe, ProgressFn,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::app_config::{gated_download_token, AppConfigStore};
use crate::config::{EffectiveSettings, SettingsStore};
use crate::env::{EnvSource, ProcessEnv};
use crate::error::AIError;
use crate::gemini::GeminiBackend;
use crate::openai::OpenAiBackend;
use crate::provider::Provider;
use crate::remote::{Backend, CopilotBackend};

/// The local engine behind the common [`Backend`] interface.
struct LocalBackend<'a> {
    engine: &'a LocalEngine,
}

#[async_trait]
impl<'a> Backend for LocalBackend<'a> {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    async fn explain(&self, prompt: &Prompt) -> Result<String, AIError> {
        Ok(self.engine.run_prompt(prompt).await?)
    }
}

/// Entry point for every AI request.
///
/// Settings are re-read on each request. The only state kept is the local
/// engine, created the first time a request is routed to it.
pub struct ProviderRouter {
    settings: SettingsStore,
    app_config: AppConfigStore,
    env: Arc<dyn EnvSource>,
    registry: Arc<ModelRegistry>,
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn GpuProbe>,
    engine: OnceCell<LocalEngine>,
    http: reqwest::Client,
}

impl ProviderRouter {
    pub fn new(
        settings: SettingsStore,
        app_config: AppConfigStore,
        env: Arc<dyn EnvSource>,
        registry: Arc<ModelRegistry>,
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn GpuProbe>,
    ) -> Self {
        Self {
            settings,
            app_config,
            env,
            registry,
            loader,
            probe,
            engine: OnceCell::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Router using the process environment, standard paths, llama-server
    /// and `nvidia-smi`.
    pub fn from_env() -> Self {
        let env = ProcessEnv;
        Self::new(
            SettingsStore::from_env(&env),
            AppConfigStore::from_env(&env),
            Arc::new(env),
            Arc::new(ModelRegistry::from_env()),
            Arc::new(LlamaServerLoader::new()),
            Arc::new(NvidiaSmiProbe::new()),
        )
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn app_config(&self) -> &AppConfigStore {
        &self.app_config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn effective_settings(&self) -> EffectiveSettings {
        self.settings.effective_settings_with(self.env.as_ref())
    }

    pub async fn explain_file(&self, path: &Path, content: &str) -> Result<String, AIError> {
        self.dispatch(prompt::file_prompt(path, content)).await
    }

    pub async fn explain_directory(&self, path: &Path, manifest: &str) -> Result<String, AIError> {
        self.dispatch(prompt::directory_prompt(path, manifest))
            .await
    }

    pub async fn ask(&self, question: &str, context: Option<&str>) -> Result<String, AIError> {
        self.dispatch(prompt::ask_prompt(question, context)).await
    }

    async fn dispatch(&self, prompt: Prompt) -> Result<String, AIError> {
        let settings = self.effective_settings();
        let provider: Provider = settings.provider.parse()?;
        debug!("Routing request to {}", provider);

        let backend: Box<dyn Backend + '_> = match provider {
            Provider::Local => Box::new(LocalBackend {
                engine: self.engine().await?,
            }),
            Provider::Selfhost | Provider::Gpt => {
                Box::new(OpenAiBackend::new(provider, self.http.clone(), &settings))
            }
            Provider::Gemini => Box::new(GeminiBackend::new(self.http.clone(), &settings)),
            Provider::Copilot => Box::new(CopilotBackend),
        };

        let result = backend.explain(&prompt).await;
        match &result {
            Ok(text) => debug!("{} answered with {} chars", backend.provider(), text.len()),
            Err(e) => warn!("{} request failed: {}", backend.provider(), e),
        }
        result
    }

    /// The local engine, created on first use.
    pub async fn engine(&self) -> Result<&LocalEngine, AIError> {
        self.engine
            .get_or_try_init(|| async {
                let model_id = self.configured_local_model().await;
                LocalEngine::new(
                    self.registry.clone(),
                    self.loader.clone(),
                    self.probe.clone(),
                    model_id.as_deref(),
                )
                .await
            })
            .await
            .map_err(AIError::from)
    }

    /// Stored (or overridden) local model id, if it is still in the registry.
    async fn configured_local_model(&self) -> Option<String> {
        let settings = self.effective_settings();
        let stored = if settings.provider == Provider::Local.as_str() {
            settings.model
        } else {
            self.settings.load().local_model_id
        };
        let id = stored?;

        match self.registry.get(&id).await {
            Ok(_) => Some(id),
            Err(_) => {
                warn!("Configured local model '{}' is not in the registry; using the default", id);
                None
            }
        }
    }

    /// Make `id` the active local model. The weights must already exist.
    pub async fn switch_model(&self, id: &str) -> Result<(), AIError> {
        self.engine().await?.switch_model(id).await?;
        Ok(())
    }

    /// Select a local model by id or 1-based listing index, downloading its
    /// weights first if needed, then switch to it and remember the choice.
    pub async fn select_local_model(
        &self,
        id_or_index: &str,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ModelSpec, AIError> {
        let spec = self.registry.lookup(id_or_index).await?;
        let path = self.registry.model_path(&spec);
        if !ModelManager::is_installed(&path) {
            self.model_manager()
                .download(&spec, &path, progress)
                .await?;
        }

        self.switch_model(&spec.id).await?;
        self.settings.set_local_model(&spec.id)?;
        info!("Local model set to '{}'", spec.id);
        Ok(spec)
    }

    /// Download the active local model's weights if they are missing.
    pub async fn download_model(
        &self,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<PathBuf, AIError> {
        let manager = self.model_manager();
        Ok(self.engine().await?.download_model(&manager, progress).await?)
    }

    /// Download the weights for any registered model.
    pub async fn download(
        &self,
        id: &str,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<PathBuf, AIError> {
        let spec = self.registry.get(id).await?;
        let path = self.registry.model_path(&spec);
        Ok(self
            .model_manager()
            .download(&spec, &path, progress)
            .await?)
    }

    pub async fn list_models(&self) -> Vec<ModelSpec> {
        self.registry.list().await
    }

    pub async fn engine_status(&self) -> Result<EngineStatus, AIError> {
        Ok(self.engine().await?.status().await)
    }

    /// Whether the weights for `spec` are on disk.
    pub fn is_installed(&self, spec: &ModelSpec) -> bool {
        ModelManager::is_installed(&self.registry.model_path(spec))
    }

    fn model_manager(&self) -> ModelManager {
        ModelManager::new().with_token(gated_download_token(self.env.as_ref(), &self.app_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_local_ai::testing::{FakeLoader, FakeProbe, StubServer};
    use lantern_local_ai::{LocalAIError, DEFAULT_MODEL_ID};
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};

    fn spec(id: &str, url: &str) -> ModelSpec {
        ModelSpec {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            subdir: id.to_string(),
            filename: format!("{}.gguf", id),
            download_url: url.to_string(),
            recommended_ram_gb: 4,
            sha256: None,
        }
    }

    struct Fixture {
        _dir: TempDir,
        router: ProviderRouter,
        loader: Arc<FakeLoader>,
    }

    /// Router over a temp dir with models `phi-3.5-mini-q4` (installed),
    /// `b` (installed) and `c` (downloadable from `download_url`).
    fn fixture(env: &[(&str, &str)], download_url: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::with_specs(
            dir.path().join("models"),
            vec![
                spec(DEFAULT_MODEL_ID, "http://127.0.0.1:9/default.gguf"),
                spec("b", "http://127.0.0.1:9/b.gguf"),
                spec("c", download_url),
            ],
        );
        for id in [DEFAULT_MODEL_ID, "b"] {
            let path = registry.model_path(&spec(id, ""));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"gguf").unwrap();
        }

        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let loader = Arc::new(FakeLoader::new());
        let router = ProviderRouter::new(
            SettingsStore::new(dir.path().join("ai.json")),
            AppConfigStore::new(dir.path().join("config.json")),
            Arc::new(env),
            Arc::new(registry),
            loader.clone(),
            Arc::new(FakeProbe::none()),
        );

        Fixture {
            _dir: dir,
            router,
            loader,
        }
    }

    #[tokio::test]
    async fn test_local_explain_of_shell_script() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");

        let answer = f
            .router
            .explain_file(Path::new("/tmp/clean.sh"), "#!/bin/bash\nrm -rf /tmp/x\n")
            .await
            .unwrap();

        assert!(!answer.trim().is_empty());
        assert!(answer.split_whitespace().count() <= 1024);
        assert_eq!(f.loader.loads().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_remote_key_makes_no_request() {
        let server = StubServer::start(200, "{}").await;
        let f = fixture(
            &[("LANTERN_AI_PROVIDER", "gpt"), ("LANTERN_AI_BASE_URL", server.url.as_str())],
            "http://127.0.0.1:9/c.gguf",
        );

        let err = f
            .router
            .explain_file(Path::new("/etc/fstab"), "UUID=abc / ext4 defaults 0 1\n")
            .await
            .unwrap_err();

        assert!(matches!(err, AIError::MissingCredential { provider: Provider::Gpt, .. }));
        assert_eq!(server.hits(), 0);
        assert!(f.loader.loads().is_empty());
    }

    #[tokio::test]
    async fn test_remote_route_uses_stored_key() {
        let server = StubServer::start(
            200,
            r#"{"choices":[{"message":{"content":"A systemd unit."}}]}"#,
        )
        .await;
        let f = fixture(&[("LANTERN_AI_BASE_URL", server.url.as_str())], "http://127.0.0.1:9/c.gguf");
        f.router
            .settings()
            .set_provider_and_key(Provider::Gpt, "sk-stored", false)
            .unwrap();

        let answer = f
            .router
            .explain_directory(Path::new("/etc/systemd/system"), "[FILE] app.service")
            .await
            .unwrap();

        assert_eq!(answer, "A systemd unit.");
        assert!(server.requests()[0].contains("sk-stored"));
    }

    #[tokio::test]
    async fn test_unsupported_provider() {
        let f = fixture(&[("LANTERN_AI_PROVIDER", "claude")], "http://127.0.0.1:9/c.gguf");
        let err = f.router.ask("hi", None).await.unwrap_err();
        assert!(matches!(err, AIError::UnsupportedProvider(p) if p == "claude"));
    }

    #[tokio::test]
    async fn test_copilot_is_not_configured() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");
        f.router
            .settings()
            .set_provider_and_key(Provider::Copilot, "gh-token", false)
            .unwrap();
        let err = f.router.ask("hi", None).await.unwrap_err();
        assert!(matches!(err, AIError::NotConfigured(Provider::Copilot)));
    }

    #[tokio::test]
    async fn test_switching_provider_does_not_touch_engine() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");
        f.router.ask("warm up", None).await.unwrap();
        assert_eq!(f.loader.live_models(), 1);

        f.router.settings().set_active_provider(Provider::Gemini).unwrap();
        f.router.settings().set_active_provider(Provider::Local).unwrap();

        assert_eq!(f.loader.live_models(), 1);
        assert_eq!(f.loader.loads().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_uses_stored_model() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");
        f.router.settings().set_local_model("b").unwrap();

        let answer = f.router.ask("which model?", None).await.unwrap();
        assert!(answer.starts_with("b.gguf"));
    }

    #[tokio::test]
    async fn test_unknown_stored_model_falls_back_to_default() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");
        f.router.settings().set_local_model("retired-model").unwrap();

        let status = f.router.engine_status().await.unwrap();
        assert_eq!(status.model_id, DEFAULT_MODEL_ID);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_model_keeps_current() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");
        f.router.ask("warm up", None).await.unwrap();

        let err = f.router.switch_model("nonexistent-id").await.unwrap_err();
        assert!(matches!(err, AIError::Local(LocalAIError::UnknownModel(_))));

        let answer = f.router.ask("still there?", None).await.unwrap();
        assert!(answer.starts_with(&format!("{}.gguf", DEFAULT_MODEL_ID)));
    }

    #[tokio::test]
    async fn test_select_by_index_downloads_and_switches() {
        let server = StubServer::start(200, "fresh weights").await;
        let f = fixture(&[], &format!("{}/c.gguf", server.url));

        let spec = f.router.select_local_model("3", None).await.unwrap();

        assert_eq!(spec.id, "c");
        assert!(f.router.is_installed(&spec));
        assert_eq!(server.hits(), 1);
        assert_eq!(f.router.settings().load().local_model_id.as_deref(), Some("c"));
        assert_eq!(f.router.settings().load().provider, "local");
        assert_eq!(f.router.engine_status().await.unwrap().model_id, "c");

        // Already installed: no second download.
        f.router.select_local_model("b", None).await.unwrap();
        f.router.select_local_model("c", None).await.unwrap();
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_download_of_installed_model_is_noop() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");
        let path = f.router.download_model(None).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"gguf");
    }

    #[tokio::test]
    async fn test_download_sends_token_to_gated_host_only() {
        let server = StubServer::start(200, "w").await;
        let f = fixture(
            &[("LANTERN_HF_TOKEN", "hf_secret")],
            &format!("{}/c.gguf", server.url),
        );

        f.router.download("c", None).await.unwrap();
        assert!(!server.requests()[0].contains("hf_secret"));
    }

    #[tokio::test]
    async fn test_download_unknown_id() {
        let f = fixture(&[], "http://127.0.0.1:9/c.gguf");
        let err = f.router.download("zzz", None).await.unwrap_err();
        assert!(matches!(err, AIError::Local(LocalAIError::UnknownModel(_))));
    }
}
