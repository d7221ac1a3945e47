//! Environment access and the variable names Lantern reads.

use std::collections::HashMap;

/// Overrides the active provider.
pub const PROVIDER_ENV: &str = "LANTERN_AI_PROVIDER";
/// Overrides the provider's base URL.
pub const BASE_URL_ENV: &str = "LANTERN_AI_BASE_URL";
/// Overrides the provider's API key.
pub const API_KEY_ENV: &str = "LANTERN_AI_API_KEY";
/// Overrides the model name (or local model id).
pub const MODEL_ENV: &str = "LANTERN_AI_MODEL";
/// Bearer token for gated model downloads.
pub const HF_TOKEN_ENV: &str = "LANTERN_HF_TOKEN";
/// Path of the provider settings file.
pub const AI_CONFIG_ENV: &str = "LANTERN_AI_CONFIG";
/// Path of the app config file.
pub const APP_CONFIG_ENV: &str = "LANTERN_CONFIG";

/// Source of environment variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Trimmed value of `name`, treating blank values as unset.
pub(crate) fn lookup(env: &dyn EnvSource, name: &str) -> Option<String> {
    env.var(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values_are_unset() {
        let env = HashMap::from([
            (MODEL_ENV.to_string(), "  ".to_string()),
            (PROVIDER_ENV.to_string(), " gpt\n".to_string()),
        ]);
        assert_eq!(lookup(&env, MODEL_ENV), None);
        assert_eq!(lookup(&env, PROVIDER_ENV), Some("gpt".to_string()));
        assert_eq!(lookup(&env, API_KEY_ENV), None);
    }
}
