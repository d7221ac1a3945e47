//! Provider selection and credentials.

use lantern_ai::{Provider, ProcessEnv, SetOutcome, SettingsStore};

fn store() -> SettingsStore {
    SettingsStore::from_env(&ProcessEnv)
}

fn parse(provider: &str) -> miette::Result<Provider> {
    provider.parse().map_err(|e| miette::miette!("{}", e))
}

/// Show the effective settings with keys masked.
pub(crate) fn show() -> miette::Result<()> {
    let store = store();
    let settings = store.get_effective_settings();

    println!("Provider: {}", settings.provider);
    if let Some(url) = &settings.base_url {
        println!("Base URL: {}", url);
    }
    if let Some(model) = &settings.model {
        println!("Model:    {}", model);
    }
    if let Ok(provider) = settings.provider.parse::<Provider>() {
        if provider.is_remote() {
            println!(
                "API key:  {}",
                settings.api_key.as_deref().map(mask).unwrap_or_else(|| "(not set)".to_string())
            );
        }
    }
    println!();
    println!("Settings file: {}", store.path().display());
    Ok(())
}

/// Make `provider` active.
pub(crate) fn activate(provider: &str) -> miette::Result<()> {
    let provider = parse(provider)?;
    store()
        .set_active_provider(provider)
        .map_err(|e| miette::miette!("{}", e))?;
    println!("Active provider: {}", provider);
    Ok(())
}

/// Store an API key for `provider` and make it active.
pub(crate) fn set_key(provider: &str, key: &str, overwrite: bool) -> miette::Result<()> {
    let provider = parse(provider)?;
    let outcome = store()
        .set_provider_and_key(provider, key, overwrite)
        .map_err(|e| miette::miette!("{}", e))?;
    print_outcome(&outcome, &format!("Active provider: {}", provider));
    Ok(())
}

/// Configure the selfhost endpoint and make it active.
pub(crate) fn selfhost(
    url: &str,
    key: Option<&str>,
    model: Option<&str>,
    overwrite: bool,
) -> miette::Result<()> {
    let outcome = store()
        .set_selfhost_config(url, key, model, overwrite)
        .map_err(|e| miette::miette!("{}", e))?;
    print_outcome(&outcome, &format!("Active provider: selfhost ({})", url.trim()));
    Ok(())
}

fn print_outcome(outcome: &SetOutcome, done: &str) {
    match outcome.blocked_field {
        Some(field) => {
            println!("{} is already set; nothing was changed.", field);
            println!("Pass --overwrite to replace it.");
        }
        None => println!("{}", done),
    }
}

/// First and last four characters of a secret.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask("sk-abcdefghijkl"), "sk-a...ijkl");
        assert_eq!(mask("short"), "*****");
        assert_eq!(mask(""), "");
    }
}
