//! Token for gated model downloads.

use lantern_ai::{AppConfigStore, ProcessEnv};

/// Store `token`, or clear it with `None`.
pub(crate) fn set(token: Option<&str>) -> miette::Result<()> {
    let store = AppConfigStore::from_env(&ProcessEnv);
    store
        .set_hf_token(token)
        .map_err(|e| miette::miette!("{}", e))?;

    match token {
        Some(_) => println!("Download token saved to {}", store.path().display()),
        None => println!("Download token cleared"),
    }
    Ok(())
}
