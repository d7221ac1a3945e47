//! Path utilities for Lantern config and data directories.

use std::path::PathBuf;

/// Environment override for the models base directory.
pub const MODELS_DIR_ENV: &str = "LANTERN_MODELS_DIR";

/// Environment override for the llama-server binary.
pub const LLAMA_SERVER_ENV: &str = "LANTERN_LLAMA_SERVER";

/// Get the Lantern config directory (~/.config/lantern/ on Linux).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lantern")
}

/// Get the Lantern data directory (~/.local/share/lantern/ on Linux).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lantern")
}

/// Get the models directory, honouring `LANTERN_MODELS_DIR`.
pub fn models_dir() -> PathBuf {
    match std::env::var_os(MODELS_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => data_dir().join("models"),
    }
}

/// Get the bin directory for bundled tools.
pub fn bin_dir() -> PathBuf {
    data_dir().join("bin")
}

/// Local manifest override consulted when the remote manifest is unreachable.
pub fn models_override_path() -> PathBuf {
    config_dir().join("models.local.json")
}

/// Get the path where a bundled llama-server binary would live.
pub fn bundled_llama_server_path() -> PathBuf {
    let binary_name = if cfg!(target_os = "windows") {
        "llama-server.exe"
    } else {
        "llama-server"
    };
    bin_dir().join(binary_name)
}

/// Locate a llama-server binary: explicit override, bundled copy, then `PATH`.
pub fn find_llama_server() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(LLAMA_SERVER_ENV) {
        let explicit = PathBuf::from(explicit);
        if explicit.is_file() {
            return Some(explicit);
        }
    }

    let bundled = bundled_llama_server_path();
    if bundled.is_file() {
        return Some(bundled);
    }

    which::which("llama-server").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_path_is_under_config_dir() {
        let path = models_override_path();
        assert!(path.starts_with(config_dir()));
        assert!(path.ends_with("models.local.json"));
    }

    #[test]
    fn test_bundled_server_under_bin_dir() {
        assert!(bundled_llama_server_path().starts_with(bin_dir()));
    }
}
