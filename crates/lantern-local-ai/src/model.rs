//! Model download and management.

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::LocalAIError;
use crate::registry::ModelSpec;

/// Host whose downloads receive the bearer token.
pub const GATED_MODEL_HOST: &str = "huggingface.co";

/// Bytes written to disk between progress reports.
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Progress callback: `(downloaded_bytes, total_bytes)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Manager for downloading and managing model weights.
pub struct ModelManager {
    client: reqwest::Client,
    token: Option<String>,
}

impl ModelManager {
    /// Create a new model manager.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            token: None,
        }
    }

    /// Attach a bearer token for gated downloads.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Check if weights exist at `path`.
    pub fn is_installed(path: &Path) -> bool {
        path.is_file()
    }

    /// Download `spec` to `dest`.
    ///
    /// Does nothing when `dest` already exists. Otherwise the body is
    /// streamed into a `.part` sidecar which is renamed over `dest` once
    /// complete. A failed transfer leaves the sidecar behind; the next
    /// attempt truncates it.
    pub async fn download(
        &self,
        spec: &ModelSpec,
        dest: &Path,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<PathBuf, LocalAIError> {
        if Self::is_installed(dest) {
            debug!("Model '{}' already present at {:?}", spec.id, dest);
            return Ok(dest.to_path_buf());
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let part = part_path(dest);

        info!("Downloading model '{}' to {:?}", spec.id, dest);

        let mut request = self.client.get(&spec.download_url);
        if let Some(token) = self.token_for(&spec.download_url) {
            debug!("Attaching bearer token for {}", GATED_MODEL_HOST);
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            LocalAIError::DownloadFailed(format!("request to {} failed: {}", spec.download_url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LocalAIError::DownloadFailed(describe_http_failure(
                status,
                &spec.download_url,
            )));
        }

        let total = response.content_length();
        let report = |downloaded: u64| {
            if let (Some(cb), Some(total)) = (progress, total) {
                cb(downloaded, total);
            }
        };

        let mut file = File::create(&part)?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::with_capacity(DOWNLOAD_CHUNK_SIZE);
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                LocalAIError::DownloadFailed(format!(
                    "transfer of {} interrupted after {} bytes: {}",
                    spec.download_url, downloaded, e
                ))
            })?;
            pending.extend_from_slice(&chunk);

            while pending.len() >= DOWNLOAD_CHUNK_SIZE {
                let block: Vec<u8> = pending.drain(..DOWNLOAD_CHUNK_SIZE).collect();
                file.write_all(&block)?;
                hasher.update(&block);
                downloaded += block.len() as u64;
                report(downloaded);
            }
        }

        if !pending.is_empty() {
            file.write_all(&pending)?;
            hasher.update(&pending);
            downloaded += pending.len() as u64;
            report(downloaded);
        }
        file.flush()?;
        drop(file);

        if let Some(expected) = &spec.sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = fs::remove_file(&part);
                return Err(LocalAIError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            debug!("Checksum verified: {}", actual);
        }

        fs::rename(&part, dest)?;
        info!("Model '{}' downloaded ({} bytes)", spec.id, downloaded);
        Ok(dest.to_path_buf())
    }

    fn token_for(&self, url: &str) -> Option<&str> {
        let token = self.token.as_deref()?;
        is_gated_host(url).then_some(token)
    }
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Sidecar path used while a download is in progress.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn is_gated_host(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .map(|host| host == GATED_MODEL_HOST || host.ends_with(&format!(".{}", GATED_MODEL_HOST)))
        .unwrap_or(false)
}

fn describe_http_failure(status: reqwest::StatusCode, url: &str) -> String {
    format!(
        "HTTP {} from {}. If the model is gated, accept its license on {} and \
         provide an access token via LANTERN_HF_TOKEN or `hf_token` in config.json; \
         otherwise check that the URL is still valid.",
        status, url, GATED_MODEL_HOST
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubServer;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn spec_for(url: &str) -> ModelSpec {
        ModelSpec {
            id: "tiny".to_string(),
            name: "Tiny".to_string(),
            description: String::new(),
            subdir: "tiny".to_string(),
            filename: "tiny.gguf".to_string(),
            download_url: url.to_string(),
            recommended_ram_gb: 1,
            sha256: None,
        }
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/m/phi/model.gguf")),
            PathBuf::from("/m/phi/model.gguf.part")
        );
    }

    #[test]
    fn test_gated_host_matching() {
        assert!(is_gated_host("https://huggingface.co/org/repo/resolve/main/x.gguf"));
        assert!(is_gated_host("https://cdn-lfs.huggingface.co/x"));
        assert!(!is_gated_host("https://nothuggingface.co/x"));
        assert!(!is_gated_host("https://example.com/huggingface.co"));
        assert!(!is_gated_host("not a url"));
    }

    #[test]
    fn test_token_only_for_gated_host() {
        let manager = ModelManager::new().with_token(Some("hf_abc".to_string()));
        assert_eq!(manager.token_for("https://huggingface.co/x"), Some("hf_abc"));
        assert_eq!(manager.token_for("https://example.com/x"), None);

        let blank = ModelManager::new().with_token(Some("  ".to_string()));
        assert_eq!(blank.token_for("https://huggingface.co/x"), None);
    }

    #[tokio::test]
    async fn test_existing_file_is_left_alone() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("tiny.gguf");
        std::fs::write(&dest, b"weights").unwrap();

        let server = StubServer::start(200, "unused").await;
        let spec = spec_for(&format!("{}/tiny.gguf", server.url));

        let path = ModelManager::new().download(&spec, &dest, None).await.unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"weights");
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn test_download_streams_and_reports_progress() {
        let body: Vec<u8> = (0..(DOWNLOAD_CHUNK_SIZE * 2 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let server = StubServer::start(200, body.clone()).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("tiny").join("tiny.gguf");
        let spec = spec_for(&format!("{}/tiny.gguf", server.url));

        let seen = Mutex::new(Vec::new());
        let cb = |done: u64, total: u64| seen.lock().unwrap().push((done, total));

        ModelManager::new()
            .download(&spec, &dest, Some(&cb))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!part_path(&dest).exists());

        let total = body.len() as u64;
        let seen = seen.into_inner().unwrap();
        assert_eq!(
            seen,
            vec![
                (DOWNLOAD_CHUNK_SIZE as u64, total),
                (DOWNLOAD_CHUNK_SIZE as u64 * 2, total),
                (total, total),
            ]
        );
    }

    #[tokio::test]
    async fn test_http_error_names_status() {
        let server = StubServer::start(403, "forbidden").await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("tiny.gguf");
        let spec = spec_for(&format!("{}/tiny.gguf", server.url));

        let err = ModelManager::new()
            .download(&spec, &dest, None)
            .await
            .unwrap_err();

        match err {
            LocalAIError::DownloadFailed(msg) => {
                assert!(msg.contains("403"), "{}", msg);
                assert!(msg.contains("license"), "{}", msg);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_interrupted_transfer_keeps_sidecar_for_retry() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("tiny").join("tiny.gguf");

        let broken = StubServer::truncated("partial", 4096).await;
        let spec = spec_for(&format!("{}/tiny.gguf", broken.url));
        let err = ModelManager::new()
            .download(&spec, &dest, None)
            .await
            .unwrap_err();

        assert!(matches!(err, LocalAIError::DownloadFailed(_)), "{err:?}");
        assert!(part_path(&dest).exists());
        assert!(!dest.exists());

        let healthy = StubServer::start(200, "complete weights").await;
        let spec = spec_for(&format!("{}/tiny.gguf", healthy.url));
        ModelManager::new()
            .download(&spec, &dest, None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"complete weights");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_removes_sidecar() {
        let server = StubServer::start(200, "abc").await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("tiny.gguf");
        let mut spec = spec_for(&format!("{}/tiny.gguf", server.url));
        spec.sha256 = Some("00".repeat(32));

        let err = ModelManager::new()
            .download(&spec, &dest, None)
            .await
            .unwrap_err();

        assert!(matches!(err, LocalAIError::ChecksumMismatch { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }
}
