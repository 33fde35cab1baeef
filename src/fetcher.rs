//! Bounded demo download.
//!
//! A fetch moves through `validate -> awaiting_url -> downloading -> verifying`.
//! Any failure after the target path is known removes the partial file before
//! returning, and an artifact is only handed out when the exchange succeeded
//! and its size lies in `(0, max_file_size]`.

use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{DemoError, FetchError, Result};
use crate::rate_limiter::until_cancelled;
use crate::resolver::DemoUrlSource;
use crate::sharecode::ShareCode;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Validate,
    AwaitingUrl,
    Downloading,
    Verifying,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchPhase::Validate => "validate",
            FetchPhase::AwaitingUrl => "awaiting_url",
            FetchPhase::Downloading => "downloading",
            FetchPhase::Verifying => "verifying",
        };
        f.write_str(name)
    }
}

/// A verified demo on local storage.
#[derive(Debug, Clone, Serialize)]
pub struct DemoArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: SystemTime,
}

pub struct DemoFetcher {
    source: Arc<dyn DemoUrlSource>,
    client: reqwest::Client,
    temp_dir: PathBuf,
    max_file_size: u64,
}

impl DemoFetcher {
    pub fn new(
        source: Arc<dyn DemoUrlSource>,
        temp_dir: impl Into<PathBuf>,
        max_file_size: u64,
        download_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(|e| DemoError::Config(format!("Failed to build download client: {}", e)))?;

        Ok(Self {
            source,
            client,
            temp_dir: temp_dir.into(),
            max_file_size,
        })
    }

    pub fn from_config(config: &Config, source: Arc<dyn DemoUrlSource>) -> Result<Self> {
        Self::new(
            source,
            config.temp_dir.clone(),
            config.max_file_size,
            config.download_timeout(),
        )
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Deterministic target path: one artifact per sharecode, keeping the
    /// compression suffix of the resolved URL.
    pub fn artifact_path(&self, sharecode: &ShareCode, url: &str) -> PathBuf {
        let url_path = reqwest::Url::parse(url)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        let extension = if url_path.ends_with(".bz2") {
            "dem.bz2"
        } else {
            "dem"
        };
        self.temp_dir
            .join(format!("{}.{}", sharecode.as_str(), extension))
    }

    /// Fetch a demo, returning its local path or `None` on any failure.
    pub async fn fetch(&self, sharecode: &str) -> Option<PathBuf> {
        self.try_fetch(sharecode, None)
            .await
            .ok()
            .map(|artifact| artifact.path)
    }

    pub async fn try_fetch(
        &self,
        sharecode: &str,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<DemoArtifact, FetchError> {
        let code = match ShareCode::parse(sharecode) {
            Ok(code) => code,
            Err(err) => {
                warn!(sharecode, phase = %FetchPhase::Validate, error = %err, "Rejected sharecode");
                return Err(err.into());
            }
        };

        let url = match self.source.resolve(code.as_str(), cancel).await {
            Some(url) => url,
            None => {
                let err = if cancel.is_some_and(|token| token.is_cancelled()) {
                    FetchError::Cancelled
                } else {
                    FetchError::Unavailable
                };
                warn!(sharecode = %code, phase = %FetchPhase::AwaitingUrl, error = %err, "No demo URL");
                return Err(err);
            }
        };

        let path = self.artifact_path(&code, &url);
        match self.download_and_verify(&url, &path, cancel).await {
            Ok(size_bytes) => {
                info!(sharecode = %code, path = %path.display(), bytes = size_bytes, "Demo downloaded");
                Ok(DemoArtifact {
                    path,
                    size_bytes,
                    created_at: SystemTime::now(),
                })
            }
            Err((phase, err)) => {
                warn!(
                    sharecode = %code,
                    phase = %phase,
                    path = %path.display(),
                    error = %err,
                    "Demo fetch failed"
                );
                cleanup_artifact(&path).await;
                Err(err)
            }
        }
    }

    async fn download_and_verify(
        &self,
        url: &str,
        path: &Path,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<u64, (FetchPhase, FetchError)> {
        let written = self
            .download(url, path, cancel)
            .await
            .map_err(|err| (FetchPhase::Downloading, err))?;
        self.verify(path, written)
            .await
            .map_err(|err| (FetchPhase::Verifying, err))
    }

    async fn download(
        &self,
        url: &str,
        path: &Path,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<u64, FetchError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let response = cancellable(cancel, self.client.get(url).send()).await??;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_file_size {
                return Err(FetchError::SizeExceeded {
                    limit: self.max_file_size,
                    observed: declared,
                });
            }
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = cancellable(cancel, stream.next()).await? {
            let chunk = chunk?;
            let observed = written + chunk.len() as u64;
            if observed > self.max_file_size {
                // Dropping the stream closes the connection.
                return Err(FetchError::SizeExceeded {
                    limit: self.max_file_size,
                    observed,
                });
            }
            file.write_all(&chunk).await?;
            written = observed;
        }

        file.flush().await?;
        debug!(url, bytes = written, "Download stream finished");
        Ok(written)
    }

    async fn verify(&self, path: &Path, written: u64) -> std::result::Result<u64, FetchError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FetchError::IncompleteOrEmpty { bytes: 0 })
            }
            Err(err) => return Err(err.into()),
        };

        let size = metadata.len();
        if size == 0 || size != written {
            return Err(FetchError::IncompleteOrEmpty { bytes: size });
        }
        if size > self.max_file_size {
            return Err(FetchError::SizeExceeded {
                limit: self.max_file_size,
                observed: size,
            });
        }
        Ok(size)
    }
}

/// Remove an artifact. Never fails: errors are logged and reported as `false`.
pub async fn cleanup_artifact(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed demo artifact");
            true
        }
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to remove demo artifact");
            false
        }
    }
}

async fn cancellable<F: Future>(
    cancel: Option<&CancellationToken>,
    future: F,
) -> std::result::Result<F::Output, FetchError> {
    until_cancelled(cancel, future)
        .await
        .ok_or(FetchError::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoUrl;

    #[async_trait::async_trait]
    impl DemoUrlSource for NoUrl {
        async fn resolve(&self, _: &str, _: Option<&CancellationToken>) -> Option<String> {
            None
        }
    }

    const CODE: &str = "CSGO-GADqf-jjyJ8-cSP2r-smZRo-TO2xK";

    fn fetcher(dir: &Path) -> DemoFetcher {
        DemoFetcher::new(Arc::new(NoUrl), dir, 1024, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_artifact_path_follows_compression_suffix() {
        let fetcher = fetcher(Path::new("/tmp/demos"));
        let code = ShareCode::parse(CODE).unwrap();

        assert_eq!(
            fetcher.artifact_path(&code, "https://replay1.valve.net/730/1_2_3.dem.bz2"),
            PathBuf::from(format!("/tmp/demos/{}.dem.bz2", CODE))
        );
        assert_eq!(
            fetcher.artifact_path(&code, "https://cdn.example/demos/1.dem?sig=abc.bz2"),
            PathBuf::from(format!("/tmp/demos/{}.dem", CODE))
        );
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(FetchPhase::AwaitingUrl.to_string(), "awaiting_url");
        assert_eq!(FetchPhase::Verifying.to_string(), "verifying");
    }

    #[tokio::test]
    async fn test_unresolved_url_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = fetcher(dir.path()).try_fetch(CODE, None).await;
        assert!(matches!(result, Err(FetchError::Unavailable)));
        assert!(fetcher(dir.path()).fetch(CODE).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_sharecode_rejected_before_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let result = fetcher(dir.path()).try_fetch("CSGO-12345", None).await;
        assert!(matches!(result, Err(FetchError::InvalidShareCode(_))));
    }

    #[tokio::test]
    async fn test_cleanup_is_quiet_for_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.dem");
        assert!(!cleanup_artifact(&path).await);

        tokio::fs::write(&path, b"demo").await.unwrap();
        assert!(cleanup_artifact(&path).await);
        assert!(!path.exists());
    }
}
