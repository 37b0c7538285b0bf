//! Diagnostic artifact storage, retry policy and persistence ports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub mod postgres;
pub mod store;

pub use postgres::PgStore;
pub use store::{
    AccountCategoryRecord, CredentialBinding, CredentialStore, Directory, MemoryStore,
    PropertyRecord, ProviderRecord, RevenueStore, RunStatus, StoreError,
};

pub const CRATE_NAME: &str = "aspi-storage";

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn artifact_relative_path(
        &self,
        captured_at: DateTime<Utc>,
        scope: &Path,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let stamp = captured_at.format("%Y%m%d_%H%M%S").to_string();
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        PathBuf::from(stamp)
            .join(scope)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Stores a failure capture under `<stamp>/<provider>/<job-id>/<sha>.<ext>`.
    pub async fn store_diagnostic(
        &self,
        captured_at: DateTime<Utc>,
        job_id: Uuid,
        provider: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let scope = PathBuf::from(sanitize_segment(provider)).join(job_id.to_string());
        self.store_scoped(captured_at, &scope, extension, bytes).await
    }

    /// Hash-addressed write with an atomic temp-file rename; identical bytes are deduplicated.
    async fn store_scoped(
        &self,
        captured_at: DateTime<Utc>,
        scope: &Path,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.artifact_relative_path(captured_at, scope, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating artifact directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredArtifact {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp artifact {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: u16) -> RetryDisposition {
    if (500..600).contains(&status) || status == 429 || status == 408 {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Linear backoff with a bounded attempt budget: `base + step * attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            step: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_add(self.step.saturating_mul(attempt))
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            step: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn artifact_hashing_is_stable() {
        let hash = ArtifactStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn diagnostics_are_scoped_by_provider_and_job() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let captured_at = DateTime::parse_from_rfc3339("2025-10-01T03:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);
        let job_id = Uuid::new_v4();

        let first = store
            .store_diagnostic(captured_at, job_id, "a8net", "html", b"<html>busy</html>")
            .await
            .expect("first store");
        let second = store
            .store_diagnostic(captured_at, job_id, "a8net", "html", b"<html>busy</html>")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert!(first
            .relative_path
            .starts_with(PathBuf::from("20251001_030000").join("a8net").join(job_id.to_string())));
        assert!(first.absolute_path.exists());
    }

    #[test]
    fn provider_segments_cannot_escape_the_root() {
        assert_eq!(sanitize_segment("../etc"), "___etc");
        assert_eq!(sanitize_segment(""), "unknown");
    }

    #[test]
    fn backoff_grows_linearly_from_the_base() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(15));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(30));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(classify_status(503), RetryDisposition::Retryable);
        assert_eq!(classify_status(429), RetryDisposition::Retryable);
        assert_eq!(classify_status(404), RetryDisposition::NonRetryable);
    }
}
