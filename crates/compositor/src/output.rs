//! Output path resolution: `<operation>-<timestampMillis>.<ext>` inside one
//! staging directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::OpenOptions;
use tracing::warn;

use crate::error::CompositorResult;

#[derive(Debug, Clone)]
pub struct OutputResolver {
    dir: PathBuf,
}

impl OutputResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn resolve_at(&self, operation: &str, extension: &str, millis: i64) -> PathBuf {
        self.dir.join(format!("{}-{}.{}", operation, millis, extension))
    }

    /// Create the staging directory and reserve a name by creating an empty
    /// placeholder. Concurrent requests in the same millisecond get
    /// consecutive stamps; the engine overwrites the placeholder.
    pub async fn allocate(&self, operation: &str, extension: &str) -> CompositorResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut millis = Utc::now().timestamp_millis();
        loop {
            let candidate = self.resolve_at(operation, extension, millis);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop a placeholder left by [`allocate`](Self::allocate) for a render
    /// that never happened.
    pub async fn release(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove reserved output");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_operation_and_timestamp() {
        let resolver = OutputResolver::new("/tmp/out");
        assert_eq!(
            resolver.resolve_at("light-leak", "mp4", 1700000000123),
            PathBuf::from("/tmp/out/light-leak-1700000000123.mp4")
        );
    }

    #[tokio::test]
    async fn allocate_creates_dir_and_skips_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = OutputResolver::new(tmp.path().join("renders"));

        let first = resolver.allocate("concat", "mp4").await.unwrap();
        assert!(resolver.dir().is_dir());
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("concat-"));
        assert_eq!(first.extension().unwrap(), "mp4");

        assert!(first.is_file());
        let second = resolver.allocate("concat", "mp4").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_share_a_name() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = OutputResolver::new(tmp.path());

        let allocations = (0..16).map(|_| resolver.allocate("concat", "mp4"));
        let mut paths: Vec<PathBuf> = futures::future::join_all(allocations)
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 16);
    }

    #[tokio::test]
    async fn release_removes_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = OutputResolver::new(tmp.path());

        let path = resolver.allocate("trim", "mp4").await.unwrap();
        resolver.release(&path).await;
        assert!(!path.exists());
        resolver.release(&path).await;
    }
}
