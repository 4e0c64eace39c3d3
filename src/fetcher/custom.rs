use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::{config::Distribution, error::FetchError};

use super::{ArtifactFetcher, LATEST};

/// Local catalog: a directory of operator-supplied `{version}.jar` files.
///
/// `latest` picks the most recently modified jar.
pub struct CustomFetcher {
    catalog_dir: PathBuf,
}

impl CustomFetcher {
    pub fn new(catalog_dir: PathBuf) -> Self {
        Self { catalog_dir }
    }

    fn not_found(version: &str) -> FetchError {
        FetchError::ArtifactNotFound {
            distribution: Distribution::Custom,
            version: version.to_string(),
        }
    }

    async fn newest_jar(&self) -> Result<Option<PathBuf>, FetchError> {
        let mut entries = match tokio::fs::read_dir(&self.catalog_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jar") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified()?;
            if newest.as_ref().is_none_or(|(at, _)| modified > *at) {
                newest = Some((modified, path));
            }
        }

        Ok(newest.map(|(_, path)| path))
    }
}

#[async_trait]
impl ArtifactFetcher for CustomFetcher {
    fn distribution(&self) -> Distribution {
        Distribution::Custom
    }

    async fn fetch(&self, version: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        if version.is_empty() || version.contains(['/', '\\']) || version.starts_with('.') {
            return Err(Self::not_found(version));
        }

        let source = if version == LATEST {
            self.newest_jar().await?.ok_or_else(|| Self::not_found(version))?
        } else {
            let candidate = self.catalog_dir.join(format!("{version}.jar"));
            if !tokio::fs::try_exists(&candidate).await? {
                return Err(Self::not_found(version));
            }
            candidate
        };

        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Self::not_found(version))?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(format!("custom-{stem}.jar"));
        tokio::fs::copy(&source, &dest).await?;

        info!(source = %source.display(), dest = %dest.display(), "copied custom artifact");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_named_version() {
        let catalog = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        tokio::fs::write(catalog.path().join("mypack-2.jar"), b"jar").await.unwrap();

        let fetcher = CustomFetcher::new(catalog.path().to_path_buf());
        let path = fetcher.fetch("mypack-2", dest.path()).await.unwrap();

        assert_eq!(path, dest.path().join("custom-mypack-2.jar"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"jar");
    }

    #[tokio::test]
    async fn unknown_version_is_not_found() {
        let catalog = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let fetcher = CustomFetcher::new(catalog.path().to_path_buf());
        let err = fetcher.fetch("nope", dest.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::ArtifactNotFound { .. }));

        let err = fetcher.fetch("../escape", dest.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::ArtifactNotFound { .. }));

        let err = fetcher.fetch(LATEST, dest.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::ArtifactNotFound { .. }));
    }

    #[tokio::test]
    async fn latest_resolves_to_a_catalog_jar() {
        let catalog = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        tokio::fs::write(catalog.path().join("only.jar"), b"x").await.unwrap();
        tokio::fs::write(catalog.path().join("notes.txt"), b"ignored").await.unwrap();

        let fetcher = CustomFetcher::new(catalog.path().to_path_buf());
        let path = fetcher.fetch(LATEST, dest.path()).await.unwrap();
        assert_eq!(path, dest.path().join("custom-only.jar"));
    }
}
