use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{config::Distribution, error::FetchError};

use super::{ArtifactFetcher, LATEST, download, get_json};

#[derive(Debug, Clone, Deserialize)]
struct VersionManifest {
    latest: Latest,
    versions: Vec<VersionRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct Latest {
    release: String,
    snapshot: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionRef {
    id: String,
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionJson {
    downloads: Downloads,
}

#[derive(Debug, Clone, Deserialize)]
struct Downloads {
    server: Option<ServerDownload>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerDownload {
    url: String,
}

/// Mojang launcher manifest.
pub struct VanillaFetcher {
    client: reqwest::Client,
    manifest_url: String,
}

impl VanillaFetcher {
    pub fn new(client: reqwest::Client, manifest_url: String) -> Self {
        Self {
            client,
            manifest_url,
        }
    }

    fn not_found(version: &str) -> FetchError {
        FetchError::ArtifactNotFound {
            distribution: Distribution::Vanilla,
            version: version.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for VanillaFetcher {
    fn distribution(&self) -> Distribution {
        Distribution::Vanilla
    }

    async fn fetch(&self, version: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let manifest: VersionManifest = get_json(&self.client, &self.manifest_url).await?;

        let vref = resolve(manifest, version).ok_or_else(|| Self::not_found(version))?;

        let vjson: VersionJson = get_json(&self.client, &vref.url).await?;
        let server = vjson.downloads.server.ok_or_else(|| Self::not_found(version))?;

        download(
            &self.client,
            &server.url,
            dest_dir,
            &format!("vanilla-{}.jar", vref.id),
        )
        .await
    }
}

/// `latest` and `latest-snapshot` follow the manifest's pointers.
fn resolve(manifest: VersionManifest, version: &str) -> Option<VersionRef> {
    let version_id = match version {
        LATEST => manifest.latest.release,
        "latest-snapshot" => manifest.latest.snapshot,
        other => other.to_string(),
    };

    manifest.versions.into_iter().find(|v| v.id == version_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> VersionManifest {
        serde_json::from_value(serde_json::json!({
            "latest": {"release": "1.21.1", "snapshot": "24w40a"},
            "versions": [
                {"id": "24w40a", "type": "snapshot", "url": "https://example.invalid/24w40a.json"},
                {"id": "1.21.1", "type": "release", "url": "https://example.invalid/1.21.1.json"},
                {"id": "1.20.4", "type": "release", "url": "https://example.invalid/1.20.4.json"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn aliases_follow_latest_pointers() {
        assert_eq!(resolve(manifest(), LATEST).unwrap().id, "1.21.1");
        assert_eq!(resolve(manifest(), "latest-snapshot").unwrap().id, "24w40a");
    }

    #[test]
    fn explicit_and_unknown_versions() {
        assert_eq!(
            resolve(manifest(), "1.20.4").unwrap().url,
            "https://example.invalid/1.20.4.json"
        );
        assert!(resolve(manifest(), "0.0.1").is_none());
    }
}
