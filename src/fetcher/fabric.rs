use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{config::Distribution, error::FetchError};

use super::{ArtifactFetcher, LATEST, download, get_json};

#[derive(Debug, Clone, Deserialize)]
struct GameVersion {
    version: String,
    #[serde(default)]
    stable: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct LoaderEntry {
    loader: Component,
}

#[derive(Debug, Clone, Deserialize)]
struct Component {
    version: String,
}

/// Fabric meta API; builds the server launcher for the newest loader and installer.
pub struct FabricFetcher {
    client: reqwest::Client,
    meta_url: String,
}

impl FabricFetcher {
    pub fn new(client: reqwest::Client, meta_url: String) -> Self {
        Self { client, meta_url }
    }

    fn not_found(version: &str) -> FetchError {
        FetchError::ArtifactNotFound {
            distribution: Distribution::Fabric,
            version: version.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for FabricFetcher {
    fn distribution(&self) -> Distribution {
        Distribution::Fabric
    }

    async fn fetch(&self, version: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let games: Vec<GameVersion> =
            get_json(&self.client, &format!("{}/game", self.meta_url)).await?;

        let game = resolve(games, version).ok_or_else(|| Self::not_found(version))?;

        let loaders: Vec<LoaderEntry> =
            get_json(&self.client, &format!("{}/loader/{}", self.meta_url, game)).await?;
        let loader = loaders
            .into_iter()
            .next()
            .map(|l| l.loader.version)
            .ok_or_else(|| Self::not_found(version))?;

        let installers: Vec<Component> =
            get_json(&self.client, &format!("{}/installer", self.meta_url)).await?;
        let installer = installers
            .into_iter()
            .next()
            .map(|i| i.version)
            .ok_or_else(|| {
                FetchError::DownloadFailed("fabric meta lists no installer".to_string())
            })?;

        let url = format!(
            "{}/loader/{}/{}/{}/server/jar",
            self.meta_url, game, loader, installer
        );
        let file_name = format!("fabric-server-mc{game}-loader{loader}-launcher{installer}.jar");
        download(&self.client, &url, dest_dir, &file_name).await
    }
}

/// `latest` is the first stable game version; the meta lists newest first.
fn resolve(games: Vec<GameVersion>, version: &str) -> Option<String> {
    if version == LATEST {
        games.into_iter().find(|g| g.stable)
    } else {
        games.into_iter().find(|g| g.version == version)
    }
    .map(|g| g.version)
}
