use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{config::Distribution, error::FetchError};

use super::{ArtifactFetcher, LATEST, download, get_json};

#[derive(Debug, Clone, Deserialize)]
struct Project {
    versions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Builds {
    builds: Vec<Build>,
}

#[derive(Debug, Clone, Deserialize)]
struct Build {
    build: u32,
}

/// PaperMC v2 project API. Always takes the newest build of a version.
pub struct PaperFetcher {
    client: reqwest::Client,
    api_url: String,
}

impl PaperFetcher {
    pub fn new(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    fn not_found(version: &str) -> FetchError {
        FetchError::ArtifactNotFound {
            distribution: Distribution::Paper,
            version: version.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for PaperFetcher {
    fn distribution(&self) -> Distribution {
        Distribution::Paper
    }

    async fn fetch(&self, version: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let project: Project = get_json(&self.client, &self.api_url).await?;

        let resolved = resolve(&project, version).ok_or_else(|| Self::not_found(version))?;

        let builds: Builds = get_json(
            &self.client,
            &format!("{}/versions/{}/builds", self.api_url, resolved),
        )
        .await?;
        let build = newest_build(&builds).ok_or_else(|| Self::not_found(version))?;

        let file_name = format!("paper-{resolved}-{build}.jar");
        let url = format!(
            "{}/versions/{}/builds/{}/downloads/{}",
            self.api_url, resolved, build, file_name
        );
        download(&self.client, &url, dest_dir, &file_name).await
    }
}

/// `latest` is the last version the project lists.
fn resolve(project: &Project, version: &str) -> Option<String> {
    if version == LATEST {
        project.versions.last().cloned()
    } else {
        project.versions.iter().find(|v| *v == version).cloned()
    }
}

fn newest_build(builds: &Builds) -> Option<u32> {
    builds.builds.last().map(|b| b.build)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        serde_json::from_value(serde_json::json!({
            "project_id": "paper",
            "versions": ["1.20.4", "1.20.6", "1.21.1"]
        }))
        .unwrap()
    }

    #[test]
    fn latest_is_the_last_listed_version() {
        assert_eq!(resolve(&project(), LATEST).as_deref(), Some("1.21.1"));
        assert_eq!(resolve(&project(), "1.20.6").as_deref(), Some("1.20.6"));
        assert!(resolve(&project(), "1.8.8").is_none());
    }

    #[test]
    fn newest_build_wins() {
        let builds: Builds = serde_json::from_value(serde_json::json!({
            "version": "1.21.1",
            "builds": [{"build": 118, "channel": "default"}, {"build": 132, "channel": "default"}]
        }))
        .unwrap();
        assert_eq!(newest_build(&builds), Some(132));

        let empty: Builds = serde_json::from_value(serde_json::json!({"builds": []})).unwrap();
        assert_eq!(newest_build(&empty), None);
    }
}
