//! Artifact resolution: `(distribution, version)` -> runnable package on disk.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;

use crate::{
    config::{Distribution, SupervisorConfig},
    error::FetchError,
};

mod custom;
#[cfg(feature = "catalog")]
mod fabric;
#[cfg(feature = "catalog")]
mod paper;
#[cfg(feature = "catalog")]
mod vanilla;

pub use custom::CustomFetcher;
#[cfg(feature = "catalog")]
pub use fabric::FabricFetcher;
#[cfg(feature = "catalog")]
pub use paper::PaperFetcher;
#[cfg(feature = "catalog")]
pub use vanilla::VanillaFetcher;

/// Alias accepted by every fetcher for "newest stable".
pub const LATEST: &str = "latest";

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    fn distribution(&self) -> Distribution;

    /// Downloads exactly one artifact into `dest_dir` and returns its path.
    ///
    /// Transport failures are returned as-is; retrying is up to the caller.
    async fn fetch(&self, version: &str, dest_dir: &Path) -> Result<PathBuf, FetchError>;
}

/// Picks the fetcher for a distribution. Consulted once per instance creation.
pub trait FetcherProvider: Send + Sync {
    fn fetcher(&self, distribution: Distribution) -> Arc<dyn ArtifactFetcher>;
}

/// Production provider: remote catalogs plus the local custom catalog.
pub struct CatalogFetchers {
    #[cfg(feature = "catalog")]
    vanilla: Arc<VanillaFetcher>,
    #[cfg(feature = "catalog")]
    paper: Arc<PaperFetcher>,
    #[cfg(feature = "catalog")]
    fabric: Arc<FabricFetcher>,
    custom: Arc<CustomFetcher>,
}

impl CatalogFetchers {
    pub fn new(config: &SupervisorConfig) -> Self {
        #[cfg(feature = "catalog")]
        let client = http_client();

        Self {
            #[cfg(feature = "catalog")]
            vanilla: Arc::new(VanillaFetcher::new(
                client.clone(),
                config.vanilla_manifest_url.clone(),
            )),
            #[cfg(feature = "catalog")]
            paper: Arc::new(PaperFetcher::new(client.clone(), config.paper_api_url.clone())),
            #[cfg(feature = "catalog")]
            fabric: Arc::new(FabricFetcher::new(client, config.fabric_meta_url.clone())),
            custom: Arc::new(CustomFetcher::new(config.custom_artifacts_dir.clone())),
        }
    }
}

impl FetcherProvider for CatalogFetchers {
    fn fetcher(&self, distribution: Distribution) -> Arc<dyn ArtifactFetcher> {
        match distribution {
            #[cfg(feature = "catalog")]
            Distribution::Vanilla => self.vanilla.clone(),
            #[cfg(feature = "catalog")]
            Distribution::Paper => self.paper.clone(),
            #[cfg(feature = "catalog")]
            Distribution::Fabric => self.fabric.clone(),
            Distribution::Custom => self.custom.clone(),
            #[cfg(not(feature = "catalog"))]
            other => Arc::new(Unavailable(other)),
        }
    }
}

#[cfg(not(feature = "catalog"))]
struct Unavailable(Distribution);

#[cfg(not(feature = "catalog"))]
#[async_trait]
impl ArtifactFetcher for Unavailable {
    fn distribution(&self) -> Distribution {
        self.0
    }

    async fn fetch(&self, _version: &str, _dest_dir: &Path) -> Result<PathBuf, FetchError> {
        Err(FetchError::DownloadFailed(format!(
            "{} catalog support is not compiled in",
            self.0
        )))
    }
}

#[cfg(feature = "catalog")]
fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("craftvisor/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(15 * 60))
        .build()
        .unwrap_or_default()
}

#[cfg(feature = "catalog")]
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, FetchError> {
    let value = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<T>()
        .await?;
    Ok(value)
}

/// Streams `url` into `dest_dir/file_name` through a temp file.
#[cfg(feature = "catalog")]
pub(crate) async fn download(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    file_name: &str,
) -> Result<PathBuf, FetchError> {
    use tokio::io::AsyncWriteExt;

    tracing::info!(url, file = file_name, "downloading artifact");

    let mut resp = client.get(url).send().await?.error_for_status()?;

    tokio::fs::create_dir_all(dest_dir).await?;
    let dest = dest_dir.join(file_name);
    let tmp = dest.with_extension("part");

    let written: Result<(), FetchError> = async {
        let mut out = tokio::fs::File::create(&tmp).await?;
        while let Some(chunk) = resp.chunk().await? {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok(())
    }
    .await;

    if let Err(err) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }

    tokio::fs::rename(&tmp, &dest).await?;
    Ok(dest)
}
