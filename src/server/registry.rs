use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    sync::{Mutex, OnceCell},
    task::JoinSet,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::SupervisorConfig,
    error::{RegistryError, ServerError},
    fetcher::{CatalogFetchers, FetcherProvider},
    instance::{CreateParams, META_DIR, META_FILE, Metrics},
};

use super::Instance;

type Slot = Arc<OnceCell<Arc<Instance>>>;

#[derive(Debug, Clone)]
struct CachedMetrics {
    taken_at: Instant,
    generation: u64,
    metrics: Metrics,
}

/// Name -> instance map over one data root.
///
/// Each name owns a once-cell, so concurrent first accesses build the
/// instance exactly once and every caller gets the same `Arc`.
pub struct InstanceRegistry {
    root: PathBuf,
    config: Arc<SupervisorConfig>,
    fetchers: Arc<dyn FetcherProvider>,
    slots: Mutex<HashMap<String, Slot>>,
    metrics_cache: Mutex<HashMap<String, CachedMetrics>>,
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl InstanceRegistry {
    pub async fn open(
        config: SupervisorConfig,
        fetchers: Arc<dyn FetcherProvider>,
    ) -> Result<Self, RegistryError> {
        tokio::fs::create_dir_all(&config.data_root).await?;
        let root = tokio::fs::canonicalize(&config.data_root).await?;
        info!(root = %root.display(), "instance registry opened");

        Ok(Self {
            root,
            config: Arc::new(config),
            fetchers,
            slots: Mutex::new(HashMap::new()),
            metrics_cache: Mutex::new(HashMap::new()),
        })
    }

    /// `open` with the built-in catalog fetchers.
    pub async fn with_catalogs(config: SupervisorConfig) -> Result<Self, RegistryError> {
        let fetchers = Arc::new(CatalogFetchers::new(&config));
        Self::open(config, fetchers).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Names of every instance directory carrying metadata.
    pub async fn list(&self) -> Result<BTreeSet<String>, RegistryError> {
        let mut names = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if tokio::fs::try_exists(self.meta_path(&name)).await? {
                names.insert(name);
            }
        }

        Ok(names)
    }

    pub async fn get_or_create(
        &self,
        name: &str,
        params: CreateParams,
    ) -> Result<Arc<Instance>, RegistryError> {
        validate_name(name)?;
        params.validate()?;

        let slot = self.slot(name).await;
        let instance = slot
            .get_or_try_init(|| self.create_or_load(name, &params))
            .await?
            .clone();

        if !params.matches(&instance.meta().await) {
            return Err(RegistryError::NameConflict(name.to_string()));
        }
        Ok(instance)
    }

    /// Existing instances only.
    pub async fn get(&self, name: &str) -> Result<Arc<Instance>, RegistryError> {
        validate_name(name)?;

        let slot = self.slot(name).await;
        let instance = slot
            .get_or_try_init(|| async {
                if !tokio::fs::try_exists(self.meta_path(name)).await? {
                    return Err(RegistryError::NotFound(name.to_string()));
                }
                let instance = Instance::load(&self.root.join(name), self.config.clone()).await?;
                Ok(Arc::new(instance))
            })
            .await?;
        Ok(instance.clone())
    }

    /// Stops the instance, then removes its directory and forgets it.
    ///
    /// Refused while a server this supervisor cannot stop still answers.
    pub async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let instance = self.get(name).await?;

        match instance.stop().await {
            Ok(()) => {}
            Err(ServerError::NotRunning) if !instance.is_running().await => {}
            Err(err) => return Err(err.into()),
        }
        if instance.is_running().await {
            return Err(ServerError::AlreadyRunning.into());
        }

        instance.handle().close_monitors();
        tokio::fs::remove_dir_all(instance.dir()).await?;

        self.slots.lock().await.remove(name);
        self.metrics_cache.lock().await.remove(name);
        info!(instance = name, "instance deleted");
        Ok(())
    }

    /// Cached for `metrics_ttl`, and only while the instance state is unchanged.
    pub async fn metrics(&self, name: &str) -> Result<Metrics, RegistryError> {
        let instance = self.get(name).await?;
        let generation = instance.handle().generation();

        {
            let cache = self.metrics_cache.lock().await;
            if let Some(cached) = cache.get(name)
                && cached.generation == generation
                && cached.taken_at.elapsed() < self.config.metrics_ttl
            {
                return Ok(cached.metrics.clone());
            }
        }

        let metrics = instance.metrics().await;
        debug!(instance = name, generation, "metrics sampled");

        self.metrics_cache.lock().await.insert(
            name.to_string(),
            CachedMetrics {
                taken_at: Instant::now(),
                generation,
                metrics: metrics.clone(),
            },
        );
        Ok(metrics)
    }

    /// Stops every loaded instance concurrently and ends their sink subscriptions.
    pub async fn shutdown(&self) {
        let loaded: Vec<Arc<Instance>> = {
            let slots = self.slots.lock().await;
            slots.values().filter_map(|slot| slot.get().cloned()).collect()
        };

        info!(count = loaded.len(), "shutting down instances");

        let mut tasks = JoinSet::new();
        for instance in loaded {
            tasks.spawn(async move {
                if let Err(err) = instance.stop().await {
                    warn!(instance = %instance.name(), error = %err, "instance did not stop cleanly");
                }
                instance.handle().close_monitors();
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "shutdown task failed");
            }
        }
    }

    async fn slot(&self, name: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(META_DIR).join(META_FILE)
    }

    async fn create_or_load(
        &self,
        name: &str,
        params: &CreateParams,
    ) -> Result<Arc<Instance>, RegistryError> {
        let dir = self.root.join(name);

        if tokio::fs::try_exists(self.meta_path(name)).await? {
            return Ok(Arc::new(Instance::load(&dir, self.config.clone()).await?));
        }
        if tokio::fs::try_exists(&dir).await? {
            // a directory this registry did not create
            return Err(RegistryError::NameConflict(name.to_string()));
        }

        let fetcher = self.fetchers.fetcher(params.distribution);
        let instance = Instance::create(&self.root, name, params, fetcher, self.config.clone()).await?;
        Ok(Arc::new(instance))
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.starts_with('.');

    if invalid {
        return Err(RegistryError::InvalidParams(format!(
            "invalid instance name {name:?}"
        )));
    }
    Ok(())
}
