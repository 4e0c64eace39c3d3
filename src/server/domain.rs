use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::{fs::File, io::AsyncWriteExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    config::{SupervisorConfig, stream::InstanceEvent},
    error::{PropertiesError, RegistryError, ServerError},
    fetcher::ArtifactFetcher,
    instance::{
        CreateParams, InstanceHandle, InstanceMeta, InstanceStatus, META_DIR, META_FILE, Metrics,
        OutputSink, OutputSubscription, SinkSubscription,
    },
    properties::{PROPERTIES_FILE, PropertiesStore},
};

pub const EULA_FILE: &str = "eula.txt";

/// One managed server: its directory, metadata and process handle.
#[derive(Debug)]
pub struct Instance {
    handle: InstanceHandle,
}

impl Instance {
    /// Lays out a fresh instance directory under `root`.
    ///
    /// The directory is removed again if any step fails.
    pub(crate) async fn create(
        root: &Path,
        name: &str,
        params: &CreateParams,
        fetcher: Arc<dyn ArtifactFetcher>,
        config: Arc<SupervisorConfig>,
    ) -> Result<Self, RegistryError> {
        let server_root = root.join(name);
        tokio::fs::create_dir(&server_root)
            .await
            .map_err(|err| RegistryError::FileIO(format!("{}: {err}", server_root.display())))?;

        match Self::populate(&server_root, name, params, fetcher, config).await {
            Ok(instance) => {
                info!(instance = name, distribution = %params.distribution, version = %params.version, "instance created");
                Ok(instance)
            }
            Err(err) => {
                warn!(instance = name, error = %err, "instance creation failed; removing directory");
                if let Err(rm_err) = tokio::fs::remove_dir_all(&server_root).await {
                    warn!(instance = name, error = %rm_err, "failed to remove partial instance directory");
                }
                Err(err)
            }
        }
    }

    async fn populate(
        server_root: &Path,
        name: &str,
        params: &CreateParams,
        fetcher: Arc<dyn ArtifactFetcher>,
        config: Arc<SupervisorConfig>,
    ) -> Result<Self, RegistryError> {
        tokio::fs::create_dir(server_root.join(META_DIR)).await?;

        let artifact = fetcher.fetch(&params.version, server_root).await?;

        PropertiesStore::with_defaults(
            server_root.join(PROPERTIES_FILE),
            params.port,
            params.player_limit,
        )
        .save()
        .await?;

        let meta = InstanceMeta::new(name, params, artifact);
        let handle = InstanceHandle::new(meta, server_root.to_path_buf(), config);
        handle.persist().await?;

        Ok(Self { handle })
    }

    /// Reads the metadata in `dir` and reconciles it with the liveness probe.
    pub(crate) async fn load(dir: &Path, config: Arc<SupervisorConfig>) -> Result<Self, RegistryError> {
        let meta_path = dir.join(META_DIR).join(META_FILE);

        let data = tokio::fs::read(&meta_path)
            .await
            .map_err(|err| RegistryError::Metadata(format!("{}: {err}", meta_path.display())))?;
        let mut meta: InstanceMeta = serde_json::from_slice(&data)
            .map_err(|err| RegistryError::Metadata(format!("{}: {err}", meta_path.display())))?;

        if let Some(dir_name) = dir.file_name().and_then(|n| n.to_str())
            && dir_name != meta.name
        {
            warn!(instance = dir_name, recorded = %meta.name, "metadata name differs from directory; using directory name");
            meta.name = dir_name.to_string();
        }

        let handle = InstanceHandle::new(meta, dir.to_path_buf(), config);
        handle.reconcile().await;

        Ok(Self { handle })
    }

    pub fn handle(&self) -> &InstanceHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn dir(&self) -> &Path {
        self.handle.dir()
    }

    pub fn properties_path(&self) -> PathBuf {
        self.dir().join(PROPERTIES_FILE)
    }

    pub async fn meta(&self) -> InstanceMeta {
        self.handle.meta().await
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        self.handle.start().await
    }

    pub async fn stop(&self) -> Result<(), ServerError> {
        self.handle.stop().await
    }

    pub async fn kill(&self) -> Result<(), ServerError> {
        self.handle.kill().await
    }

    pub async fn restart(&self) -> Result<(), ServerError> {
        self.handle.restart().await
    }

    pub async fn send_command<S: Into<String>>(&self, cmd: S) {
        self.handle.send_command(cmd).await
    }

    pub async fn wait_until_online(&self, limit: Duration) -> Result<(), ServerError> {
        self.handle.wait_until_online(limit).await
    }

    pub async fn status(&self) -> InstanceStatus {
        self.handle.status().await
    }

    /// Collaborators touching the instance directory defer while this holds.
    pub async fn is_running(&self) -> bool {
        self.handle.is_running().await
    }

    pub async fn players(&self) -> Result<BTreeSet<String>, ServerError> {
        self.handle.players().await
    }

    pub async fn metrics(&self) -> Metrics {
        self.handle.metrics().await
    }

    pub async fn subscribe_output(&self) -> OutputSubscription {
        self.handle.subscribe_output().await
    }

    pub async fn subscribe_sink<S: OutputSink>(&self, sink: S) -> SinkSubscription {
        self.handle.subscribe_sink(sink).await
    }

    pub fn subscribe_events(&self) -> BroadcastStream<InstanceEvent> {
        self.handle.subscribe_events()
    }

    /// Loads `server.properties` fresh from disk.
    pub async fn properties(&self) -> Result<PropertiesStore, PropertiesError> {
        PropertiesStore::load(self.properties_path()).await
    }

    pub async fn accept_eula(&self) -> Result<(), ServerError> {
        let eula_path = self.dir().join(EULA_FILE);
        let io_err = |err: std::io::Error| ServerError::FileIO(format!("{}: {err}", eula_path.display()));

        let mut out = File::create(&eula_path).await.map_err(io_err)?;
        out.write_all(b"#Generated by craftvisor\neula=true\n")
            .await
            .map_err(io_err)?;
        out.flush().await.map_err(io_err)?;

        info!(instance = %self.name(), "eula accepted");
        Ok(())
    }

    pub async fn eula_accepted(&self) -> bool {
        match PropertiesStore::load(self.dir().join(EULA_FILE)).await {
            Ok(eula) => eula
                .get("eula")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{config::Distribution, error::FetchError, instance::InstanceState};

    struct StaticJar;

    #[async_trait]
    impl ArtifactFetcher for StaticJar {
        fn distribution(&self) -> Distribution {
            Distribution::Vanilla
        }

        async fn fetch(&self, version: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
            let dest = dest_dir.join(format!("vanilla-{version}.jar"));
            tokio::fs::write(&dest, b"jar").await?;
            Ok(dest)
        }
    }

    struct Missing;

    #[async_trait]
    impl ArtifactFetcher for Missing {
        fn distribution(&self) -> Distribution {
            Distribution::Vanilla
        }

        async fn fetch(&self, version: &str, _dest_dir: &Path) -> Result<PathBuf, FetchError> {
            Err(FetchError::ArtifactNotFound {
                distribution: Distribution::Vanilla,
                version: version.to_string(),
            })
        }
    }

    fn config() -> Arc<SupervisorConfig> {
        Arc::new(SupervisorConfig {
            probe_timeout: Duration::from_millis(200),
            ..SupervisorConfig::default()
        })
    }

    #[tokio::test]
    async fn create_lays_out_directory() {
        let root = tempfile::tempdir().unwrap();
        // port 1 is privileged and never listened on in test environments
        let params = CreateParams::new(Distribution::Vanilla, "1.21.1")
            .memory(1024, 2048)
            .port(1)
            .player_limit(20);

        let instance = Instance::create(root.path(), "alpha", &params, Arc::new(StaticJar), config())
            .await
            .unwrap();

        let dir = root.path().join("alpha");
        assert!(dir.join(META_DIR).join(META_FILE).is_file());
        assert!(dir.join("vanilla-1.21.1.jar").is_file());

        let props = instance.properties().await.unwrap();
        assert_eq!(props.get_as::<u16>("server_port"), Some(1));
        assert_eq!(props.get_as::<u32>("max_players"), Some(20));

        let loaded = Instance::load(&dir, config()).await.unwrap();
        let meta = loaded.meta().await;
        assert_eq!(meta.state, InstanceState::Offline);
        assert_eq!(meta.max_memory_mb, 2048);
        assert_eq!(meta.artifact_path, dir.join("vanilla-1.21.1.jar"));
    }

    #[tokio::test]
    async fn failed_fetch_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let params = CreateParams::new(Distribution::Vanilla, "0.0.0");

        let err = Instance::create(root.path(), "ghost", &params, Arc::new(Missing), config())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::Fetch(FetchError::ArtifactNotFound { .. })
        ));
        assert!(!root.path().join("ghost").exists());
    }

    #[tokio::test]
    async fn eula_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let params = CreateParams::new(Distribution::Vanilla, "1.21.1").port(1);
        let instance = Instance::create(root.path(), "eula", &params, Arc::new(StaticJar), config())
            .await
            .unwrap();

        assert!(!instance.eula_accepted().await);
        instance.accept_eula().await.unwrap();
        assert!(instance.eula_accepted().await);
    }

    #[tokio::test]
    async fn eula_write_failure_names_the_file() {
        let root = tempfile::tempdir().unwrap();
        let params = CreateParams::new(Distribution::Vanilla, "1.21.1").port(1);
        let instance = Instance::create(root.path(), "gone", &params, Arc::new(StaticJar), config())
            .await
            .unwrap();
        tokio::fs::remove_dir_all(instance.dir()).await.unwrap();

        match instance.accept_eula().await {
            Err(ServerError::FileIO(msg)) => assert!(msg.contains(EULA_FILE), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!instance.eula_accepted().await);
    }
}
