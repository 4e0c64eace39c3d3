#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use craftvisor::{
    Distribution, FetchError, InstanceRegistry, SupervisorConfig,
    fetcher::{ArtifactFetcher, FetcherProvider},
    instance::InstanceHandle,
};

/// Console loop of the fake server: `ready` prints the sentinel, `list`
/// answers with two players, `stop` exits cleanly.
pub const CONSOLE_LOOP: &str = r#"
while IFS= read -r line; do
  case "$line" in
    ready) echo "[12:00:01] [Server thread/INFO]: Done (1.234s)! For help, type \"help\"" ;;
    list) echo "[12:00:02] [Server thread/INFO]: There are 2 of a max of 20 players online: Alex, Steve" ;;
    stop) echo "[12:00:03] [Server thread/INFO]: Stopping server"; exit 0 ;;
    crash) echo "[12:00:03] [Server thread/ERROR]: boom" >&2; exit 3 ;;
    *) echo "[12:00:02] [Server thread/INFO]: Unknown command: $line" ;;
  esac
done
"#;

/// Writes an executable `sh` script standing in for `java`.
#[cfg(unix)]
pub fn fake_java(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-java.sh");
    let script = format!(
        "#!/bin/sh\necho \"[12:00:00] [Server thread/INFO]: Starting minecraft server with $*\"\n{body}\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn test_config(data_root: &Path, java: PathBuf) -> SupervisorConfig {
    SupervisorConfig {
        data_root: data_root.to_path_buf(),
        java_path: java,
        stop_timeout: Duration::from_secs(5),
        kill_grace: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(200),
        sample_window: Duration::from_millis(20),
        ..SupervisorConfig::default()
    }
}

/// Writes a placeholder jar and counts how often it was asked to.
#[derive(Default)]
pub struct FakeJar {
    pub fetches: AtomicUsize,
    pub fail_first: bool,
    pub delay: Duration,
}

#[async_trait]
impl ArtifactFetcher for FakeJar {
    fn distribution(&self) -> Distribution {
        Distribution::Vanilla
    }

    async fn fetch(&self, version: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let attempt = self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if self.fail_first && attempt == 0 {
            return Err(FetchError::DownloadFailed("connection reset".to_string()));
        }

        let dest = dest_dir.join(format!("vanilla-{version}.jar"));
        tokio::fs::write(&dest, b"not really a jar").await?;
        Ok(dest)
    }
}

pub struct FakeCatalog(pub Arc<FakeJar>);

impl FetcherProvider for FakeCatalog {
    fn fetcher(&self, _distribution: Distribution) -> Arc<dyn ArtifactFetcher> {
        self.0.clone()
    }
}

pub async fn open_registry(config: SupervisorConfig, jar: Arc<FakeJar>) -> InstanceRegistry {
    InstanceRegistry::open(config, Arc::new(FakeCatalog(jar)))
        .await
        .unwrap()
}

/// Polls the log buffer until a line containing `needle` shows up.
pub async fn wait_for_line(handle: &InstanceHandle, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if handle.logs().await.iter().any(|l| l.text.contains(needle)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no line containing {needle:?}"));
}
