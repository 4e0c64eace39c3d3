use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub mod stream;

/// Server software flavour. Selects the artifact fetcher once, at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Vanilla,
    Paper,
    Fabric,
    Custom,
}

impl Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Distribution::Vanilla => "vanilla",
            Distribution::Paper => "paper",
            Distribution::Fabric => "fabric",
            Distribution::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Distribution {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vanilla" => Ok(Distribution::Vanilla),
            "paper" => Ok(Distribution::Paper),
            "fabric" => Ok(Distribution::Fabric),
            "custom" => Ok(Distribution::Custom),
            other => Err(RegistryError::InvalidParams(format!(
                "unknown distribution: {other}"
            ))),
        }
    }
}

pub const DEFAULT_READY_SENTINEL: &str = "Done (";
pub const DEFAULT_LOG_MAX_LINES: usize = 1000;
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

pub const VANILLA_MANIFEST_URL: &str =
    "https://launchermeta.mojang.com/mc/game/version_manifest.json";
pub const PAPER_API_URL: &str = "https://api.papermc.io/v2/projects/paper";
pub const FABRIC_META_URL: &str = "https://meta.fabricmc.net/v2/versions";

/// Knobs for the supervisor, registry and fetchers.
///
/// `Default` gives production values; `from_env` layers `CRAFTVISOR_*`
/// overrides on top of them.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory holding one subdirectory per instance.
    pub data_root: PathBuf,
    /// JVM launcher invoked for every start.
    pub java_path: PathBuf,
    /// Substring that marks the Starting -> Online transition.
    pub ready_sentinel: String,
    /// Lines retained in each instance's log buffer.
    pub log_max_lines: usize,
    /// Per-subscriber queue depth before the oldest lines are dropped.
    pub subscriber_queue: usize,
    pub stop_timeout: Duration,
    /// Extra wait after a forced kill before state is force-finalized.
    pub kill_grace: Duration,
    pub probe_timeout: Duration,
    pub metrics_ttl: Duration,
    /// CPU delta window used by metrics sampling.
    pub sample_window: Duration,
    pub sample_timeout: Duration,
    pub player_query_timeout: Duration,
    /// Local catalog for the `custom` distribution.
    pub custom_artifacts_dir: PathBuf,
    pub vanilla_manifest_url: String,
    pub paper_api_url: String,
    pub fabric_meta_url: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("servers"),
            java_path: PathBuf::from("java"),
            ready_sentinel: DEFAULT_READY_SENTINEL.to_string(),
            log_max_lines: DEFAULT_LOG_MAX_LINES,
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
            stop_timeout: Duration::from_secs(60),
            kill_grace: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(1),
            metrics_ttl: Duration::from_secs(5),
            sample_window: Duration::from_millis(100),
            sample_timeout: Duration::from_secs(2),
            player_query_timeout: Duration::from_secs(2),
            custom_artifacts_dir: PathBuf::from("versions"),
            vanilla_manifest_url: VANILLA_MANIFEST_URL.to_string(),
            paper_api_url: PAPER_API_URL.to_string(),
            fabric_meta_url: FABRIC_META_URL.to_string(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse::<u64>().ok())
}

fn env_millis(name: &str, min: u64, max: u64) -> Option<Duration> {
    env_u64(name).map(|v| Duration::from_millis(v.clamp(min, max)))
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_string("CRAFTVISOR_DATA_ROOT") {
            cfg.data_root = PathBuf::from(v);
        }
        if let Some(v) = env_string("CRAFTVISOR_JAVA") {
            cfg.java_path = PathBuf::from(v);
        }
        if let Some(v) = env_string("CRAFTVISOR_READY_SENTINEL") {
            cfg.ready_sentinel = v;
        }
        if let Some(v) = env_u64("CRAFTVISOR_LOG_MAX_LINES") {
            cfg.log_max_lines = (v as usize).clamp(100, 50_000);
        }
        if let Some(v) = env_u64("CRAFTVISOR_SUBSCRIBER_QUEUE") {
            cfg.subscriber_queue = (v as usize).clamp(16, 65_536);
        }
        if let Some(v) = env_millis("CRAFTVISOR_STOP_TIMEOUT_MS", 1000, 30 * 60 * 1000) {
            cfg.stop_timeout = v;
        }
        if let Some(v) = env_millis("CRAFTVISOR_KILL_GRACE_MS", 100, 60_000) {
            cfg.kill_grace = v;
        }
        if let Some(v) = env_millis("CRAFTVISOR_PROBE_TIMEOUT_MS", 50, 30_000) {
            cfg.probe_timeout = v;
        }
        if let Some(v) = env_millis("CRAFTVISOR_METRICS_TTL_MS", 0, 60_000) {
            cfg.metrics_ttl = v;
        }
        if let Some(v) = env_string("CRAFTVISOR_CUSTOM_ARTIFACTS") {
            cfg.custom_artifacts_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("CRAFTVISOR_VANILLA_MANIFEST_URL") {
            cfg.vanilla_manifest_url = v;
        }
        if let Some(v) = env_string("CRAFTVISOR_PAPER_API_URL") {
            cfg.paper_api_url = v;
        }
        if let Some(v) = env_string("CRAFTVISOR_FABRIC_META_URL") {
            cfg.fabric_meta_url = v;
        }

        cfg
    }
}
