use std::{
    fmt::{self, Display},
    path::PathBuf,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::Distribution, error::RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Offline,
    Starting,
    Online,
    Stopping,
}

impl InstanceState {
    /// Starting or Online: a process is (or should be) running.
    pub fn is_live(self) -> bool {
        matches!(self, InstanceState::Starting | InstanceState::Online)
    }
}

impl Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Offline => "offline",
            InstanceState::Starting => "starting",
            InstanceState::Online => "online",
            InstanceState::Stopping => "stopping",
        };
        write!(f, "{}", s)
    }
}

/// On-disk record of one instance (`.craftvisor/instance.json`).
///
/// New fields must carry `#[serde(default)]`; unknown fields are ignored so
/// older and newer builds can read each other's files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMeta {
    pub name: String,
    pub distribution: Distribution,
    pub version: String,
    pub state: InstanceState,
    #[serde(rename = "minMemoryMB")]
    pub min_memory_mb: u32,
    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: u32,
    pub port: u16,
    pub player_limit: u32,
    pub artifact_path: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl InstanceMeta {
    pub fn new(name: &str, params: &CreateParams, artifact_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            distribution: params.distribution,
            version: params.version.clone(),
            state: InstanceState::Offline,
            min_memory_mb: params.min_memory_mb,
            max_memory_mb: params.max_memory_mb,
            port: params.port,
            player_limit: params.player_limit,
            artifact_path,
            started_at: None,
            created_at: Utc::now(),
            logs: Vec::new(),
        }
    }
}

/// Parameters of `InstanceRegistry::get_or_create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    pub distribution: Distribution,
    pub version: String,
    pub min_memory_mb: u32,
    pub max_memory_mb: u32,
    pub port: u16,
    pub player_limit: u32,
}

impl CreateParams {
    pub fn new<S: Into<String>>(distribution: Distribution, version: S) -> Self {
        Self {
            distribution,
            version: version.into(),
            min_memory_mb: 1024,
            max_memory_mb: 1024,
            port: 25565,
            player_limit: 20,
        }
    }

    pub fn memory(mut self, min_mb: u32, max_mb: u32) -> Self {
        self.min_memory_mb = min_mb;
        self.max_memory_mb = max_mb;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn player_limit(mut self, limit: u32) -> Self {
        self.player_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.version.trim().is_empty() {
            return Err(RegistryError::InvalidParams("version is empty".to_string()));
        }
        if self.min_memory_mb == 0 || self.max_memory_mb == 0 {
            return Err(RegistryError::InvalidParams(
                "memory limits must be positive".to_string(),
            ));
        }
        if self.min_memory_mb > self.max_memory_mb {
            return Err(RegistryError::InvalidParams(format!(
                "min memory {}M exceeds max memory {}M",
                self.min_memory_mb, self.max_memory_mb
            )));
        }
        if self.port == 0 {
            return Err(RegistryError::InvalidParams("port must be 1-65535".to_string()));
        }
        if self.player_limit == 0 {
            return Err(RegistryError::InvalidParams(
                "player limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Same distribution and version as an existing record.
    pub fn matches(&self, meta: &InstanceMeta) -> bool {
        self.distribution == meta.distribution && self.version == meta.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub state: InstanceState,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime: Duration,
}

/// Best-effort telemetry; every field is zero when unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub player_count: usize,
    pub uptime: Duration,
}
