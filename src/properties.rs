//! `server.properties` access.
//!
//! Entries are held by their on-disk key so that keys this crate knows
//! nothing about survive a load/save cycle untouched. Callers address keys in
//! canonical form (`max_players`, `rcon_password`); the store translates to
//! the on-disk spelling (`max-players`, `rcon.password`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::PropertiesError;

pub const PROPERTIES_FILE: &str = "server.properties";

/// Canonical keys whose on-disk form is dot separated.
const DOTTED_KEYS: &[(&str, &str)] = &[
    ("query_port", "query.port"),
    ("rcon_port", "rcon.port"),
    ("rcon_password", "rcon.password"),
];

pub fn to_disk_key(key: &str) -> String {
    if let Some((_, disk)) = DOTTED_KEYS.iter().find(|(canonical, _)| *canonical == key) {
        return disk.to_string();
    }
    key.replace('_', "-")
}

pub fn to_canonical_key(key: &str) -> String {
    key.replace(['-', '.'], "_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertiesStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl PropertiesStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Defaults written when an instance is created.
    pub fn with_defaults<P: Into<PathBuf>>(path: P, port: u16, player_limit: u32) -> Self {
        let mut store = Self::new(path);
        store.set("motd", "A Minecraft Server");
        store.set("level_name", "world");
        store.set("gamemode", "survival");
        store.set("difficulty", "easy");
        store.set("pvp", true);
        store.set("online_mode", true);
        store.set("white_list", false);
        store.set("spawn_protection", 16);
        store.set("view_distance", 10);
        store.set("simulation_distance", 10);
        store.set("server_port", port);
        store.set("max_players", player_limit);
        store.set("enable_query", false);
        store.set("query_port", port);
        store.set("enable_rcon", false);
        store.set("rcon_port", 25575);
        store
    }

    /// Reads `path`. A missing file yields an empty store.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, PropertiesError> {
        let path = path.as_ref();
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "properties file does not exist");
                return Ok(Self::new(path));
            }
            Err(err) => {
                return Err(PropertiesError::Io {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                });
            }
        };

        Ok(Self::parse(path, &text))
    }

    pub fn parse<P: Into<PathBuf>>(path: P, text: &str) -> Self {
        let mut store = Self::new(path);

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match trimmed.split_once('=') {
                Some((key, value)) => {
                    store
                        .entries
                        .insert(key.trim().to_string(), value.to_string());
                }
                None => {
                    warn!(path = %store.path.display(), line = trimmed, "skipping malformed properties line");
                }
            }
        }

        store
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#Minecraft server properties\n#Generated by craftvisor\n");
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub async fn save(&self) -> Result<(), PropertiesError> {
        self.save_to(&self.path).await
    }

    pub async fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), PropertiesError> {
        let path = path.as_ref();
        let io_err = |err: std::io::Error| PropertiesError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        };

        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        file.write_all(self.render().as_bytes())
            .await
            .map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&to_disk_key(key))
            .or_else(|| self.entries.get(key))
            .map(String::as_str)
    }

    /// Parses the value of `key`; `None` when absent or unparsable.
    pub fn get_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse::<T>().ok())
    }

    pub fn set<V: ToString>(&mut self, key: &str, value: V) {
        let disk = if self.entries.contains_key(key) {
            key.to_string()
        } else {
            to_disk_key(key)
        };
        self.entries.insert(disk, value.to_string());
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.entries
            .remove(&to_disk_key(key))
            .or_else(|| self.entries.remove(key))
    }

    /// On-disk keys and values, sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
