use thiserror::Error;

use crate::config::Distribution;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Artifact not found: {distribution} {version}")]
    ArtifactNotFound {
        distribution: Distribution,
        version: String,
    },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Failed to write artifact: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Error)]
pub enum PropertiesError {
    #[error("Failed to access properties file {path}: {reason}")]
    Io { path: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Server crashed early")]
    EarlyCrash,

    #[error("Timed out waiting for the server")]
    Timeout,

    #[error("Failed to spawn server process: {0}")]
    ProcessSpawnFailed(String),

    #[error("Failed to access child stdout pipe")]
    NoStdoutPipe,

    #[error("Failed to access child stdin pipe")]
    NoStdinPipe,

    #[error("Failed to access child stderr pipe")]
    NoStderrPipe,

    #[error("File IO failed: {0}")]
    FileIO(String),
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Instance {0} already exists with different parameters")]
    NameConflict(String),

    #[error("Invalid instance parameters: {0}")]
    InvalidParams(String),

    #[error("Instance {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Properties(#[from] PropertiesError),

    #[error("Unreadable instance metadata: {0}")]
    Metadata(String),

    #[error("File IO failed: {0}")]
    FileIO(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::FileIO(err.to_string())
    }
}

#[cfg(feature = "catalog")]
impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::DownloadFailed(err.to_string())
    }
}
