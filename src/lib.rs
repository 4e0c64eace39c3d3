//! Supervision of game-server processes: artifact download, launch, console
//! relay, lifecycle state and a per-name registry of instances.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod instance;
pub mod logging;
pub mod parser;
pub mod properties;
pub mod server;
pub mod utils;

pub use config::{Distribution, SupervisorConfig};
pub use error::{FetchError, PropertiesError, RegistryError, ServerError};
pub use instance::{CreateParams, InstanceState, InstanceStatus, Metrics};
pub use server::{Instance, InstanceRegistry};
