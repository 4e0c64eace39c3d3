mod domain;
mod registry;

pub use domain::{EULA_FILE, Instance};
pub use registry::InstanceRegistry;
