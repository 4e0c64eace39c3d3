use std::error::Error;

use craftvisor::{InstanceRegistry, SupervisorConfig, logging};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init_tracing();

    let config = SupervisorConfig::from_env();
    let registry = InstanceRegistry::with_catalogs(config).await?;

    for name in registry.list().await? {
        match registry.get(&name).await {
            Ok(instance) => {
                let status = instance.status().await;
                info!(instance = %name, state = %status.state, uptime_s = status.uptime.as_secs(), "instance loaded");
            }
            Err(err) => warn!(instance = %name, error = %err, "failed to load instance"),
        }
    }

    info!(root = %registry.root().display(), "supervisor running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    registry.shutdown().await;
    info!("supervisor stopped");
    Ok(())
}
