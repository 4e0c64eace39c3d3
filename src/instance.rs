mod handle;
mod metrics;
mod relay;
mod subscription;
mod types;

pub use handle::InstanceHandle;
pub use metrics::{ProcessUsage, sample_usage};
pub use relay::{LogBuffer, META_DIR, META_FILE};
pub use subscription::{OutputSink, OutputSubscription, SinkSubscription};
pub use types::{CreateParams, InstanceMeta, InstanceState, InstanceStatus, Metrics};
