mod event;
mod line;
mod log;

pub use event::{EventPayload, InstanceEvent};
pub use line::{LineKind, LogLine, StreamSource, extract_timestamp};
pub use log::{LogLevel, LogMeta};
