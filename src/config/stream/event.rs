use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::instance::InstanceState;

use super::line::LogLine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    StateChange {
        old: InstanceState,
        new: InstanceState,
    },

    Line {
        line: LogLine,
    },
}

/// Everything an instance publishes on its broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEvent {
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub payload: EventPayload,
}

impl InstanceEvent {
    pub fn line(line: LogLine) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: line.timestamp,
            payload: EventPayload::Line { line },
        }
    }

    pub fn state_change(old: InstanceState, new: InstanceState) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload: EventPayload::StateChange { old, new },
        }
    }
}

impl Display for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::Line { line } => {
                write!(f, "[{}] {}: {}", self.timestamp, line.kind, line)
            }
            EventPayload::StateChange { old, new } => {
                write!(f, "[{}] state changed: {} -> {}", self.timestamp, old, new)
            }
        }
    }
}
