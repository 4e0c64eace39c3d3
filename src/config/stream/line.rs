use std::{
    fmt::{self, Display},
    sync::LazyLock,
};

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::log::LogMeta;

/// Identifies which process stream produced a line of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Stdout,
    Stderr,
    /// Lines written by the supervisor itself (launch command, crash notes).
    Supervisor,
}

/// Console classification used by viewers to colour a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Error,
    Warning,
    Success,
    Info,
    Debug,
    Eula,
    Critical,
    Startup,
    Shutdown,
    Default,
}

impl Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineKind::Error => "error",
            LineKind::Warning => "warning",
            LineKind::Success => "success",
            LineKind::Info => "info",
            LineKind::Debug => "debug",
            LineKind::Eula => "eula",
            LineKind::Critical => "critical",
            LineKind::Startup => "startup",
            LineKind::Shutdown => "shutdown",
            LineKind::Default => "default",
        };
        write!(f, "{}", s)
    }
}

/// A single classified line of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub text: String,
    pub kind: LineKind,
    pub source: StreamSource,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new<S: Into<String>>(line: S, source: StreamSource) -> Self {
        let mut text: String = line.into();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        let kind = crate::parser::classify(&text);
        let timestamp = extract_timestamp(&text).unwrap_or_else(Utc::now);
        Self {
            text,
            kind,
            source,
            timestamp,
        }
    }

    pub fn stdout<S: Into<String>>(line: S) -> Self {
        Self::new(line, StreamSource::Stdout)
    }

    pub fn stderr<S: Into<String>>(line: S) -> Self {
        Self::new(line, StreamSource::Stderr)
    }

    pub fn supervisor<S: Into<String>>(line: S) -> Self {
        Self::new(line, StreamSource::Supervisor)
    }

    /// Message body with the `[time] [thread/LEVEL]: ` header removed, when present.
    pub fn message(&self) -> String {
        match LogMeta::new(self.text.as_str()) {
            Some(meta) => meta.msg,
            None => self.text.clone(),
        }
    }
}

impl Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

static LEADING_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d{2}:\d{2}:\d{2})").expect("time pattern is valid"));

/// Reads a leading `[HH:MM:SS]` stamp as today's local time.
pub fn extract_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let time_s = LEADING_TIME.captures(input)?.get(1)?.as_str().to_string();
    let time = NaiveTime::parse_from_str(&time_s, "%H:%M:%S").ok()?;

    let today = Local::now().date_naive();
    let naive_dt = today.and_time(time);
    let local_dt = Local.from_local_datetime(&naive_dt).earliest()?;

    Some(local_dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    #[test]
    fn strips_trailing_newlines() {
        let line = LogLine::stdout("hello\r\n");
        assert_eq!(line.text, "hello");
        assert_eq!(line.source, StreamSource::Stdout);
    }

    #[test]
    fn message_drops_vanilla_header() {
        let line = LogLine::stdout("[10:11:12] [Server thread/INFO]: Preparing spawn area");
        assert_eq!(line.message(), "Preparing spawn area");

        let bare = LogLine::stdout("no header here");
        assert_eq!(bare.message(), "no header here");
    }

    #[test]
    fn timestamp_comes_from_the_line_when_present() {
        let ts = extract_timestamp("[10:11:12] [Server thread/INFO]: hi").unwrap();
        let local = ts.with_timezone(&Local);
        assert_eq!((local.hour(), local.minute(), local.second()), (10, 11, 12));
        assert!(extract_timestamp("no stamp").is_none());
    }
}
