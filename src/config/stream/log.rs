use std::fmt::{self, Display};

/// Header fields of a vanilla-style `[time] [thread/LEVEL]: msg` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMeta {
    pub time: String,
    pub thread: String,
    pub level: LogLevel,
    pub msg: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Other,
}

impl LogMeta {
    /// `None` when the line carries no recognisable header.
    pub fn new<S: AsRef<str>>(line: S) -> Option<Self> {
        let line = line.as_ref().trim();

        if !line.starts_with('[') {
            return None;
        }

        let time_end = match line.find(']') {
            Some(i) => i,
            None => return None,
        };
        let time = line[1..time_end].to_string();

        let meta_start = match line[time_end + 1..].find('[') {
            Some(j) => time_end + 1 + j,
            None => return None,
        };

        let msg_sep = match line[meta_start..].find("]: ") {
            Some(k) => meta_start + k,
            None => return None,
        };

        let meta = &line[(meta_start + 1)..msg_sep];
        let msg = line[(msg_sep + 3)..].to_string();

        let Some((thread, level_str)) = meta.split_once('/') else {
            return None;
        };

        let level = match level_str.trim_end_matches(']') {
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Other,
        };

        Some(LogMeta {
            time,
            thread: thread.to_string(),
            level,
            msg,
        })
    }
}

impl Display for LogMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time: {}\nThread: {}\nLevel: {}\nMessage: {}",
            self.time, self.thread, self.level, self.msg
        )
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Other => write!(f, "OTHER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thread_and_level() {
        let meta = LogMeta::new("[12:00:01] [Server thread/WARN]: Can't keep up!").unwrap();
        assert_eq!(meta.time, "12:00:01");
        assert_eq!(meta.thread, "Server thread");
        assert_eq!(meta.level, LogLevel::Warn);
        assert_eq!(meta.msg, "Can't keep up!");
    }

    #[test]
    fn paper_style_header_is_not_vanilla() {
        assert!(LogMeta::new("[12:00:01 INFO]: hello").is_none());
        assert!(LogMeta::new("plain").is_none());
    }
}
