//! Lifecycle log level configuration and container log sinks.

use serde::{Deserialize, Serialize};

/// Log level passed to lifecycle binaries via `-log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: '{}' (supported: debug, info, warn, error)",
                s
            )),
        }
    }
}

/// Logging configuration for lifecycle phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Ask the runtime to prefix each container log line with a timestamp.
    #[serde(default)]
    pub use_timestamps: bool,
}

/// Output stream a container log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Destination for relayed container output.
pub trait LogSink: Send + Sync {
    fn stdout(&self, line: &str);

    fn stderr(&self, line: &str);

    fn line(&self, stream: LogStreamKind, line: &str) {
        match stream {
            LogStreamKind::Stdout => self.stdout(line),
            LogStreamKind::Stderr => self.stderr(line),
        }
    }
}

/// Prints container output on the process's own stdout/stderr.
#[derive(Debug, Clone, Default)]
pub struct ConsoleLogSink;

impl LogSink for ConsoleLogSink {
    fn stdout(&self, line: &str) {
        println!("{}", line);
    }

    fn stderr(&self, line: &str) {
        eprintln!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl LogSink for Recorder {
        fn stdout(&self, line: &str) {
            self.0.lock().unwrap().push(format!("out:{line}"));
        }

        fn stderr(&self, line: &str) {
            self.0.lock().unwrap().push(format!("err:{line}"));
        }
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("trace".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.level.to_string(), "info");
        assert!(!config.use_timestamps);
    }

    #[test]
    fn test_log_config_yaml() {
        let config: LogConfig = serde_yaml::from_str("level: debug\nuse_timestamps: true").unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.use_timestamps);
    }

    #[test]
    fn test_sink_dispatches_by_stream() {
        let sink = Recorder::default();
        sink.line(LogStreamKind::Stdout, "detecting");
        sink.line(LogStreamKind::Stderr, "warning: no cache");
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec!["out:detecting", "err:warning: no cache"]
        );
    }
}
