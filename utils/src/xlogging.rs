use err_derive::Error;
use serde::{Deserialize, Serialize};
use slog::{o, Drain, Logger};

pub use slog;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingSettings {
    pub stdout: bool,
    pub level: String,
    pub log_path: Option<String>,
    pub name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            stdout: true,
            level: String::from("info"),
            log_path: None,
            name: String::from("lnhub"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error(display = "Unknown logging level {:?}", _0)]
    UnknownLevel(String),
    #[error(display = "Could not open log file: {}", _0)]
    Io(#[source] std::io::Error),
}

pub fn parse_level(level: &str) -> Result<slog::Level, LoggingError> {
    match level {
        "trace" => Ok(slog::Level::Trace),
        "debug" => Ok(slog::Level::Debug),
        "info" => Ok(slog::Level::Info),
        "warning" | "warn" => Ok(slog::Level::Warning),
        "error" => Ok(slog::Level::Error),
        "critical" => Ok(slog::Level::Critical),
        st => Err(LoggingError::UnknownLevel(st.to_string())),
    }
}

/// Builds the root logger. Components get children of it through their constructors.
pub fn init_log(config: &LoggingSettings) -> Result<Logger, LoggingError> {
    let LoggingSettings {
        stdout,
        level,
        log_path,
        name,
    } = config;

    let level = parse_level(level)?;

    let drain_stdout_async = if *stdout {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        Some(slog_async::Async::new(drain).build().fuse())
    } else {
        None
    };

    let file_drain = match log_path {
        Some(path) => Some(build_file_drain(path).map_err(LoggingError::Io)?),
        None => None,
    };

    let logger = match (drain_stdout_async, file_drain) {
        (Some(drain_stdout), Some(file_drain)) => {
            let drain = slog::Duplicate::new(drain_stdout, file_drain).fuse();
            let filter_drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(filter_drain, o!("name" => name.to_string()))
        }
        (Some(drain_stdout), None) => {
            let filter_drain = slog::LevelFilter::new(drain_stdout, level).fuse();
            slog::Logger::root(filter_drain, o!("name" => name.to_string()))
        }
        (None, Some(file_drain)) => {
            let filter_drain = slog::LevelFilter::new(file_drain, level).fuse();
            slog::Logger::root(filter_drain, o!("name" => name.to_string()))
        }
        (None, None) => discard(),
    };

    Ok(logger)
}

/// Logger that drops every record, handy for tests.
pub fn discard() -> Logger {
    slog::Logger::root(slog::Discard, o!())
}

fn build_file_drain(log_path: &str) -> Result<slog::Fuse<slog_async::Async>, std::io::Error> {
    let file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    let decorator = slog_term::PlainSyncDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Ok(drain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("debug").unwrap(), slog::Level::Debug);
        assert_eq!(parse_level("warn").unwrap(), slog::Level::Warning);
        assert!(matches!(parse_level("loud"), Err(LoggingError::UnknownLevel(_))));
    }

    #[test]
    fn errors_describe_the_cause() {
        let err = parse_level("loud").unwrap_err();
        assert_eq!(err.to_string(), "Unknown logging level \"loud\"");

        let missing_dir = std::env::temp_dir().join("xlogging_missing_dir").join("lnhub.log");
        let settings = LoggingSettings {
            stdout: false,
            level: "info".to_string(),
            log_path: Some(missing_dir.to_string_lossy().to_string()),
            name: "test".to_string(),
        };
        match init_log(&settings) {
            Err(err @ LoggingError::Io(_)) => assert!(err.to_string().starts_with("Could not open log file")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn file_only_logger_writes_to_path() {
        let path = std::env::temp_dir().join("xlogging_test.log");
        let settings = LoggingSettings {
            stdout: false,
            level: "info".to_string(),
            log_path: Some(path.to_string_lossy().to_string()),
            name: "test".to_string(),
        };
        assert!(init_log(&settings).is_ok());
        assert!(path.exists());
    }
}
