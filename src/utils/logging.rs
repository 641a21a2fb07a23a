//! Logging setup for SecureShield.

use crate::core::config::LoggingConfig;
use crate::core::error::{Error, Result};
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    /// Append to this file instead of writing to stderr
    pub file_path: Option<PathBuf>,
    pub timestamps: bool,
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            timestamps: true,
            module_path: false,
        }
    }
}

impl LogConfig {
    /// Create a log config from the `logging` section of the engine config.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let level = parse_level(&config.log_level);
        Self {
            level,
            file_path: config.log_path.clone(),
            timestamps: config.timestamps,
            module_path: level >= LevelFilter::Debug,
        }
    }

    /// Verbose console logging for the CLI.
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::Debug,
            module_path: true,
            ..Self::default()
        }
    }

    /// Errors only.
    pub fn quiet() -> Self {
        Self {
            level: LevelFilter::Error,
            timestamps: false,
            ..Self::default()
        }
    }
}

/// Parse a level name, falling back to `Info`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Initialize the global logger. Calling it twice is harmless.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(config.level);

    let color = config.file_path.is_none();
    if let Some(path) = &config.file_path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::file_write(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::file_write(path, e))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    let timestamps = config.timestamps;
    let module_path = config.module_path;
    builder.format(move |buf, record| {
        let mut output = String::new();

        if timestamps {
            output.push_str(&format!("{} ", Local::now().format("%Y-%m-%d %H:%M:%S")));
        }

        let level_str = if color {
            match record.level() {
                log::Level::Error => "\x1b[31mERROR\x1b[0m",
                log::Level::Warn => "\x1b[33mWARN\x1b[0m ",
                log::Level::Info => "\x1b[32mINFO\x1b[0m ",
                log::Level::Debug => "\x1b[34mDEBUG\x1b[0m",
                log::Level::Trace => "\x1b[35mTRACE\x1b[0m",
            }
        } else {
            match record.level() {
                log::Level::Error => "ERROR",
                log::Level::Warn => "WARN ",
                log::Level::Info => "INFO ",
                log::Level::Debug => "DEBUG",
                log::Level::Trace => "TRACE",
            }
        };
        output.push_str(&format!("[{}] ", level_str));

        if module_path {
            if let Some(path) = record.module_path() {
                output.push_str(&format!("{}: ", path));
            }
        }

        output.push_str(&format!("{}", record.args()));
        writeln!(buf, "{}", output)
    });

    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
        return Ok(());
    }

    log::debug!("Logging initialized with level: {:?}", config.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, LevelFilter::Info);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_log_config_verbose_and_quiet() {
        assert_eq!(LogConfig::verbose().level, LevelFilter::Debug);
        assert!(LogConfig::verbose().module_path);
        assert_eq!(LogConfig::quiet().level, LevelFilter::Error);
        assert!(!LogConfig::quiet().timestamps);
    }

    #[test]
    fn test_from_config() {
        let section = LoggingConfig {
            log_level: "TRACE".to_string(),
            log_path: Some(PathBuf::from("/tmp/secureshield.log")),
            timestamps: false,
        };
        let config = LogConfig::from_config(&section);
        assert_eq!(config.level, LevelFilter::Trace);
        assert!(config.module_path);
        assert!(!config.timestamps);
        assert!(config.file_path.is_some());
    }

    #[test]
    fn test_parse_level_fallback() {
        assert_eq!(parse_level("warning"), LevelFilter::Warn);
        assert_eq!(parse_level("loud"), LevelFilter::Info);
    }
}
