//! Configuration management for SecureShield.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default maximum number of bytes inspected per file (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Upper bound on classification workers.
pub const MAX_SCAN_THREADS: usize = 8;

/// Engine configuration, passed explicitly to every scan session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scan-related settings
    pub scan: ScanConfig,
    /// Rule source settings
    pub rules: RulesConfig,
    /// What to do with matched files
    pub actions: ActionConfig,
    /// Quarantine store settings
    pub quarantine: QuarantineConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigSave(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigSave(format!("Failed to write config file: {}", e)))
    }

    /// Load configuration from default location, or create default if not exists.
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    log::warn!("Failed to load config, using defaults: {}", e);
                    return Self::default();
                }
            }
        }

        let config = Self::default();
        if let Err(e) = config.save(&config_path) {
            log::warn!("Failed to save default config: {}", e);
        }
        config
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }

    /// Get the application data directory.
    pub fn data_dir() -> PathBuf {
        #[cfg(windows)]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData"))
                .join("SecureShield")
        }

        #[cfg(not(windows))]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("secureshield")
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scan.max_file_size_bytes == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.max_file_size_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.scan.scan_threads == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.scan_threads".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if !self.rules.use_builtin && self.rules.rule_file.is_none() {
            return Err(Error::ConfigInvalid {
                field: "rules".to_string(),
                message: "Either rules.rule_file or rules.use_builtin must be set".to_string(),
            });
        }

        if self.quarantine.retention_days == 0 {
            return Err(Error::ConfigInvalid {
                field: "quarantine.retention_days".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Scan-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Files larger than this are reported `too-large` instead of being read
    pub max_file_size_bytes: u64,
    /// Path fragments to exclude from enumeration
    pub exclude_paths: Vec<String>,
    /// File extensions to exclude from enumeration
    pub exclude_extensions: Vec<String>,
    /// Number of classification workers
    pub scan_threads: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
            exclude_paths: vec![
                #[cfg(not(windows))]
                "/proc".to_string(),
                #[cfg(not(windows))]
                "/sys".to_string(),
                #[cfg(windows)]
                "C:\\$Recycle.Bin".to_string(),
            ],
            exclude_extensions: Vec::new(),
            scan_threads: num_cpus(),
        }
    }
}

impl ScanConfig {
    /// Worker count actually used by a session.
    pub fn effective_threads(&self) -> usize {
        self.scan_threads.clamp(1, MAX_SCAN_THREADS)
    }
}

/// Rule source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// JSON rule file to load
    pub rule_file: Option<PathBuf>,
    /// Fall back to the built-in keyword rules when no file is configured
    pub use_builtin: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rule_file: None,
            use_builtin: true,
        }
    }
}

/// Default action configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Action for matched files
    pub default_action: DefaultAction,
}

/// Default action to take on matched files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAction {
    /// Move to quarantine as soon as a match is found
    #[default]
    Quarantine,
    /// Report only, leave files in place
    ReportOnly,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Append log records to this file instead of stderr
    pub log_path: Option<PathBuf>,
    /// Prefix records with a local timestamp
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_path: None,
            timestamps: true,
        }
    }
}

/// Quarantine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Path for the quarantine store
    pub vault_path: Option<PathBuf>,
    /// Days to keep quarantined items before `purge-expired` removes them
    pub retention_days: u32,
    /// Overwrite quarantined copies before deleting them
    pub secure_delete: bool,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            vault_path: None,
            retention_days: 30,
            secure_delete: true,
        }
    }
}

impl QuarantineConfig {
    /// Get the effective quarantine directory.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.vault_path
            .clone()
            .unwrap_or_else(|| EngineConfig::data_dir().join("quarantine"))
    }
}

/// Get the number of CPUs, with a reasonable default.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
