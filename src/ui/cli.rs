//! Command-line interface definition.

use crate::core::config::EngineConfig;
use crate::core::types::ScanReport;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Exit code when no file matched.
pub const EXIT_CLEAN: u8 = 0;
/// Exit code when at least one file matched, quarantined or reported.
pub const EXIT_MATCHES: u8 = 1;
/// Exit code when the run itself failed.
pub const EXIT_FAILURE: u8 = 2;

/// SecureShield: file-integrity scanner with a restorable quarantine
#[derive(Parser, Debug)]
#[command(name = "secureshield")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a file or directory tree
    Scan(ScanArgs),

    /// Manage quarantined files
    Quarantine {
        /// Quarantine store directory
        #[arg(long)]
        quarantine_dir: Option<PathBuf>,

        #[command(subcommand)]
        action: QuarantineAction,
    },

    /// Inspect and validate rule files
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show application information
    Info,
}

/// Arguments of the `scan` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// File or directory to scan
    pub path: PathBuf,

    /// JSON rule file to use instead of the configured rules
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Quarantine store directory
    #[arg(long)]
    pub quarantine_dir: Option<PathBuf>,

    /// Skip files larger than this many megabytes
    #[arg(long)]
    pub max_size_mb: Option<u64>,

    /// Number of classification workers
    #[arg(long)]
    pub threads: Option<usize>,

    /// Report matches without quarantining them
    #[arg(long)]
    pub no_action: bool,

    /// Export the report (JSON for .json, CSV otherwise)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ScanArgs {
    /// Override configuration values with the ones given on the command line.
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(rules) = &self.rules {
            config.rules.rule_file = Some(rules.clone());
        }
        if let Some(dir) = &self.quarantine_dir {
            config.quarantine.vault_path = Some(dir.clone());
        }
        if let Some(mb) = self.max_size_mb {
            config.scan.max_file_size_bytes = mb.saturating_mul(1024 * 1024);
        }
        if let Some(threads) = self.threads {
            config.scan.scan_threads = threads;
        }
    }
}

/// Quarantine subcommands.
#[derive(Subcommand, Debug)]
pub enum QuarantineAction {
    /// List quarantined files
    List,

    /// Show one quarantine entry
    Show {
        /// Entry ID
        id: String,
    },

    /// Restore a quarantined file
    Restore {
        /// Entry ID
        id: String,

        /// Restore to this path instead of the original location
        #[arg(long)]
        to: Option<PathBuf>,
    },

    /// Delete a quarantined file permanently
    Delete {
        /// Entry ID
        id: String,
    },

    /// Delete all quarantined files
    Clear {
        /// Confirm deletion
        #[arg(short, long)]
        yes: bool,
    },

    /// Check every entry against its copy
    Verify,

    /// Delete entries older than the retention period
    PurgeExpired {
        /// Retention in days (defaults to the configured value)
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Rule subcommands.
#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// List the rules that a scan would use
    List {
        /// JSON rule file to list instead of the configured rules
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Validate a rule file
    Check {
        /// Rule file to validate
        file: PathBuf,
    },

    /// Write the rules a scan would use to a JSON rule file
    Export {
        /// Destination file
        output: PathBuf,

        /// JSON rule file to export instead of the configured rules
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the configuration file location
    Path,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Process exit code for a finished scan.
pub fn exit_code_for(report: &ScanReport) -> u8 {
    if report.has_matches() {
        EXIT_MATCHES
    } else {
        EXIT_CLEAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FileRecord, Outcome, ScanCounts, SessionState, Verdict};
    use chrono::Utc;

    #[test]
    fn test_parse_scan() {
        let cli = Cli::try_parse_from([
            "secureshield",
            "scan",
            "/data",
            "--rules",
            "rules.json",
            "--max-size-mb",
            "5",
            "--threads",
            "2",
            "--no-action",
            "-o",
            "out.csv",
        ])
        .unwrap();

        let Some(Commands::Scan(args)) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(args.path, PathBuf::from("/data"));
        assert!(args.no_action);
        assert_eq!(args.output, Some(PathBuf::from("out.csv")));

        let mut config = EngineConfig::default();
        args.apply(&mut config);
        assert_eq!(config.rules.rule_file, Some(PathBuf::from("rules.json")));
        assert_eq!(config.scan.max_file_size_bytes, 5 * 1024 * 1024);
        assert_eq!(config.scan.scan_threads, 2);
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "secureshield",
            "quarantine",
            "restore",
            "abc",
            "--to",
            "/tmp/out",
            "--format",
            "json",
            "--quiet",
        ])
        .unwrap();

        assert!(cli.quiet);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Some(Commands::Quarantine {
                action: QuarantineAction::Restore { id, to },
                ..
            }) => {
                assert_eq!(id, "abc");
                assert_eq!(to, Some(PathBuf::from("/tmp/out")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rules_export() {
        let cli = Cli::try_parse_from(["secureshield", "rules", "export", "out.json"]).unwrap();
        match cli.command {
            Some(Commands::Rules {
                action: RulesAction::Export { output, rules },
            }) => {
                assert_eq!(output, PathBuf::from("out.json"));
                assert!(rules.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["secureshield", "-v", "-q", "info"]).is_err());
    }

    #[test]
    fn test_exit_code_for() {
        let mut report = ScanReport {
            session_id: "s".to_string(),
            root: PathBuf::from("/"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            state: SessionState::Complete,
            verdicts: vec![Verdict::new(FileRecord::new("/a"), Outcome::Clean)],
            counts: ScanCounts::default(),
        };
        report.counts = ScanCounts::from_verdicts(&report.verdicts);
        assert_eq!(exit_code_for(&report), EXIT_CLEAN);

        report.verdicts.push(Verdict::new(
            FileRecord::new("/b"),
            Outcome::Matched {
                signature_id: "KW-001".to_string(),
                label: "Keyword.Virus".to_string(),
            },
        ));
        report.counts = ScanCounts::from_verdicts(&report.verdicts);
        assert_eq!(exit_code_for(&report), EXIT_MATCHES);
    }
}
