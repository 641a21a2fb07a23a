//! SecureShield: a file-integrity scanning engine.
//!
//! This is the main entry point for the CLI application.

use secureshield::core::config::EngineConfig;
use secureshield::core::error::{Error, Result};
use secureshield::core::types::{Outcome, ScanReport};
use secureshield::detection::{RuleFile, SignatureStore};
use secureshield::quarantine::{QuarantineEntry, QuarantineManager};
use secureshield::scanner::{ConsoleProgressReporter, ScanOptions, ScanSession};
use secureshield::ui::cli::{
    exit_code_for, Cli, Commands, ConfigAction, OutputFormat, QuarantineAction, RulesAction,
    ScanArgs, EXIT_CLEAN, EXIT_FAILURE, EXIT_MATCHES,
};
use secureshield::ui::report::export_report;
use secureshield::utils::logging::{init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::debug!("{} error: {:?}", e.category(), e);
            eprintln!("Error: {}", e);
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    // Load configuration
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(EngineConfig::default_config_path);
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(),
    };

    // Initialize logging based on verbosity
    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::from_config(&config.logging)
    };
    init_logging(log_config)?;

    log::debug!("SecureShield v{}", secureshield::VERSION);
    log::debug!("Configuration loaded from {:?}", config_path);

    // Handle commands
    match cli.command {
        Some(Commands::Scan(args)) => run_scan(config, args, cli.format, cli.quiet).await,
        Some(Commands::Quarantine {
            quarantine_dir,
            action,
        }) => {
            let mut config = config;
            if let Some(dir) = quarantine_dir {
                config.quarantine.vault_path = Some(dir);
            }
            run_quarantine(action, &config, cli.format)
        }
        Some(Commands::Rules { action }) => run_rules(action, &config, cli.format),
        Some(Commands::Config { action }) => run_config(action, &config, &config_path),
        Some(Commands::Info) => run_info(&config, &config_path, cli.format),
        None => {
            // No command specified, show help
            println!("SecureShield - File-Integrity Scanner");
            println!();
            println!("Use --help for usage information");
            println!();
            println!("Quick start:");
            println!("  secureshield scan <PATH>            Scan and quarantine matches");
            println!("  secureshield scan <PATH> --no-action  Report matches only");
            println!("  secureshield quarantine list        View quarantined files");
            println!("  secureshield rules check <FILE>     Validate a rule file");
            Ok(EXIT_CLEAN)
        }
    }
}

/// Run a scan.
async fn run_scan(
    mut config: EngineConfig,
    args: ScanArgs,
    format: OutputFormat,
    quiet: bool,
) -> Result<u8> {
    args.apply(&mut config);
    config.validate()?;
    let config = Arc::new(config);

    let store = Arc::new(SignatureStore::from_config(&config.rules)?);
    log::info!(
        "Using {} rule(s) from {} (version {})",
        store.len(),
        store.info().source,
        store.version()
    );

    let (quarantine, options) = if args.no_action {
        (None, ScanOptions::report_only())
    } else {
        let manager = QuarantineManager::from_config(&config.quarantine)?;
        (Some(Arc::new(manager)), ScanOptions::from_config(&config))
    };

    let session = ScanSession::new(Arc::clone(&config), store, quarantine);

    // Ctrl-C cancels at the next file boundary
    let token = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling scan");
            token.cancel();
        }
    });

    if format == OutputFormat::Text && !quiet {
        let reporter = ConsoleProgressReporter::new();
        session.progress().set_callback(move |p| reporter.report(p));
    }

    let report = session.start(&args.path, options).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text if !quiet => print_scan_report(&report),
        OutputFormat::Text => {}
    }

    if let Some(output) = &args.output {
        export_report(&report, output)?;
        if format == OutputFormat::Text && !quiet {
            println!("Report saved to {}", output.display());
        }
    }

    Ok(exit_code_for(&report))
}

fn print_scan_report(report: &ScanReport) {
    let c = &report.counts;
    println!();
    println!("=== Scan {} ===", report.state);
    println!("Session ID:        {}", report.session_id);
    println!("Root:              {}", report.root.display());
    println!("Duration:          {} seconds", report.duration_secs());
    println!("Entries:           {}", c.total);
    println!("Scanned:           {}", c.scanned);
    println!("Clean:             {}", c.clean);
    println!("Matched:           {}", c.matched);
    println!("Quarantined:       {}", c.quarantined);
    println!("Quarantine Failed: {}", c.quarantine_failed);
    println!("Unreadable:        {}", c.unreadable);
    println!("Skipped:           {}", c.skipped);
    if c.unscanned > 0 {
        println!("Unscanned:         {}", c.unscanned);
    }

    if report.has_matches() {
        println!();
        println!("Matches:");
        for verdict in report.matches() {
            println!(
                "  {} - {} [{}]",
                verdict.path().display(),
                verdict.outcome,
                verdict.disposition
            );
        }
    }

    let failures: Vec<_> = report
        .failures()
        .filter(|v| !matches!(v.outcome, Outcome::Matched { .. }))
        .collect();
    if !failures.is_empty() {
        println!();
        println!("Unreadable:");
        for verdict in failures {
            println!("  {} - {}", verdict.path().display(), verdict.outcome);
        }
    }
}

/// Manage the quarantine store.
fn run_quarantine(
    action: QuarantineAction,
    config: &EngineConfig,
    format: OutputFormat,
) -> Result<u8> {
    let manager = QuarantineManager::from_config(&config.quarantine)?;

    match action {
        QuarantineAction::List => {
            let entries = manager.list()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Text if entries.is_empty() => println!("Quarantine is empty."),
                OutputFormat::Text => {
                    println!(
                        "{:<36}  {:<20}  {:<10}  {:>10}  Original Path",
                        "ID", "Isolated At", "Signature", "Size"
                    );
                    for entry in &entries {
                        println!(
                            "{:<36}  {:<20}  {:<10}  {:>10}  {}",
                            entry.id,
                            entry.isolated_at.format("%Y-%m-%d %H:%M:%S"),
                            entry.signature_id,
                            entry.size,
                            entry.original_path.display()
                        );
                    }
                    let stats = manager.stats()?;
                    println!();
                    println!(
                        "{} item(s), {} bytes on disk",
                        stats.total_count, stats.store_size
                    );
                }
            }
        }
        QuarantineAction::Show { id } => {
            let entry = manager
                .get(&id)?
                .ok_or_else(|| Error::QuarantineEntryNotFound(id.clone()))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entry)?),
                OutputFormat::Text => print_entry(&entry),
            }
        }
        QuarantineAction::Restore { id, to } => {
            let restored = manager.restore_to(&id, to.as_deref())?;
            println!("Restored {} to {}", id, restored.display());
        }
        QuarantineAction::Delete { id } => {
            manager.purge(&id)?;
            println!("Deleted {}", id);
        }
        QuarantineAction::Clear { yes } => {
            if !yes {
                eprintln!("Refusing to delete all quarantined files without --yes");
                return Ok(EXIT_FAILURE);
            }
            let removed = manager.purge_all()?;
            println!("Deleted {} item(s)", removed);
        }
        QuarantineAction::Verify => {
            let report = manager.verify()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    println!("Checked:   {}", report.checked);
                    println!("OK:        {}", report.ok);
                    for (label, ids) in [
                        ("Missing", &report.missing),
                        ("Corrupted", &report.corrupted),
                        ("Orphans", &report.orphans),
                        ("Pending", &report.pending),
                    ] {
                        if !ids.is_empty() {
                            println!("{}: {}", label, ids.join(", "));
                        }
                    }
                }
            }
            if !report.is_healthy() {
                return Ok(EXIT_MATCHES);
            }
        }
        QuarantineAction::PurgeExpired { days } => {
            let days = days.unwrap_or(config.quarantine.retention_days);
            let removed = manager.purge_expired(chrono::Duration::days(i64::from(days)))?;
            println!("Deleted {} item(s) older than {} day(s)", removed, days);
        }
    }

    Ok(EXIT_CLEAN)
}

fn print_entry(entry: &QuarantineEntry) {
    println!("ID:            {}", entry.id);
    println!("Original Path: {}", entry.original_path.display());
    println!("Stored As:     {}", entry.file_name);
    println!("SHA-256:       {}", entry.sha256);
    println!("Size:          {} bytes", entry.size);
    println!(
        "Signature:     {} ({})",
        entry.signature_label, entry.signature_id
    );
    println!("Isolated At:   {}", entry.isolated_at.to_rfc3339());
    if let Some(modified) = entry.modified_at {
        println!("Modified At:   {}", modified.to_rfc3339());
    }
    if let Some(mode) = entry.mode {
        println!("Mode:          {:o}", mode);
    }
    println!("State:         {}", entry.state);
}

/// Inspect rule files.
fn run_rules(action: RulesAction, config: &EngineConfig, format: OutputFormat) -> Result<u8> {
    let store = match &action {
        RulesAction::List { rules: Some(path) } => SignatureStore::load(path)?,
        RulesAction::List { rules: None } => SignatureStore::from_config(&config.rules)?,
        RulesAction::Check { file } => SignatureStore::load(file)?,
        RulesAction::Export { rules: Some(path), .. } => SignatureStore::load(path)?,
        RulesAction::Export { rules: None, .. } => SignatureStore::from_config(&config.rules)?,
    };

    match action {
        RulesAction::List { .. } => match format {
            OutputFormat::Json => {
                let rules: Vec<_> = store.signatures().iter().map(|s| s.to_rule()).collect();
                println!("{}", serde_json::to_string_pretty(&rules)?);
            }
            OutputFormat::Text => {
                for sig in store.signatures() {
                    println!(
                        "{:<12} {:<10} {:<8} {:<24} {}",
                        sig.id,
                        sig.kind().as_str(),
                        sig.severity.as_str(),
                        sig.label,
                        sig.payload_display()
                    );
                }
                println!();
                println!("{} rule(s), version {}", store.len(), store.version());
            }
        },
        RulesAction::Check { file } => {
            let info = store.info();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
                OutputFormat::Text => println!(
                    "{}: OK, version {} (format {}), {} rule(s): {} pattern, {} hash, {} extension",
                    file.display(),
                    info.version,
                    info.format_version,
                    info.total,
                    info.pattern_count,
                    info.hash_count,
                    info.extension_count
                ),
            }
        }
        RulesAction::Export { output, .. } => {
            RuleFile::from_signatures(store.version(), store.signatures()).save(&output)?;
            println!(
                "Exported {} rule(s) from {} to {}",
                store.len(),
                store.info().source,
                output.display()
            );
        }
    }

    Ok(EXIT_CLEAN)
}

/// Handle configuration commands.
fn run_config(action: ConfigAction, config: &EngineConfig, config_path: &Path) -> Result<u8> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Reset { yes } => {
            if !yes {
                eprintln!("Refusing to overwrite {} without --yes", config_path.display());
                return Ok(EXIT_FAILURE);
            }
            log::info!("Resetting configuration to defaults...");
            EngineConfig::default().save(config_path)?;
            println!("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(EXIT_CLEAN)
}

/// Show application information.
fn run_info(config: &EngineConfig, config_path: &Path, format: OutputFormat) -> Result<u8> {
    let rule_source: PathBuf = config
        .rules
        .rule_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("(built-in keywords)"));

    if format == OutputFormat::Json {
        let info = serde_json::json!({
            "name": secureshield::NAME,
            "version": secureshield::VERSION,
            "config_path": config_path,
            "data_dir": EngineConfig::data_dir(),
            "quarantine_dir": config.quarantine.quarantine_dir(),
            "rule_source": rule_source,
            "default_action": config.actions.default_action,
            "max_file_size_bytes": config.scan.max_file_size_bytes,
            "scan_threads": config.scan.effective_threads(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(EXIT_CLEAN);
    }

    println!("{} - File-Integrity Scanner", secureshield::NAME);
    println!();
    println!("Version:          {}", secureshield::VERSION);
    println!("Config Path:      {}", config_path.display());
    println!("Data Directory:   {}", EngineConfig::data_dir().display());
    println!(
        "Quarantine Path:  {}",
        config.quarantine.quarantine_dir().display()
    );
    println!();
    println!("Rule Settings:");
    println!("  Rule Source:    {}", rule_source.display());
    println!("  Default Action: {:?}", config.actions.default_action);
    println!();
    println!("Scan Settings:");
    println!(
        "  Max File Size:  {} MB",
        config.scan.max_file_size_bytes / (1024 * 1024)
    );
    println!("  Threads:        {}", config.scan.effective_threads());
    println!("  Retention:      {} days", config.quarantine.retention_days);
    Ok(EXIT_CLEAN)
}
