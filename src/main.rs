use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use burrow::{
    Cli, Commands,
    Config, CONFIG_FILENAME, cap_compression_level, write_default_config,
    BackupError, BackupJob, BackupOrchestrator, BackupWorker, BackupStatus,
    ExclusionSet,
    HistoryLedger, RemovalPolicy,
    LogReporter, ProgressConfig, Spinner, Timer,
    format_size, logging, restore,
};

const LINE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Options of the backup command after merging CLI flags with the config file
struct BackupOptions {
    source: PathBuf,
    destination: PathBuf,
    compress: bool,
    exclusions: ExclusionSet,
    compression_level: Option<u32>,
    verbose: bool,
    progress_config: ProgressConfig,
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));

    if matches!(cli.command, Commands::Init) {
        return cmd_init(&config_path);
    }

    let config = Config::load(&config_path)?;

    if let Err(e) = logging::init(&config.log_level) {
        eprintln!("Warning: Failed to initialize logging: {:#}", e);
    }

    let mut ledger = HistoryLedger::open(&config.history_file).with_policy(config.removal_policy());

    match cli.command {
        Commands::Backup {
            source,
            dest,
            no_compress,
            exclude,
            no_default_excludes,
            compression_level,
            verbose,
            progress,
            no_progress,
        } => {
            let destination = dest
                .or_else(|| config.default_destination.clone())
                .with_context(|| {
                    format!(
                        "No backup destination given. Pass --dest or set default_destination in {}",
                        config_path.display()
                    )
                })?;

            let options = BackupOptions {
                source,
                destination,
                compress: config.compress && !no_compress,
                exclusions: build_exclusions(&config, &exclude, no_default_excludes),
                compression_level: cap_compression_level(compression_level.or(config.compression_level)),
                verbose,
                progress_config: ProgressConfig::from_flags(progress, no_progress, config.progress),
            };

            cmd_backup(&config, ledger, options)?
        },
        Commands::Restore { id, target, yes } => cmd_restore(&ledger, id, &target, yes)?,
        Commands::History { last, json } => cmd_history(&ledger, last, json)?,
        Commands::Show { id } => cmd_show(&ledger, id)?,
        Commands::Remove { ids, purge } => cmd_remove(&mut ledger, &ids, purge)?,
        Commands::Clear { yes } => cmd_clear(&mut ledger, yes)?,
        Commands::Clean { days } => cmd_clean(&mut ledger, days.unwrap_or(config.clean_days))?,
        Commands::Init => unreachable!(), // Already handled above
    }

    Ok(())
}

/// Initialize a new burrow.toml configuration file
fn cmd_init(config_path: &Path) -> Result<()> {
    write_default_config(config_path)?;

    println!("Created {}", config_path.display());
    println!("Edit it to set default_destination and the excluded extensions.");

    Ok(())
}

/// Config exclusions (unless disabled) plus the ones given with --exclude
fn build_exclusions(config: &Config, extra: &[String], no_default_excludes: bool) -> ExclusionSet {
    let mut exclusions = if no_default_excludes {
        ExclusionSet::default()
    }
    else {
        config.exclusions()
    };
    exclusions.extend(&ExclusionSet::new(extra));
    exclusions
}

/// Run a backup on the worker thread and print its outcome
fn cmd_backup(config: &Config, ledger: HistoryLedger, options: BackupOptions) -> Result<()> {
    let job = BackupJob::new(&options.source, &options.destination)
        .compress(options.compress)
        .exclusions(options.exclusions)
        .compression_level(options.compression_level);

    let orchestrator = Arc::new(
        BackupOrchestrator::new(Arc::new(Mutex::new(ledger))).with_auto_clean(config.auto_clean_days()),
    );

    if let Err(e) = job.cancel.cancel_on_interrupt() {
        eprintln!("Warning: Ctrl-C will not cancel the backup: {}", e);
    }

    let handle = BackupWorker::spawn(orchestrator, job)?;

    let spinner = Spinner::new(options.progress_config, "Backing up...");
    let mut interrupted = false;
    loop {
        match handle.next_line(LINE_POLL_INTERVAL) {
            Some(line) => {
                if options.verbose {
                    println!("{}", line);
                }
                spinner.set_message(line);
            }
            None if handle.is_finished() => break,
            None => {}
        }

        if !interrupted && handle.is_cancelled() {
            interrupted = true;
            eprintln!("Interrupted, cleaning up partial backup (Ctrl-C again to abort)");
        }
    }
    spinner.finish();

    let outcome = handle.join()?;
    let record = &outcome.record;

    match record.status {
        BackupStatus::Succeeded => {
            println!("\nBackup {} saved successfully", record.id);
            println!("  Artifact: {}", record.artifact_path);
            println!("  Size: {}", record.human_size());
            println!("  Time: {:.2}s", record.elapsed_seconds);
        }
        BackupStatus::Cancelled => {
            println!("Backup cancelled");
            if !outcome.recorded {
                println!("  Nothing was written; no history entry was added.");
            }
        }
        BackupStatus::Failed => {
            bail!("Backup failed: {}", record.error.as_deref().unwrap_or("unknown error"));
        }
    }

    Ok(())
}

/// Restore a recorded backup
fn cmd_restore(ledger: &HistoryLedger, id: u64, target: &Path, yes: bool) -> Result<()> {
    let record = ledger.get(id).ok_or(BackupError::UnknownRecord(id))?;

    if !yes {
        let prompt = if record.is_archive() {
            format!("Extract backup {} into {}? Existing files may be overwritten. [y/N] ", id, target.display())
        }
        else {
            format!("Replace {} with backup {}? The directory will be deleted first. [y/N] ", target.display(), id)
        };

        if !confirm(&prompt)? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let timer = Timer::new();
    let stats = restore(record, target, &LogReporter)?;

    println!("\nBackup {} restored to {}", id, target.display());
    println!("  Files: {}", stats.files);
    if stats.skipped > 0 {
        println!("  Skipped unsafe entries: {}", stats.skipped);
    }
    println!("  Time: {}", timer.elapsed_string());

    Ok(())
}

/// List recorded backups
fn cmd_history(ledger: &HistoryLedger, last: Option<usize>, json: bool) -> Result<()> {
    let mut records = ledger.list();

    if records.is_empty() {
        println!("No backups recorded.");
        return Ok(());
    }

    if let Some(n) = last {
        records.truncate(n);
    }

    if json {
        let json_output = serde_json::to_string_pretty(&records)?;
        println!("{}", json_output);
    }
    else {
        println!("Backup History:\n");
        println!("{:>4}  {:<19}  {:<10} {:>10}  {}", "ID", "DATE", "STATUS", "SIZE", "ARTIFACT");
        println!("{}", "-".repeat(80));
        for record in &records {
            println!("{}", record.display());
        }
        let total: u64 = records.iter().map(|r| r.size_bytes).sum();
        println!("\nTotal backups: {} ({})", records.len(), format_size(total));
    }

    Ok(())
}

/// Show one record in full
fn cmd_show(ledger: &HistoryLedger, id: u64) -> Result<()> {
    let record = ledger.get(id).ok_or(BackupError::UnknownRecord(id))?;
    print!("{}", record.details());
    Ok(())
}

/// Remove records by id
fn cmd_remove(ledger: &mut HistoryLedger, ids: &[u64], purge: bool) -> Result<()> {
    if ids.is_empty() {
        bail!("No backup ids provided");
    }

    println!("Removing {} backup(s)", ids.len());

    let mut removed = 0;
    for &id in ids {
        let found = if purge {
            ledger.remove_with(id, RemovalPolicy::AllArtifacts)?
        }
        else {
            ledger.remove_by_id(id)?
        };

        if found {
            println!("  Removed: {}", id);
            removed += 1;
        }
        else {
            eprintln!("Warning: Backup {} does not exist, skipping", id);
        }
    }

    println!("\nRemoved {} backup(s)", removed);
    Ok(())
}

/// Forget every record
fn cmd_clear(ledger: &mut HistoryLedger, yes: bool) -> Result<()> {
    if ledger.is_empty() {
        println!("No backups recorded.");
        return Ok(());
    }

    let count = ledger.len();
    if !yes && !confirm(&format!("Forget all {} backup record(s)? Backup files stay on disk. [y/N] ", count))? {
        println!("Aborted.");
        return Ok(());
    }

    ledger.clear()?;
    println!("Cleared {} backup record(s)", count);
    Ok(())
}

/// Delete backups older than `days`
fn cmd_clean(ledger: &mut HistoryLedger, days: u32) -> Result<()> {
    let days = Config::validate_clean_days(days)?;
    let cutoff = Utc::now() - Duration::days(i64::from(days));

    let removed = ledger.prune_older_than(cutoff)?;

    if removed.is_empty() {
        println!("No backups older than {} days", days);
    }
    else {
        println!("Removed {} backup(s) older than {} days", removed.len(), days);
    }

    Ok(())
}

/// Ask a yes/no question on stdin
fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  YES "));
        assert!(!is_yes("n"));
        assert!(!is_yes(""));
        assert!(!is_yes("yep"));
    }

    #[test]
    fn test_build_exclusions_merges_config_and_flags() {
        let config = Config::default();
        let exclusions = build_exclusions(&config, &["BAK".to_string()], false);

        assert!(exclusions.contains(".tmp"));
        assert!(exclusions.contains(".cache"));
        assert!(exclusions.contains(".bak"));
    }

    #[test]
    fn test_build_exclusions_without_defaults() {
        let config = Config::default();
        let exclusions = build_exclusions(&config, &[".swp".to_string()], true);

        assert_eq!(exclusions.to_vec(), vec![".swp"]);
    }
}
