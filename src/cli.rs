use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new burrow.toml configuration file
    Init,

    /// Back up a directory to a zip archive or a mirrored copy
    Backup {
        /// Directory to back up
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Directory that receives the backup (defaults to default_destination)
        #[arg(short = 'd', long = "dest", value_name = "DIR")]
        dest: Option<PathBuf>,

        /// Mirror the directory instead of writing a zip archive
        #[arg(long = "no-compress")]
        no_compress: bool,

        /// Extra extensions to exclude (comma-separated, e.g., --exclude=.bak,.swp)
        #[arg(long = "exclude", value_delimiter = ',')]
        exclude: Vec<String>,

        /// Ignore the exclusions from the config file
        #[arg(long = "no-default-excludes")]
        no_default_excludes: bool,

        /// Override deflate compression level (0-9)
        #[arg(long = "compression-level")]
        compression_level: Option<u32>,

        /// Print every processed file
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,

        /// Force enable progress spinner
        #[arg(long = "progress")]
        progress: bool,

        /// Force disable progress spinner
        #[arg(long = "no-progress", conflicts_with = "progress")]
        no_progress: bool,
    },

    /// Restore a recorded backup to a target directory
    Restore {
        /// Id of the backup record
        #[arg(value_name = "ID")]
        id: u64,

        /// Directory to restore into
        #[arg(value_name = "TARGET")]
        target: PathBuf,

        /// Do not ask for confirmation
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// List recorded backups, newest first
    #[command(alias = "ls")]
    History {
        /// Show only the last N backups
        #[arg(long = "last")]
        last: Option<usize>,

        /// Output as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Show every detail of one backup record
    Show {
        #[arg(value_name = "ID")]
        id: u64,
    },

    /// Remove one or more backup records and their archives
    #[command(alias = "rm")]
    Remove {
        /// Ids of the records to remove
        #[arg(value_name = "ID", required = true)]
        ids: Vec<u64>,

        /// Also delete mirrored backup directories
        #[arg(long = "purge")]
        purge: bool,
    },

    /// Forget every backup record (artifacts stay on disk)
    Clear {
        /// Do not ask for confirmation
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Delete backups older than a number of days
    Clean {
        /// Age threshold in days (defaults to clean_days)
        #[arg(long = "days")]
        days: Option<u32>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
