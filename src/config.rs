use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::exclusion::ExclusionSet;
use crate::history::RemovalPolicy;

pub const CONFIG_FILENAME: &str = "burrow.toml";
pub const HISTORY_FILENAME: &str = "backup_history.json";

const MAX_COMPRESSION_LEVEL: u32 = 9;
const MIN_CLEAN_DAYS: u32 = 1;
const MAX_CLEAN_DAYS: u32 = 365;

/// Template written by `burrow init`
pub const DEFAULT_CONFIG: &str = r#"# burrow configuration

# Where backups go when --dest is not given
# default_destination = "/var/backups"

# File extensions never backed up
exclude = [".tmp", ".log", ".cache"]

# true: write a zip archive, false: mirror the directory
compress = true

# Deflate level 0-9 (library default when unset)
# compression_level = 6

history_file = "backup_history.json"

# Delete backups older than clean_days after each run
auto_clean = false
clean_days = 30

# Also delete mirrored directories when removing a record
remove_mirror_artifacts = false

# Show spinners (default: auto-detect TTY)
# progress = true

log_level = "info"
"#;

/// Settings loaded from burrow.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination used when none is passed on the command line
    #[serde(default)]
    pub default_destination: Option<PathBuf>,

    /// Extensions to exclude from every backup
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Write an archive rather than a mirrored directory
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// Deflate level, capped at 9
    #[serde(default)]
    pub compression_level: Option<u32>,

    /// Ledger location, relative to the working directory
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,

    #[serde(default)]
    pub auto_clean: bool,

    /// Age in days after which auto-clean removes a backup
    #[serde(default = "default_clean_days")]
    pub clean_days: u32,

    #[serde(default)]
    pub remove_mirror_artifacts: bool,

    /// Show progress spinners (default: auto-detect TTY)
    #[serde(default)]
    pub progress: Option<bool>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_exclude() -> Vec<String> {
    vec![".tmp".to_string(), ".log".to_string(), ".cache".to_string()]
}
fn default_compress() -> bool { true }
fn default_history_file() -> PathBuf { PathBuf::from(HISTORY_FILENAME) }
fn default_clean_days() -> u32 { 30 }
fn default_log_level() -> String { "info".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            default_destination: None,
            exclude: default_exclude(),
            compress: default_compress(),
            compression_level: None,
            history_file: default_history_file(),
            auto_clean: false,
            clean_days: default_clean_days(),
            remove_mirror_artifacts: false,
            progress: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file; a missing file yields the defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CLEAN_DAYS..=MAX_CLEAN_DAYS).contains(&self.clean_days) {
            bail!(
                "Configuration error: clean_days must be between {} and {}, got {}",
                MIN_CLEAN_DAYS,
                MAX_CLEAN_DAYS,
                self.clean_days
            );
        }

        if self.history_file.as_os_str().is_empty() {
            bail!("Configuration error: history_file is empty");
        }

        if let Some(ref dest) = self.default_destination {
            if dest.as_os_str().is_empty() {
                bail!("Configuration error: default_destination is empty");
            }
        }

        Ok(())
    }

    /// Check a clean-days value given on the command line
    pub fn validate_clean_days(days: u32) -> Result<u32> {
        if !(MIN_CLEAN_DAYS..=MAX_CLEAN_DAYS).contains(&days) {
            bail!("--days must be between {} and {}, got {}", MIN_CLEAN_DAYS, MAX_CLEAN_DAYS, days);
        }
        Ok(days)
    }

    /// Configured exclusions, normalized
    pub fn exclusions(&self) -> ExclusionSet {
        ExclusionSet::new(&self.exclude)
    }

    pub fn removal_policy(&self) -> RemovalPolicy {
        if self.remove_mirror_artifacts {
            RemovalPolicy::AllArtifacts
        }
        else {
            RemovalPolicy::ArchivesOnly
        }
    }

    /// Days used by auto-clean, when enabled
    pub fn auto_clean_days(&self) -> Option<u32> {
        self.auto_clean.then_some(self.clean_days)
    }
}

/// Cap a deflate level at 9, warning when the requested value is higher
pub fn cap_compression_level(level: Option<u32>) -> Option<u32> {
    level.map(|level| {
        if level > MAX_COMPRESSION_LEVEL {
            tracing::warn!(
                "compression_level {} exceeds maximum allowed ({}). Will use level {}.",
                level,
                MAX_COMPRESSION_LEVEL,
                MAX_COMPRESSION_LEVEL
            );
            MAX_COMPRESSION_LEVEL
        }
        else {
            level
        }
    })
}

/// Write the default configuration file, refusing to overwrite an existing one
pub fn write_default_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        bail!("Configuration file already exists: {}", config_path.display());
    }

    crate::fs_utils::atomic_write(config_path, DEFAULT_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    Ok(())
}
