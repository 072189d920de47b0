use chrono::Local;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

/// Progress configuration for determining whether to show progress bars
#[derive(Debug, Clone, Copy)]
pub enum ProgressConfig {
    /// Auto-detect based on TTY
    Auto,
    /// Force enable progress bars
    ForceEnable,
    /// Force disable progress bars
    ForceDisable,
}

impl ProgressConfig {
    /// Create a progress config from CLI flags and config file
    pub fn from_flags(progress_flag: bool, no_progress_flag: bool, config_value: Option<bool>) -> Self {
        if progress_flag {
            ProgressConfig::ForceEnable
        }
        else if no_progress_flag {
            ProgressConfig::ForceDisable
        }
        else if let Some(config_val) = config_value {
            if config_val {
                ProgressConfig::ForceEnable
            }
            else {
                ProgressConfig::ForceDisable
            }
        }
        else {
            ProgressConfig::Auto
        }
    }

    /// Determine if progress should be shown based on configuration
    pub fn should_show_progress(&self) -> bool {
        match self {
            ProgressConfig::Auto => atty::is(atty::Stream::Stderr),
            ProgressConfig::ForceEnable => true,
            ProgressConfig::ForceDisable => false,
        }
    }
}

/// Timer for tracking operation duration
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create and start a new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Get elapsed time in seconds as a formatted string
    pub fn elapsed_string(&self) -> String {
        format!("{:.2}s", self.elapsed_secs())
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// A single step of a backup or restore run, in processing order
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Started { artifact: String },
    Archiving,
    Mirroring,
    /// File written into an archive, by relative path
    Added(String),
    Excluded(String),
    CopiedFile(String),
    CopiedDirectory(String),
    Cancelling,
    Cancelled,
    Finished { elapsed_secs: f64, size: String },
    Failed(String),
    Restoring { id: u64, target: String },
    Extracted(String),
    Restored { files: usize },
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Started { artifact } => write!(f, "Backup started: {}", artifact),
            Progress::Archiving => write!(f, "Creating zip archive..."),
            Progress::Mirroring => write!(f, "Creating directory copy..."),
            Progress::Added(path) => write!(f, "Added: {}", path),
            Progress::Excluded(path) => write!(f, "Excluded: {}", path),
            Progress::CopiedFile(name) => write!(f, "Copied file: {}", name),
            Progress::CopiedDirectory(name) => write!(f, "Copied directory: {}", name),
            Progress::Cancelling => write!(f, "Cancelling backup..."),
            Progress::Cancelled => write!(f, "Backup cancelled"),
            Progress::Finished { elapsed_secs, size } => {
                write!(f, "Backup complete! Time: {:.2}s, size: {}", elapsed_secs, size)
            }
            Progress::Failed(reason) => write!(f, "Backup failed: {}", reason),
            Progress::Restoring { id, target } => write!(f, "Restoring backup {} to {}", id, target),
            Progress::Extracted(path) => write!(f, "Extracted: {}", path),
            Progress::Restored { files } => write!(f, "Restore complete! {} file(s)", files),
        }
    }
}

/// Receives progress events from a running job
pub trait Reporter: Send + Sync {
    fn report(&self, event: Progress);
}

impl<F> Reporter for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, event: Progress) {
        self(event)
    }
}

/// Discards every event
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: Progress) {}
}

/// Forwards events to the tracing subscriber
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: Progress) {
        match event {
            Progress::Failed(_) => tracing::error!("{}", event),
            Progress::Added(_)
            | Progress::Excluded(_)
            | Progress::CopiedFile(_)
            | Progress::Extracted(_) => tracing::debug!("{}", event),
            _ => tracing::info!("{}", event),
        }
    }
}

/// Sends timestamped progress lines to another thread
pub struct ChannelReporter {
    sender: Sender<String>,
}

impl ChannelReporter {
    pub fn new(sender: Sender<String>) -> Self {
        Self { sender }
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, event: Progress) {
        let line = format!("{}{}", Local::now().format("[%H:%M:%S] "), event);
        // Receiver gone means nobody is watching any more
        let _ = self.sender.send(line);
    }
}

/// Spinner for indeterminate operations
pub struct Spinner {
    bar: Option<ProgressBar>,
    enabled: bool,
}

impl Spinner {
    /// Create a new spinner with a message
    pub fn new(config: ProgressConfig, message: &str) -> Self {
        let enabled = config.should_show_progress();

        let bar = if enabled {
            let pb = ProgressBar::new_spinner();
            pb.set_draw_target(ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
                pb.set_style(style);
            }
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        }
        else {
            None
        };

        Self { bar, enabled }
    }

    /// Replace the spinner message
    pub fn set_message(&self, msg: String) {
        if let Some(ref bar) = self.bar {
            bar.set_message(msg);
        }
    }

    /// Finish and clear the spinner
    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }

    /// Check if spinner is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
