//! Presentation of run progress: timestamped status lines plus the progress
//! label that shows the latest output of the live stage.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

pub trait OutputLog: Send {
    /// One line in the run history.
    fn status(&mut self, level: StatusLevel, message: &str);

    /// Replace the progress label.
    fn progress(&mut self, text: &str);
}

/// `[YYYY-MM-DD HH:MM:SS]  message` in local time.
pub fn timestamped(message: &str) -> String {
    format!("[{}]  {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message)
}

/// Status lines go to the tracing subscriber; progress is logged at debug.
#[derive(Debug, Default)]
pub struct TracingLog;

impl OutputLog for TracingLog {
    fn status(&mut self, level: StatusLevel, message: &str) {
        match level {
            StatusLevel::Info => info!("{}", message),
            StatusLevel::Warning => warn!("{}", message),
            StatusLevel::Error => error!("{}", message),
        }
    }

    fn progress(&mut self, text: &str) {
        tracing::debug!("{}", text);
    }
}

/// Terminal output: status lines are printed above an indicatif spinner
/// carrying the progress label. Every status line is mirrored to tracing so
/// the log file keeps the run history.
pub struct ConsoleLog {
    spinner: ProgressBar,
}

impl ConsoleLog {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputLog for ConsoleLog {
    fn status(&mut self, level: StatusLevel, message: &str) {
        self.spinner.println(timestamped(message));
        match level {
            StatusLevel::Info => info!(target: "gxs::status", "{}", message),
            StatusLevel::Warning => warn!(target: "gxs::status", "{}", message),
            StatusLevel::Error => error!(target: "gxs::status", "{}", message),
        }
    }

    fn progress(&mut self, text: &str) {
        self.spinner.set_message(text.to_string());
    }
}

impl Drop for ConsoleLog {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub level: StatusLevel,
    pub message: String,
    pub line: String,
}

#[derive(Debug, Default)]
struct Captured {
    lines: Vec<StatusLine>,
    progress: Vec<String>,
}

/// In-memory log whose clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<Captured>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<StatusLine> {
        self.inner
            .lock()
            .map(|captured| captured.lines.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|line| line.message).collect()
    }

    pub fn progress_history(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|captured| captured.progress.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.message.contains(needle))
    }
}

impl OutputLog for MemoryLog {
    fn status(&mut self, level: StatusLevel, message: &str) {
        if let Ok(mut captured) = self.inner.lock() {
            captured.lines.push(StatusLine {
                level,
                message: message.to_string(),
                line: timestamped(message),
            });
        }
    }

    fn progress(&mut self, text: &str) {
        if let Ok(mut captured) = self.inner.lock() {
            captured.progress.push(text.to_string());
        }
    }
}
