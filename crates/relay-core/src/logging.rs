//! Log file helpers.
//!
//! Protocol traffic owns stdout, so the binary always logs to a file.
//! This module resolves that file, rotates it by size, and maps
//! configured level names onto `tracing` filter directives. The
//! `tracing-subscriber` wiring itself lives in the binary crate.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the active log.
pub const LOG_FILE_NAME: &str = "relay.log";

/// Size-based rotation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotation {
    /// Rotate once the active file reaches this many bytes.
    pub max_size: u64,
    /// Number of rotated files (`relay.log.1` …) kept.
    pub max_files: u32,
}

impl Default for LogRotation {
    fn default() -> Self {
        Self {
            max_size: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

impl LogRotation {
    /// Rotate `log_path` if it has grown past `max_size`.
    ///
    /// `relay.log` becomes `relay.log.1`, older files shift up by one and
    /// anything beyond `max_files` is deleted. Missing or small files are
    /// left alone.
    pub fn rotate(&self, log_path: &Path) -> io::Result<()> {
        let Ok(metadata) = fs::metadata(log_path) else {
            return Ok(());
        };
        if metadata.len() < self.max_size {
            return Ok(());
        }

        let oldest = numbered(log_path, self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for i in (1..self.max_files).rev() {
            let from = numbered(log_path, i);
            if from.exists() {
                fs::rename(&from, numbered(log_path, i + 1))?;
            }
        }
        fs::rename(log_path, numbered(log_path, 1))
    }
}

/// Log file inside `log_dir`, creating the directory if needed.
pub fn prepare_log_file(log_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    Ok(log_dir.join(LOG_FILE_NAME))
}

/// Map a level name (case-insensitive) to a filter directive.
/// Unknown names fall back to `"info"`.
pub fn level_filter(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn numbered(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}.{index}"))
}
