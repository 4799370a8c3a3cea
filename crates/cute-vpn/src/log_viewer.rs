//! Engine log viewer
//!
//! The engine writes one `log-YYYYMMDD-HHMMSS.txt` file per session into its
//! storage directory. File names sort chronologically.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of engine log file names
pub const LOG_FILE_PREFIX: &str = "log-";

/// Path of the newest engine log in `dir`
pub fn latest_log_path(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
        })
        .max_by(|a, b| a.file_name().cmp(&b.file_name()))
}

/// Contents of the newest engine log, empty when there is none
pub fn latest_log(dir: &Path) -> String {
    let Some(path) = latest_log_path(dir) else {
        return String::new();
    };
    fs::read_to_string(&path).unwrap_or_else(|e| {
        debug!("Cannot read {}: {}", path.display(), e);
        String::new()
    })
}
