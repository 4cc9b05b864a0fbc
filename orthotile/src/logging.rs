//! Logging setup for binaries using the crate.
//!
//! Output goes to a log file (truncated at start) and to stdout. The level
//! filter comes from `RUST_LOG` and defaults to `info`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the file writer alive. Dropping it flushes and closes the log.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    path: PathBuf,
}

impl LoggingGuard {
    /// Path of the log file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when the log directory cannot be created or the log file cannot
/// be truncated. Calling it twice leaves the first subscriber in place.
pub fn init_logging(log_dir: &Path, log_file: &str) -> io::Result<LoggingGuard> {
    let path = prepare_log_file(log_dir, log_file)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be set (tests, embedding applications).
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
        path,
    })
}

/// Creates `log_dir` and empties `log_file` in it.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file);
    fs::write(&path, "")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_nested_directory() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("deep").join("logs");

        let path = prepare_log_file(&log_dir, "orthotile.log").unwrap();

        assert_eq!(path, log_dir.join("orthotile.log"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_truncates_previous_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orthotile.log");
        fs::write(&path, "previous session").unwrap();

        prepare_log_file(dir.path(), "orthotile.log").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_fails_when_directory_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();

        assert!(prepare_log_file(&blocker, "orthotile.log").is_err());
    }
}
