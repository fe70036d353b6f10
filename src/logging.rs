use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directives, e.g. `SSH_TINT_LOG=debug`.
pub const LOG_ENV: &str = "SSH_TINT_LOG";

const LOG_FILE: &str = "ssh-tint.log";

/// Past this size the log moves to `ssh-tint.log.1`, replacing the previous one.
pub const MAX_LOG_BYTES: u64 = 1024 * 1024;

/// Log file under $TMPDIR. The pane belongs to ssh, so nothing is logged there.
pub fn log_path() -> PathBuf {
    std::env::temp_dir().join(LOG_FILE)
}

/// Install the global subscriber writing to `path`. Returns false (and logs
/// nothing) if the file cannot be opened.
pub fn init(path: &Path) -> bool {
    rotate_if_large(path, MAX_LOG_BYTES);
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    build_subscriber(file, EnvFilter::try_from_env(LOG_ENV).ok())
        .try_init()
        .is_ok()
}

/// Keep one previous generation of the log once it outgrows `limit`.
pub fn rotate_if_large(path: &Path, limit: u64) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.len() > limit {
        let mut rotated = path.as_os_str().to_owned();
        rotated.push(".1");
        let _ = std::fs::rename(path, rotated);
    }
}

/// Subscriber with an `info` default level, overridable through [`LOG_ENV`].
pub fn build_subscriber(
    file: File,
    filter: Option<EnvFilter>,
) -> impl tracing::Subscriber + Send + Sync {
    let filter = filter.unwrap_or_else(|| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_ansi(false).with_writer(Arc::new(file));

    tracing_subscriber::registry().with(fmt_layer).with(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_in_temp_dir() {
        assert!(log_path().starts_with(std::env::temp_dir()));
        assert!(log_path().ends_with("ssh-tint.log"));
    }

    #[test]
    fn test_subscriber_writes_to_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let subscriber = build_subscriber(file.reopen().unwrap(), None);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("pane tinted");
            tracing::debug!("hidden at info level");
        });
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(contents.contains("pane tinted"));
        assert!(!contents.contains("hidden at info level"));
    }

    #[test]
    fn test_large_log_is_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssh-tint.log");
        std::fs::write(&path, vec![b'x'; 64]).unwrap();

        rotate_if_large(&path, 100);
        assert!(path.exists());

        rotate_if_large(&path, 32);
        assert!(!path.exists());
        let rotated = dir.path().join("ssh-tint.log.1");
        assert_eq!(std::fs::metadata(&rotated).unwrap().len(), 64);
    }

    #[test]
    fn test_rotate_missing_log_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        rotate_if_large(&dir.path().join("absent.log"), 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_explicit_filter() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let subscriber = build_subscriber(file.reopen().unwrap(), Some(EnvFilter::new("debug")));
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("visible at debug level");
        });
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(contents.contains("visible at debug level"));
    }
}
