// SPDX-License-Identifier: GPL-3.0-or-later
//! Auto-reload for development: restart when the binary is rebuilt.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use syncarr_scheduler::Lifecycle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const POLL: Duration = Duration::from_secs(1);

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when the file at `path` exists and its mtime differs from `baseline`.
pub fn changed_since(path: &Path, baseline: Option<SystemTime>) -> bool {
    match modified(path) {
        Some(current) => Some(current) != baseline,
        None => false,
    }
}

/// Watch `binary` and request shutdown once it changes on disk.
///
/// The task resolves to `true` when the change triggered the shutdown.
pub fn watch(binary: PathBuf, lifecycle: Lifecycle) -> JoinHandle<bool> {
    watch_every(binary, lifecycle, POLL)
}

fn watch_every(binary: PathBuf, lifecycle: Lifecycle, every: Duration) -> JoinHandle<bool> {
    let baseline = modified(&binary);
    info!(target: "dev", binary = %binary.display(), "watching binary for changes");
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = lifecycle.cancelled() => return false,
                _ = tokio::time::sleep(every) => {}
            }
            if changed_since(&binary, baseline) {
                info!(target: "dev", "binary changed, restarting after in-flight tasks finish");
                lifecycle.request_shutdown();
                return true;
            }
        }
    })
}

/// Replace the current process with a fresh run of `binary` and the same arguments.
pub fn reexec(binary: &Path) -> Result<()> {
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    info!(target: "dev", binary = %binary.display(), "re-executing");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = Command::new(binary).args(&args).exec();
        warn!(target: "dev", error = %err, "re-exec failed");
        Err(err.into())
    }

    #[cfg(not(unix))]
    {
        let status = Command::new(binary).args(&args).status()?;
        std::process::exit(status.code().unwrap_or(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncarr_config::PollConfig;

    #[test]
    fn missing_file_never_counts_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!changed_since(&dir.path().join("gone"), None));
    }

    #[test]
    fn touched_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, b"v1").unwrap();
        let baseline = modified(&path);
        assert!(!changed_since(&path, baseline));

        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
        assert!(changed_since(&path, baseline));
    }

    #[tokio::test]
    async fn watcher_requests_shutdown_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, b"v1").unwrap();
        let lifecycle = Lifecycle::new(&PollConfig::default());
        let watcher = watch_every(path.clone(), lifecycle.clone(), Duration::from_millis(10));

        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();

        assert!(watcher.await.unwrap());
        assert!(lifecycle.is_shutdown_requested());
    }

    #[tokio::test]
    async fn watcher_stops_quietly_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, b"v1").unwrap();
        let lifecycle = Lifecycle::new(&PollConfig::default());
        let watcher = watch_every(path, lifecycle.clone(), Duration::from_millis(10));
        lifecycle.request_shutdown();
        assert!(!watcher.await.unwrap());
    }
}
