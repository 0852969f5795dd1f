// SPDX-License-Identifier: GPL-3.0-or-later
//! Binds OS signals to the scheduler lifecycle.

use anyhow::Result;
use syncarr_scheduler::Lifecycle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Exit status after a second interrupt.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Spawn the signal listener.
///
/// INT, TERM and HUP request a graceful shutdown. A second INT exits immediately. USR1 and USR2
/// switch the idle-poll cadence to the fast and slow windows.
#[cfg(unix)]
pub fn install(lifecycle: Lifecycle) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        let mut interrupted = false;
        loop {
            tokio::select! {
                _ = interrupt.recv() => {
                    if interrupted {
                        warn!(target: "cli", "second SIGINT, exiting without draining");
                        std::process::exit(FORCED_EXIT_CODE);
                    }
                    interrupted = true;
                    info!(target: "cli", "SIGINT received, finishing in-flight tasks (interrupt again to exit now)");
                    lifecycle.request_shutdown();
                }
                _ = terminate.recv() => {
                    info!(target: "cli", "SIGTERM received");
                    lifecycle.request_shutdown();
                }
                _ = hangup.recv() => {
                    info!(target: "cli", "SIGHUP received");
                    lifecycle.request_shutdown();
                }
                _ = user1.recv() => lifecycle.speed_up(),
                _ = user2.recv() => lifecycle.slow_down(),
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn install(lifecycle: Lifecycle) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        let mut interrupted = false;
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(target: "cli", error = %err, "ctrl-c handler failed");
                return;
            }
            if interrupted {
                warn!(target: "cli", "second ctrl-c, exiting without draining");
                std::process::exit(FORCED_EXIT_CODE);
            }
            interrupted = true;
            info!(target: "cli", "ctrl-c received, finishing in-flight tasks");
            lifecycle.request_shutdown();
        }
    }))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;
    use syncarr_config::PollConfig;

    fn raise(signal: &str) {
        let status = Command::new("kill")
            .args([signal, &std::process::id().to_string()])
            .status()
            .expect("kill runs");
        assert!(status.success());
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn user_signals_switch_cadence_and_term_shuts_down() {
        let lifecycle = Lifecycle::new(&PollConfig::default());
        let listener = install(lifecycle.clone()).unwrap();
        assert!(!lifecycle.is_fast());

        raise("-USR1");
        assert!(wait_until(|| lifecycle.is_fast()).await);
        raise("-USR2");
        assert!(wait_until(|| !lifecycle.is_fast()).await);

        assert!(!lifecycle.is_shutdown_requested());
        raise("-TERM");
        assert!(wait_until(|| lifecycle.is_shutdown_requested()).await);
        listener.abort();
    }
}
