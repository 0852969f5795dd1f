// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use syncarr_config::{PollConfig, PollWindow};
use tokio_util::sync::CancellationToken;
use tracing::info;

struct Inner {
    token: CancellationToken,
    fast: AtomicBool,
    fast_window: PollWindow,
    slow_window: PollWindow,
}

/// Process-wide shutdown flag and idle-poll cadence.
///
/// OS signal handling lives in the binary; this only holds the state the dispatchers poll.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    pub fn new(poll: &PollConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                fast: AtomicBool::new(poll.start_fast),
                fast_window: poll.fast,
                slow_window: poll.slow,
            }),
        }
    }

    pub fn request_shutdown(&self) {
        if !self.inner.token.is_cancelled() {
            info!(target: "lifecycle", "shutdown requested");
        }
        self.inner.token.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn speed_up(&self) {
        self.inner.fast.store(true, Ordering::SeqCst);
        info!(target: "lifecycle", window = ?self.inner.fast_window, "polling faster");
    }

    pub fn slow_down(&self) {
        self.inner.fast.store(false, Ordering::SeqCst);
        info!(target: "lifecycle", window = ?self.inner.slow_window, "polling slower");
    }

    pub fn is_fast(&self) -> bool {
        self.inner.fast.load(Ordering::SeqCst)
    }

    pub fn current_window(&self) -> PollWindow {
        if self.is_fast() {
            self.inner.fast_window
        } else {
            self.inner.slow_window
        }
    }

    /// Jittered sleep for an idle dispatcher, within the current window.
    pub fn idle_interval(&self) -> Duration {
        let window = self.current_window();
        let (low, high) = if window.min_ms <= window.max_ms {
            (window.min_ms, window.max_ms)
        } else {
            (window.max_ms, window.min_ms)
        };
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_switches_between_windows() {
        let lifecycle = Lifecycle::new(&PollConfig::default());
        assert!(!lifecycle.is_fast());
        for _ in 0..50 {
            let idle = lifecycle.idle_interval();
            assert!(idle >= Duration::from_millis(500) && idle <= Duration::from_millis(1500));
        }

        lifecycle.speed_up();
        for _ in 0..50 {
            assert!(lifecycle.idle_interval() <= Duration::from_millis(100));
        }

        lifecycle.slow_down();
        assert_eq!(lifecycle.current_window(), PollWindow::new(500, 1500));
    }

    #[test]
    fn fixed_window_is_exact() {
        let poll = PollConfig {
            slow: PollWindow::fixed(250),
            ..PollConfig::default()
        };
        let lifecycle = Lifecycle::new(&poll);
        assert_eq!(lifecycle.idle_interval(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn shutdown_is_shared_between_clones() {
        let lifecycle = Lifecycle::new(&PollConfig::default());
        let other = lifecycle.clone();
        assert!(!other.is_shutdown_requested());
        lifecycle.request_shutdown();
        other.cancelled().await;
        assert!(other.is_shutdown_requested());
    }
}
