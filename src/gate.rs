//! Synchronizing gate correlating an async reply with a blocking caller.
//!
//! A [`Gate`] is held between a request being issued and its answer arriving
//! on the transport's read task. The waiter owns the timeout: a gate held
//! longer than its configured timeout is force-released by the waiter, which
//! reports failure. This is the only path by which the engine tolerates a
//! non-responding peripheral.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

/// Default gate timeout.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(1);

/// One-slot synchronization gate.
///
/// States: *released* (initial, and after every completed wait) and *held*
/// (between [`acquire`](Gate::acquire) and a satisfying release). Exactly one
/// acquire must precede one wait; concurrent waiters on the same gate are not
/// supported — give each tracked variable its own gate.
#[derive(Debug)]
pub struct Gate {
    held: Mutex<bool>,
    released: Notify,
    timeout: Duration,
}

impl Gate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(false),
            released: Notify::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    /// Take the gate, waiting for any previous holder to release it first.
    /// There is no timeout on acquire itself.
    pub async fn acquire(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // register interest before checking the flag, so a release
            // landing in between is not lost
            released.as_mut().enable();
            {
                let mut held = self.held.lock();
                if !*held {
                    *held = true;
                    return;
                }
            }
            released.await;
        }
    }

    /// Idempotent forced release. Safe to call from a dispatch callback on
    /// the transport's read task; never blocks.
    pub fn ensure_released(&self) {
        let mut held = self.held.lock();
        if *held {
            *held = false;
            self.released.notify_waiters();
        }
    }

    /// Wait until the gate becomes free or the configured timeout elapses.
    /// Returns `(released_in_time, elapsed)`. The wall-clock bound holds
    /// regardless of notification delivery.
    pub async fn wait_until_released(&self) -> (bool, Duration) {
        let start = Instant::now();
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.is_held() {
                return (true, start.elapsed());
            }
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return (false, elapsed);
            }
            let _ = time::timeout(self.timeout - elapsed, released).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_times_out_on_held_gate() {
        let gate = Gate::new(Duration::from_millis(50));
        gate.acquire().await;

        let (released, elapsed) = gate.wait_until_released().await;
        assert!(!released);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100), "overshoot: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_release_from_another_task_unblocks_waiter() {
        let gate = Arc::new(Gate::new(Duration::from_secs(5)));
        gate.acquire().await;

        let releaser = gate.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            releaser.ensure_released();
        });

        let (released, elapsed) = gate.wait_until_released().await;
        assert!(released);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_free() {
        let gate = Gate::new(Duration::from_secs(1));
        let (released, elapsed) = gate.wait_until_released().await;
        assert!(released);
        assert!(elapsed < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_ensure_released_is_idempotent() {
        let gate = Gate::new(Duration::from_millis(50));
        gate.acquire().await;
        gate.ensure_released();
        gate.ensure_released();
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_previous_holder() {
        let gate = Arc::new(Gate::new(Duration::from_secs(1)));
        gate.acquire().await;

        let second = gate.clone();
        let handle = tokio::spawn(async move {
            second.acquire().await;
            second.ensure_released();
        });

        time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        gate.ensure_released();
        handle.await.unwrap();
    }
}
