//! Cooperative cancellation shared by sample workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Set once when the run is interrupted. Workers check it at stage
/// boundaries and between attempts, and stop starting new work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, waking early if the token is cancelled.
    pub fn sleep(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.is_cancelled() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(POLL_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        let start = Instant::now();
        crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| {
                std::thread::sleep(Duration::from_millis(50));
                token.cancel();
            });
            token.sleep(Duration::from_secs(30));
        })
        .unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));

        let start = Instant::now();
        CancelToken::new().sleep(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
