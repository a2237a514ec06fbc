//! `ResetCoordinator`: a cross-cutting cancellation token for in-flight
//! operations (spec §4, §5). A reset completes all in-flight work with
//! `ResetError` at its next suspension point; no new work is admitted until
//! the reset sequence finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetError;

impl std::fmt::Display for ResetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a reset was requested")
    }
}

impl std::error::Error for ResetError {}

/// A generation counter, bumped on every `reset()`. Operations capture the
/// generation they started under and compare it at suspension points.
pub struct ResetCoordinator {
    generation: AtomicU64,
    tx: watch::Sender<u64>,
}

impl Default for ResetCoordinator {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            generation: AtomicU64::new(0),
            tx,
        }
    }
}

impl ResetCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Bump the generation, invalidating every token currently outstanding.
    pub fn reset(&self) {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.tx.send(next);
    }

    /// A token an in-flight operation carries through its suspension
    /// points, checking `is_cancelled` after each await.
    pub fn token(&self) -> ResetToken {
        ResetToken {
            started_at: self.generation(),
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone)]
pub struct ResetToken {
    started_at: u64,
    rx: watch::Receiver<u64>,
}

impl ResetToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() != self.started_at
    }

    pub fn check(&self) -> Result<(), ResetError> {
        if self.is_cancelled() {
            Err(ResetError)
        } else {
            Ok(())
        }
    }

    /// Suspend until either a reset lands or the given future resolves,
    /// whichever comes first, surfacing `ResetError` in the former case.
    pub async fn guard<T>(&mut self, fut: impl std::future::Future<Output = T>) -> Result<T, ResetError> {
        tokio::select! {
            biased;
            _ = self.rx.changed() => Err(ResetError),
            value = fut => self.check().map(|_| value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_cancelled_after_reset() {
        let coordinator = ResetCoordinator::new();
        let token = coordinator.token();
        assert!(!token.is_cancelled());
        coordinator.reset();
        assert!(token.is_cancelled());
    }

    #[test]
    fn token_taken_after_reset_starts_uncancelled() {
        let coordinator = ResetCoordinator::new();
        coordinator.reset();
        let token = coordinator.token();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn guard_surfaces_reset_error_when_future_outlives_reset() {
        use std::sync::Arc;

        let coordinator = Arc::new(ResetCoordinator::new());
        let mut token = coordinator.token();
        let background = Arc::clone(&coordinator);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            background.reset();
        });
        let result = token
            .guard(tokio::time::sleep(std::time::Duration::from_secs(3600)))
            .await;
        assert!(matches!(result, Err(ResetError)));
        handle.await.unwrap();
    }
}
