//! Cooperative cancellation and deadlines.
//!
//! Long-running steps call [`Cancellation::check`] between units of work
//! (one archive entry, one pipeline stage). Clones share the same flag.

use crate::error::{ArchiveError, ArchiveResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Applies `timeout` only when no deadline has been set yet.
    pub fn or_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(t)) => self.with_timeout(t),
            _ => self,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Requests cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> ArchiveResult<()> {
        if self.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ArchiveError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_passes() {
        assert!(Cancellation::new().check().is_ok());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = Cancellation::new();
        let clone = token.clone();
        token.cancel();
        assert!(matches!(clone.check(), Err(ArchiveError::Cancelled)));
    }

    #[test]
    fn elapsed_deadline_fails() {
        let token = Cancellation::new().with_deadline(Instant::now());
        assert!(matches!(token.check(), Err(ArchiveError::DeadlineExceeded)));
    }

    #[test]
    fn or_timeout_keeps_explicit_deadline() {
        let deadline = Instant::now() + Duration::from_secs(3600);
        let token = Cancellation::new()
            .with_deadline(deadline)
            .or_timeout(Some(Duration::from_secs(1)));
        assert_eq!(token.deadline(), Some(deadline));
    }
}
