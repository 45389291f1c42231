//! Per-job cancellation and deadline context.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation token plus optional deadline, threaded through every stage
/// of a render run and through accelerator acquisition.
#[derive(Debug, Clone)]
pub struct JobContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl JobContext {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Derive a context that is cancelled with this one, or on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the job was cancelled or ran out of time.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_context_is_live() {
        let ctx = JobContext::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_parent_cancellation_reaches_child() {
        let parent = JobContext::background();
        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_child_cancellation_stays_local() {
        let parent = JobContext::background();
        let child = parent.child();
        child.cancel();
        assert!(parent.check().is_ok());
        assert!(child.check().is_err());
    }

    #[test]
    fn test_deadline_exceeded() {
        let ctx = JobContext::new(CancellationToken::new(), Some(Duration::ZERO));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }
}
