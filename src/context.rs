//! Deadline propagation for network-calling operations

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{MonlerError, Result};

/// Carries an optional deadline into every ping, analyze and derived call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlContext {
    deadline: Option<Instant>,
}

impl CrawlContext {
    /// A context that never expires.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Derives a child context whose deadline is the earlier of the two.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails fast when the deadline already passed.
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(MonlerError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Runs `fut` until it completes or the deadline passes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            None => fut.await,
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| MonlerError::DeadlineExceeded)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_without_deadline_returns_inner_result() {
        let ctx = CrawlContext::background();
        let value = ctx.run(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert!(!ctx.is_expired());
        assert_eq!(ctx.remaining(), None);
    }

    #[tokio::test]
    async fn run_past_deadline_returns_deadline_exceeded() {
        let ctx = CrawlContext::with_timeout(Duration::from_millis(50));
        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(MonlerError::DeadlineExceeded)));
        assert!(ctx.is_expired());
        assert!(ctx.check().is_err());
    }

    #[tokio::test]
    async fn child_never_outlives_parent() {
        let parent = CrawlContext::with_timeout(Duration::from_secs(1));
        let child = parent.child(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.child(Duration::from_millis(10));
        assert!(shorter.deadline() < parent.deadline());
    }
}
