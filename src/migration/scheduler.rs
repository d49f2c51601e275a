//! Request scheduler for concurrency control.
//!
//! Bounds how many import submissions and status queries are in flight at
//! once. A limit of 1 issues remote calls strictly one after another.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// RequestScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Semaphore-backed limit on concurrent remote calls.
///
/// Permits are released when dropped.
#[derive(Clone)]
pub struct RequestScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl RequestScheduler {
    /// Creates a scheduler allowing `max_concurrent` calls. Zero is raised to one.
    pub fn new(max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            sem: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Acquires a permit, waiting if all slots are in use.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the semaphore was closed.
    pub async fn acquire(&self) -> Result<RequestPermit, AppError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Request scheduler closed".into()))?;
        Ok(RequestPermit { _permit: permit })
    }

    pub fn limit(&self) -> usize {
        self.max
    }
}

/// An active request slot, released on drop.
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn zero_limit_becomes_one() {
        let scheduler = RequestScheduler::new(0);
        assert_eq!(scheduler.limit(), 1);
    }

    #[tokio::test]
    async fn acquire_respects_limit() {
        let scheduler = RequestScheduler::new(2);

        let p1 = scheduler.acquire().await.unwrap();
        let _p2 = scheduler.acquire().await.unwrap();
        let third = timeout(Duration::from_millis(20), scheduler.acquire()).await;
        assert!(third.is_err(), "third acquire should wait");

        drop(p1);
        let third = timeout(Duration::from_millis(200), scheduler.acquire()).await;
        assert!(matches!(third, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let scheduler = RequestScheduler::new(1);
        let permit = scheduler.acquire().await.unwrap();

        let waiter = scheduler.clone();
        let handle = tokio::spawn(async move { waiter.acquire().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "second acquire should wait");

        drop(permit);
        let result = timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok(), "acquire should complete after release");
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn clones_share_slots() {
        let a = RequestScheduler::new(1);
        let b = a.clone();
        let _permit = a.acquire().await.unwrap();
        assert!(timeout(Duration::from_millis(20), b.acquire()).await.is_err());
    }
}
