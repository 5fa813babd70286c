//! Utility functions and helper types.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::core::{Error, Result};

/// A future that resolves to [`Error::Cancelled`] once its token fires.
///
/// A panic raised while polling the wrapped future is caught and reported as
/// an [`ErrorKind::Unknown`](crate::core::ErrorKind::Unknown) error.
pub struct Cancellable<F> {
    future: F,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<F> Cancellable<F> {
    /// Create a new cancellable future
    pub fn new(future: F, token: CancellationToken) -> Self {
        Self {
            future,
            cancelled: Box::pin(token.cancelled_owned()),
        }
    }
}

impl<F> Future for Cancellable<F>
where
    F: Future + Unpin,
{
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(Error::Cancelled));
        }

        match catch_unwind(AssertUnwindSafe(|| Pin::new(&mut this.future).poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(panicked(payload))),
        }
    }
}

/// Turn a caught panic payload into a stage error
pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::custom(format!("stage panicked: {message}"))
}

/// Extension trait for making futures cancellable
pub trait CancellableExt: Future + Sized {
    /// Make this future cancellable
    fn cancellable(self, token: CancellationToken) -> Cancellable<Self> {
        Cancellable::new(self, token)
    }
}

impl<F: Future> CancellableExt for F {}

/// Exponential backoff for adapters that talk to flaky I/O.
///
/// The engine never retries on its own; sources and sinks that wrap external
/// resources opt into this.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff factor
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay before the next try after `failed_attempts` failures, or `None`
    /// once attempts are exhausted.
    pub fn next_delay(&self, failed_attempts: usize) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        let factor = self.backoff_factor.powi((failed_attempts - 1) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        Some(std::cmp::min(
            Duration::from_millis(millis as u64),
            self.max_delay,
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::new()
            .with_max_attempts(4)
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(25));

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(25)));
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn test_backoff_factor() {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(10))
            .with_backoff_factor(3.0);

        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(30)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(90)));
        assert_eq!(policy.max_attempts(), 5);
    }

    #[tokio::test]
    async fn test_cancellable() {
        let token = CancellationToken::new();
        let pending = Box::pin(std::future::pending::<()>());
        let fut = pending.cancellable(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        assert!(fut.await.unwrap_err().is_cancelled());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellable_reports_panics() {
        let token = CancellationToken::new();
        let boom = Box::pin(async { explode() });

        let err = boom.cancellable(token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.to_string().contains("kaboom"));
    }

    fn explode() {
        panic!("kaboom");
    }
}
