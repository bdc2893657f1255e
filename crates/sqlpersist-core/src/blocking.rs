//! Driving async code paths from blocking entry points.
//!
//! The blocking API runs the same async functions as the async API, over a
//! [`Blocking`](crate::connection::Blocking) connection whose futures are
//! always ready. A single poll with a no-op waker is then enough to complete
//! them, so both variants share one control flow.

use crate::error::{Error, Result};
use asupersync::Outcome;
use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll, Waker};

/// Poll a future that never suspends to completion.
///
/// Returns an error if the future is still pending after one poll, which
/// means it awaited something other than a blocking connection.
pub fn block_on_ready<F: Future>(future: F) -> Result<F::Output> {
    let mut future = pin!(future);
    let mut context = Context::from_waker(Waker::noop());
    match future.as_mut().poll(&mut context) {
        Poll::Ready(output) => Ok(output),
        Poll::Pending => Err(Error::Custom(
            "blocking operation suspended; use the async API with an async connection"
                .to_string(),
        )),
    }
}

/// Collapse an `Outcome` into a `Result` for blocking callers.
pub fn outcome_into_result<T>(outcome: Outcome<T, Error>) -> Result<T> {
    match outcome {
        Outcome::Ok(v) => Ok(v),
        Outcome::Err(e) => Err(e),
        Outcome::Cancelled(_) => Err(Error::Cancelled),
        Outcome::Panicked(p) => Err(Error::Custom(format!("Panicked: {p:?}"))),
    }
}

/// Run an always-ready async operation and flatten its outcome.
pub fn run_blocking<T, F>(future: F) -> Result<T>
where
    F: Future<Output = Outcome<T, Error>>,
{
    outcome_into_result(block_on_ready(future)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Poll;

    struct PendingOnce;

    impl Future for PendingOnce {
        type Output = ();

        fn poll(self: std::pin::Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
            Poll::Pending
        }
    }

    #[test]
    fn test_ready_future_completes() {
        let value = block_on_ready(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_pending_future_is_an_error() {
        let err = block_on_ready(PendingOnce).unwrap_err();
        assert!(matches!(err, Error::Custom(_)));
    }

    #[test]
    fn test_run_blocking_flattens_outcome() {
        let ok: Result<i32> = run_blocking(async { Outcome::Ok(1) });
        assert_eq!(ok.unwrap(), 1);

        let err: Result<i32> = run_blocking(async { Outcome::Err(Error::Timeout) });
        assert!(matches!(err, Err(Error::Timeout)));
    }
}
