//! Utility functions and helper types.

use std::future::Future;
use std::time::Duration;

use crate::core::{Error, Result};

/// Await `future`, giving up after `duration`.
///
/// On elapse the future is dropped; when it is a
/// [`Terminal`](crate::flow::Terminal) this cancels the whole flow.
///
/// ```rust
/// use std::time::Duration;
/// use demandweld::prelude::*;
///
/// # tokio_test::block_on(async {
/// let never = Flow::<i32>::from_future(std::future::pending()).first();
/// let err = with_timeout(never, Duration::from_millis(10)).await.unwrap_err();
/// assert!(matches!(err, Error::Timeout { duration_ms: 10 }));
/// # });
/// ```
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(?duration, "operation timed out");
            Err(Error::timeout(duration.as_millis() as u64))
        }
    }
}
