//! Runtime-agnostic timer utilities
//!
//! This module provides utility functions that abstract over different async runtimes
//! to avoid repetitive cfg-flag patterns throughout the codebase.

use futures::future::{select, Either};
use std::future::Future;
use std::time::Duration;

/// Sleep for the specified duration using the current runtime
///
/// This function automatically selects the appropriate sleep implementation
/// based on the enabled runtime feature. smol takes precedence when both are
/// enabled.
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "smol")]
    {
        smol::Timer::after(duration).await;
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        tokio::time::sleep(duration).await;
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        let _ = duration;
        compile_error!("One of the runtime features must be enabled: smol or tokio");
    }
}

/// Error returned by [`timeout`] when the deadline elapses first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut(pub Duration);

impl std::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out after {:?}", self.0)
    }
}

impl std::error::Error for TimedOut {}

/// Run `future` to completion unless `duration` elapses first
///
/// The future is dropped when the timer wins, so anything it holds is released
/// before this function returns.
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    let future = std::pin::pin!(future);
    let timer = std::pin::pin!(sleep(duration));

    match select(future, timer).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(TimedOut(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "smol")]
    #[test]
    fn test_sleep() {
        smol::block_on(async {
            let start = std::time::Instant::now();
            sleep(Duration::from_millis(100)).await;
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(100));
        });
    }

    #[cfg(feature = "smol")]
    #[test]
    fn test_timeout_completes() {
        smol::block_on(async {
            let value = timeout(Duration::from_secs(1), async { 7 }).await;
            assert_eq!(value, Ok(7));
        });
    }

    #[cfg(feature = "smol")]
    #[test]
    fn test_timeout_elapses() {
        smol::block_on(async {
            let result = timeout(
                Duration::from_millis(20),
                sleep(Duration::from_secs(5)),
            )
            .await;
            assert_eq!(result, Err(TimedOut(Duration::from_millis(20))));
        });
    }
}
