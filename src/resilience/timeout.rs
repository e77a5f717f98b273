use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Run a future with a deadline.
///
/// On expiry the future is dropped, which cancels any in-flight I/O it owns
/// at its next await point.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, future).await.map_err(|_| {
        debug!("Operation timed out after {:?}", duration);
        Error::Timeout { timeout: duration }
    })
}

/// Like [`with_timeout`] for fallible futures, flattening the result
pub async fn with_deadline<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(duration, future).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_millis(100), async {
            sleep(Duration::from_millis(50)).await;
            42
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_failure_cancels_future() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let result = with_timeout(Duration::from_millis(50), async move {
            sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { timeout }) if timeout == Duration::from_millis(50)));

        sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_passes_through_inner_error() {
        let result: Result<()> = with_deadline(Duration::from_secs(1), async {
            Err(Error::Service("boom".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Service(_))));
    }
}
