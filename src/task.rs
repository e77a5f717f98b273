use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Background tasks that share one cancellation token and are joined together
#[derive(Debug)]
pub(crate) struct TaskGroup {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    /// Create a group whose token is cancelled along with `parent`
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            handles: Vec::new(),
        }
    }

    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.handles.push(tokio::spawn(task(token)));
    }

    /// Cancel every task and wait for all of them to finish
    pub async fn shutdown(self) {
        self.token.cancel();

        for handle in self.handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("Background task panicked during shutdown: {}", e);
                }
            }
        }
    }
}

/// Run `tick` every `period` until `token` is cancelled.
///
/// With `immediate` the first tick fires right away instead of after one period.
pub(crate) async fn run_periodic<F, Fut>(
    token: CancellationToken,
    period: Duration,
    immediate: bool,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!("Periodic task cancelled");
                break;
            }
            _ = ticker.tick() => tick().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_fires_immediately_and_stops() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new(&root);
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = ticks.clone();
        group.spawn(move |token| async move {
            run_periodic(token, Duration::from_secs(10), true, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        group.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_first_tick() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new(&root);
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = ticks.clone();
        group.spawn(move |token| async move {
            run_periodic(token, Duration::from_secs(5), false, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        // Cancelling the parent stops the group
        root.cancel();
        group.shutdown().await;
    }
}
