//! Background maintenance task.
//!
//! Periodically evicts idle connections from the keyed rate limiter so its
//! map does not grow with every connection ever seen, and retries broker
//! unsubscribes that failed when the last member left a channel.

use crate::config::CleanupConfig;
use crate::limits::RateLimits;
use crate::router::ChannelRouter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn the maintenance task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    rate_limits: RateLimits,
    router: Arc<ChannelRouter>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            let before = rate_limits.message_keys_count();
            rate_limits.shrink();
            let after = rate_limits.message_keys_count();
            if before > after {
                tracing::info!("Cleanup: evicted {} idle rate-limit entries", before - after);
            } else {
                tracing::debug!("Cleanup: no idle rate-limit entries");
            }

            let released = router.release_idle().await;
            if released > 0 {
                tracing::info!("Cleanup: released {} idle channel(s)", released);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::config::LimitsConfig;

    fn router() -> Arc<ChannelRouter> {
        Arc::new(ChannelRouter::new(Arc::new(LocalBroker::standalone(8))))
    }

    #[tokio::test]
    async fn cleanup_task_disabled() {
        let limits = RateLimits::new(&LimitsConfig::default());
        let config = CleanupConfig {
            interval_secs: 1,
            enabled: false,
        };

        let handle = spawn_cleanup_task(limits, router(), config);

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn cleanup_task_keeps_running_until_aborted() {
        let limits = RateLimits::new(&LimitsConfig::default());
        let handle = spawn_cleanup_task(
            limits,
            router(),
            CleanupConfig {
                interval_secs: 1,
                enabled: true,
            },
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
