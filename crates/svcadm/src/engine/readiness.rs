//! Readiness polling
//!
//! Two loop shapes share one retry policy: [`wait_for_container`] waits for
//! the engine to report a container as running, [`poll_until`] drives an
//! application-level probe supplied by an adapter. Probe errors are treated
//! as transient and retried; only exhaustion or cancellation fail the wait.

use super::{ContainerEngine, EngineError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval between checks and the number of checks before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_tries: u32,
}

impl RetryPolicy {
    pub const fn new(interval_secs: u64, max_tries: u32) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            max_tries,
        }
    }
}

/// Sleep for `interval` unless `cancel` fires first.
pub async fn sleep_or_cancel(
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

/// Wait until the engine reports `name` as running.
///
/// Sleeps once before the first check.
pub async fn wait_for_container(
    engine: &dyn ContainerEngine,
    name: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    for attempt in 1..=policy.max_tries {
        sleep_or_cancel(policy.interval, cancel).await?;

        match engine.status(name).await {
            Ok(status) if status == "running" => {
                debug!("Container {} running after {} checks", name, attempt);
                return Ok(());
            }
            Ok(status) => debug!(
                "Container {} is {} ({}/{})",
                name, status, attempt, policy.max_tries
            ),
            Err(e) => debug!(
                "Status check for {} failed ({}/{}): {}",
                name, attempt, policy.max_tries, e
            ),
        }
    }

    Err(EngineError::ReadinessTimeout {
        target: name.to_string(),
        attempts: policy.max_tries,
    })
}

/// Run `probe` until it reports ready, sleeping between attempts.
///
/// The first check runs immediately.
pub async fn poll_until<F, Fut>(
    target: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<(), EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, EngineError>>,
{
    for attempt in 1..=policy.max_tries {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match probe().await {
            Ok(true) => {
                debug!("{} ready after {} checks", target, attempt);
                return Ok(());
            }
            Ok(false) => debug!("{} not ready ({}/{})", target, attempt, policy.max_tries),
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => debug!(
                "{} probe failed ({}/{}): {}",
                target, attempt, policy.max_tries, e
            ),
        }

        if attempt < policy.max_tries {
            sleep_or_cancel(policy.interval, cancel).await?;
        }
    }

    Err(EngineError::ReadinessTimeout {
        target: target.to_string(),
        attempts: policy.max_tries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContainerSpec;
    use crate::test_utils::FakeEngine;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn trivy() -> ContainerSpec {
        ContainerSpec {
            name: "svcadm-trivy".to_string(),
            image: "docker.io/aquasec/trivy:latest".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_container_sleeps_before_first_check() {
        let engine = FakeEngine::new();
        engine.insert_container(trivy(), "running");
        let cancel = CancellationToken::new();

        let started = Instant::now();
        wait_for_container(&engine, "svcadm-trivy", RetryPolicy::new(5, 3), &cancel)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(engine.status_checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_container_checks_max_tries_times() {
        let engine = FakeEngine::new();
        let cancel = CancellationToken::new();

        let err = wait_for_container(&engine, "svcadm-trivy", RetryPolicy::new(1, 4), &cancel)
            .await
            .unwrap_err();

        assert_eq!(engine.status_checks(), 4);
        match err {
            EngineError::ReadinessTimeout { target, attempts } => {
                assert_eq!(target, "svcadm-trivy");
                assert_eq!(attempts, 4);
            }
            other => panic!("Expected ReadinessTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_container_times_out_while_not_running() {
        let engine = FakeEngine::new();
        engine.insert_container(trivy(), "created");
        let cancel = CancellationToken::new();

        let err = wait_for_container(&engine, "svcadm-trivy", RetryPolicy::new(1, 3), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::ReadinessTimeout { attempts: 3, .. }
        ));
        assert_eq!(engine.status_checks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_container_returns_once_running() {
        let engine = Arc::new(FakeEngine::new());
        let cancel = CancellationToken::new();

        let late = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            late.insert_container(trivy(), "running");
        });

        wait_for_container(engine.as_ref(), "svcadm-trivy", RetryPolicy::new(1, 10), &cancel)
            .await
            .unwrap();

        assert_eq!(engine.status_checks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds_after_transient_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let calls_ref = &calls;

        poll_until("probe", RetryPolicy::new(5, 4), &cancel, || async move {
            match calls_ref.fetch_add(1, Ordering::SeqCst) {
                0 => Err(EngineError::NotFound("svc".to_string())),
                1 => Ok(false),
                _ => Ok(true),
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let cancel = CancellationToken::new();
        let err = poll_until("never", RetryPolicy::new(1, 3), &cancel, || async { Ok(false) })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::ReadinessTimeout { attempts: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poll_until("cancelled", RetryPolicy::new(1, 3), &cancel, || async {
            Ok(false)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
