//! Bounded retry of a single invocation.

use std::time::Duration;
use tracing::{info, warn};

use mhcpred_common::{MhcPredError, Result, RetryPolicy};

use crate::backend::{BackendAdapter, InvocationBatch, RawOutput};

/// Slack given to an adapter past its own timeout before the attempt is
/// abandoned from outside.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Executes `batch`, retrying retryable failures with exponential backoff.
///
/// Each attempt builds a fresh invocation. A server-requested delay replaces
/// the computed backoff but is still capped at the policy's maximum. Running out of attempts yields `BackendUnavailable`
/// naming the last failure; non-retryable errors are returned at once.
pub async fn run_with_retry(
    adapter: &dyn BackendAdapter,
    batch: &InvocationBatch,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<RawOutput> {
    let backend = adapter.name();
    let attempts = policy.max_attempts.max(1);
    let mut last_error: Option<MhcPredError> = None;

    for attempt in 0..attempts {
        let spec = adapter.build_invocation(batch)?;
        let outcome = match tokio::time::timeout(timeout + TIMEOUT_GRACE, adapter.execute(spec, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(MhcPredError::Timeout {
                backend: backend.to_string(),
                after: timeout,
            }),
        };

        match outcome {
            Ok(raw) => {
                if attempt > 0 {
                    info!(backend, batch = %batch.id, attempt = attempt + 1, "invocation succeeded after retry");
                }
                return Ok(raw);
            }
            Err(e) if e.is_retryable() => {
                let delay = match e.retry_after() {
                    Some(requested) => requested.min(policy.max_backoff()),
                    None => policy.backoff(attempt),
                };
                warn!(
                    backend,
                    batch = %batch.id,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    ?delay,
                    "retryable invocation failure"
                );
                last_error = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    let reason = match last_error {
        Some(e) => format!("gave up after {} attempts: {}", attempts, e),
        None => format!("gave up after {} attempts", attempts),
    };
    Err(MhcPredError::unavailable(backend, reason))
}
