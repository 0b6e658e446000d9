//! Execution driver.
//!
//! Plans invocation batches, runs them on a bounded pool of tasks with
//! retry and timeout, and parses each raw output inside the task that
//! captured it. Any failed batch fails the whole run; cancellation aborts
//! every outstanding task.

pub mod batching;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use mhcpred_alleles::Allele;
use mhcpred_common::{ExecutionOptions, MhcPredError, Result, RetryPolicy};

use crate::backend::{BackendAdapter, BatchLimits, InvocationBatch};
use crate::normalise::{resolve_rows, ScoredWindow};
use crate::sequence::PeptideWindow;

pub use batching::{effective_limits, plan_batches};
pub use retry::run_with_retry;

/// Cancels an in-progress prediction. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs invocation batches against one backend.
#[derive(Clone)]
pub struct ExecutionDriver {
    adapter: Arc<dyn BackendAdapter>,
    options: ExecutionOptions,
}

/// One batch from build to resolved rows. Errors carry the batch description.
async fn run_batch(
    adapter: Arc<dyn BackendAdapter>,
    batch: InvocationBatch,
    policy: RetryPolicy,
    timeout: Duration,
) -> Result<Vec<ScoredWindow>> {
    let backend = adapter.name().to_string();
    let outcome = async {
        let raw = run_with_retry(adapter.as_ref(), &batch, &policy, timeout).await?;
        let rows = adapter.parse(&raw)?;
        drop(raw);
        resolve_rows(&backend, &batch, rows)
    }
    .await;
    outcome.map_err(|e| e.in_invocation(&backend, batch.describe()))
}

impl ExecutionDriver {
    pub fn new(adapter: Arc<dyn BackendAdapter>, options: ExecutionOptions) -> Self {
        Self { adapter, options }
    }

    pub fn limits(&self) -> BatchLimits {
        effective_limits(self.adapter.limits(), &self.options)
    }

    /// Scores every window against every allele.
    ///
    /// Rows come back grouped by batch in plan order, independent of which
    /// task finished first.
    #[instrument(skip_all, fields(backend = %self.adapter.name(), windows = windows.len(), alleles = alleles.len()))]
    pub async fn run(
        &self,
        windows: Vec<PeptideWindow>,
        alleles: &[Allele],
        cancel: &CancelHandle,
    ) -> Result<Vec<ScoredWindow>> {
        if cancel.is_cancelled() {
            return Err(MhcPredError::Cancelled);
        }
        let batches = plan_batches(windows, alleles, self.limits());
        let total = batches.len();
        info!(batches = total, concurrency = self.options.concurrency, "Starting predictor invocations");

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (index, batch) in batches.into_iter().enumerate() {
            let adapter = Arc::clone(&self.adapter);
            let semaphore = Arc::clone(&semaphore);
            let policy = self.options.retry.clone();
            let timeout = self.options.timeout();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| MhcPredError::Cancelled)?;
                debug!(batch = %batch.id, length = batch.length, peptides = batch.windows.len(), "invocation started");
                run_batch(adapter, batch, policy, timeout).await.map(|rows| (index, rows))
            });
        }

        let mut results: Vec<Option<Vec<ScoredWindow>>> = (0..total).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!("Prediction cancelled; outstanding invocations aborted");
                    return Err(MhcPredError::Cancelled);
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok(Ok((index, rows)))) => results[index] = Some(rows),
                    Some(Ok(Err(e))) => {
                        tasks.abort_all();
                        return Err(e);
                    }
                    Some(Err(join_error)) => {
                        tasks.abort_all();
                        if join_error.is_cancelled() {
                            return Err(MhcPredError::Cancelled);
                        }
                        return Err(MhcPredError::BackendExecutionFailed {
                            backend: self.adapter.name().to_string(),
                            status: "task panicked".to_string(),
                            diagnostic: join_error.to_string(),
                        });
                    }
                },
            }
        }

        Ok(results.into_iter().flatten().flatten().collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockFault};
    use crate::sequence::ProteinSequence;
    use mhcpred_alleles::normalize;
    use pretty_assertions::assert_eq;

    fn options(concurrency: usize) -> ExecutionOptions {
        ExecutionOptions {
            concurrency,
            timeout_secs: 5,
            max_peptides_per_call: Some(2),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
            ..Default::default()
        }
    }

    fn windows() -> Vec<PeptideWindow> {
        ProteinSequence::new("s", "NLYIQWLKDGGPSSGRPPPS").unwrap().windows(9)
    }

    fn alleles() -> Vec<Allele> {
        vec![normalize("A*02:01").unwrap(), normalize("B*07:02").unwrap()]
    }

    #[tokio::test]
    async fn test_runs_all_batches_within_concurrency() {
        let mock = Arc::new(MockBackend::new().with_delay(Duration::from_millis(10)));
        let driver = ExecutionDriver::new(mock.clone(), options(2));
        let rows = driver.run(windows(), &alleles(), &CancelHandle::new()).await.unwrap();

        assert_eq!(rows.len(), 12 * 2);
        // 12 windows in chunks of 2, times 2 alleles
        assert_eq!(mock.calls(), 12);
        assert!(mock.peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_results_in_plan_order() {
        let mock = Arc::new(MockBackend::new());
        let driver = ExecutionDriver::new(mock, options(4));
        let rows = driver.run(windows(), &alleles(), &CancelHandle::new()).await.unwrap();
        let a2: Vec<usize> = rows
            .iter()
            .filter(|r| r.allele.compact() == "A0201")
            .map(|r| r.window.offset)
            .collect();
        assert_eq!(a2, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unparsable_batch_fails_whole_run() {
        let mock = Arc::new(MockBackend::new().with_fault(MockFault::Truncated));
        let driver = ExecutionDriver::new(mock, options(1));
        let err = driver.run(windows(), &alleles(), &CancelHandle::new()).await.unwrap_err();
        assert!(matches!(err, MhcPredError::Invocation { .. }));
        assert!(matches!(err.root_cause(), MhcPredError::UnparsableOutput { .. }));
        assert!(err.to_string().contains("batch="));
    }

    #[tokio::test]
    async fn test_cancel_returns_no_partial_result() {
        let mock = Arc::new(MockBackend::new().with_delay(Duration::from_millis(500)));
        let driver = ExecutionDriver::new(mock, options(1));
        let cancel = CancelHandle::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = driver.run(windows(), &alleles(), &cancel).await.unwrap_err();
        assert!(matches!(err, MhcPredError::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let driver = ExecutionDriver::new(Arc::new(MockBackend::new()), options(1));
        let cancel = CancelHandle::new();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        assert!(matches!(
            driver.run(windows(), &alleles(), &cancel).await,
            Err(MhcPredError::Cancelled)
        ));
    }
}
