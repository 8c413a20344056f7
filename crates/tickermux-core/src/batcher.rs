//! Request batching and coalescing.
//!
//! Callers against a batch-enabled source are parked in a pending batch keyed
//! by `(source, data_type)`. The first caller opens the batch and arms its
//! wait timer; the batch flushes when it reaches the policy's max size or the
//! timer fires, whichever comes first. A generation counter guards removal so
//! a batch executes at most once even when the size flush and the timer race.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::sync::oneshot;

use crate::policy::BatchPolicy;
use crate::provider::{Payload, QueryParams, SourceError};
use crate::{DataType, ProviderId};

/// Executes one flushed batch.
///
/// Receives the full ordered call list and must return one result per call in
/// submission order. An outer error fails every member of the batch.
pub trait BatchExecutor: Send + Sync {
    fn execute_batch<'a>(
        &'a self,
        source: ProviderId,
        data_type: DataType,
        calls: Vec<QueryParams>,
    ) -> Pin<
        Box<dyn Future<Output = Result<Vec<Result<Payload, SourceError>>, SourceError>> + Send + 'a>,
    >;
}

type BatchKey = (ProviderId, DataType);
type Waiter = oneshot::Sender<Result<Payload, SourceError>>;

struct PendingBatch {
    generation: u64,
    calls: Vec<(QueryParams, Waiter)>,
}

/// State shared with the armed wait timers.
struct BatcherShared {
    executor: Arc<dyn BatchExecutor>,
    pending: Mutex<HashMap<BatchKey, PendingBatch>>,
    stopped: AtomicBool,
}

impl BatcherShared {
    async fn flush(&self, key: BatchKey, batch: PendingBatch) {
        let (source, data_type) = key;
        let (params, waiters): (Vec<_>, Vec<_>) = batch.calls.into_iter().unzip();
        let call_count = waiters.len();

        match self.executor.execute_batch(source, data_type, params).await {
            Ok(results) => {
                if results.len() != call_count {
                    let mismatch = SourceError::internal(format!(
                        "batch executor returned {} results for {call_count} calls",
                        results.len()
                    ));
                    let mut results = results.into_iter();
                    for waiter in waiters {
                        let outcome = results.next().unwrap_or_else(|| Err(mismatch.clone()));
                        let _ = waiter.send(outcome);
                    }
                    return;
                }
                for (waiter, result) in waiters.into_iter().zip(results) {
                    let _ = waiter.send(result);
                }
            }
            Err(error) => {
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
        }
    }
}

/// Coalesces concurrent calls per `(source, data_type)` pair.
pub struct RequestBatcher {
    shared: Arc<BatcherShared>,
    policies: HashMap<ProviderId, BatchPolicy>,
    next_generation: AtomicU64,
}

impl RequestBatcher {
    pub fn new(executor: Arc<dyn BatchExecutor>, policies: HashMap<ProviderId, BatchPolicy>) -> Self {
        Self {
            shared: Arc::new(BatcherShared {
                executor,
                pending: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
            policies,
            next_generation: AtomicU64::new(0),
        }
    }

    fn policy_for(&self, source: ProviderId) -> BatchPolicy {
        self.policies
            .get(&source)
            .copied()
            .unwrap_or_else(BatchPolicy::disabled)
    }

    /// Submits one call, waiting for its batch to flush.
    ///
    /// # Errors
    ///
    /// Returns the per-call result from the executor, the executor's own
    /// failure (shared by every member of the batch), or an `unavailable`
    /// error when the batcher has been shut down.
    pub async fn submit(
        &self,
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
    ) -> Result<Payload, SourceError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(SourceError::unavailable("request batcher is shut down"));
        }

        let policy = self.policy_for(source);
        if !policy.enabled {
            let mut results = self
                .shared
                .executor
                .execute_batch(source, data_type, vec![params])
                .await?;
            return match results.len() {
                1 => results.remove(0),
                n => Err(SourceError::internal(format!(
                    "batch executor returned {n} results for 1 call"
                ))),
            };
        }

        let (tx, rx) = oneshot::channel();
        let key = (source, data_type);

        let flush_now = {
            let mut pending = self
                .shared
                .pending
                .lock()
                .expect("pending batches not poisoned");
            let batch = pending.entry(key).or_insert_with(|| {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                arm_timer(&self.shared, key, generation, policy.max_wait);
                PendingBatch {
                    generation,
                    calls: Vec::new(),
                }
            });
            batch.calls.push((params, tx));

            if batch.calls.len() >= policy.max_batch_size {
                pending.remove(&key)
            } else {
                None
            }
        };

        if let Some(batch) = flush_now {
            debug!(
                "flushing full batch of {} calls for {source}/{data_type}",
                batch.calls.len()
            );
            self.shared.flush(key, batch).await;
        }

        rx.await
            .unwrap_or_else(|_| Err(SourceError::internal("batched call was dropped")))
    }

    /// Rejects every still-pending batched call and refuses new submissions.
    pub fn shutdown(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        let drained: Vec<PendingBatch> = {
            let mut pending = self
                .shared
                .pending
                .lock()
                .expect("pending batches not poisoned");
            pending.drain().map(|(_, batch)| batch).collect()
        };
        for batch in drained {
            for (_, waiter) in batch.calls {
                let _ = waiter.send(Err(SourceError::unavailable("request batcher is shut down")));
            }
        }
    }
}

/// Spawns the max-wait timer for a freshly opened batch. The generation
/// check makes the timer a no-op if a size flush already took the batch.
fn arm_timer(shared: &Arc<BatcherShared>, key: BatchKey, generation: u64, max_wait: Duration) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(max_wait).await;

        let batch = {
            let mut pending = shared.pending.lock().expect("pending batches not poisoned");
            match pending.get(&key) {
                Some(existing) if existing.generation == generation => pending.remove(&key),
                _ => None,
            }
        };

        if let Some(batch) = batch {
            shared.flush(key, batch).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CountingExecutor {
        invocations: AtomicU64,
        fail: bool,
    }

    impl CountingExecutor {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicU64::new(0),
                fail,
            })
        }
    }

    impl BatchExecutor for CountingExecutor {
        fn execute_batch<'a>(
            &'a self,
            _source: ProviderId,
            _data_type: DataType,
            calls: Vec<QueryParams>,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<Vec<Result<Payload, SourceError>>, SourceError>>
                    + Send
                    + 'a,
            >,
        > {
            Box::pin(async move {
                self.invocations.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(SourceError::unavailable("upstream down"));
                }
                Ok(calls
                    .into_iter()
                    .map(|params| {
                        let ticker = params.get_str("ticker").unwrap_or("?").to_owned();
                        Ok(json!({ "ticker": ticker }))
                    })
                    .collect())
            })
        }
    }

    fn batcher_with(executor: Arc<CountingExecutor>, policy: BatchPolicy) -> Arc<RequestBatcher> {
        let mut policies = HashMap::new();
        policies.insert(ProviderId::Polygon, policy);
        Arc::new(RequestBatcher::new(executor, policies))
    }

    #[tokio::test]
    async fn concurrent_calls_coalesce_into_one_executor_invocation() {
        let executor = CountingExecutor::new(false);
        let batcher = batcher_with(
            executor.clone(),
            BatchPolicy::new(3, Duration::from_millis(50)),
        );

        let (a, b, c) = tokio::join!(
            batcher.submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("AAPL")),
            batcher.submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("MSFT")),
            batcher.submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("NVDA")),
        );

        assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), json!({"ticker": "AAPL"}));
        assert_eq!(b.unwrap(), json!({"ticker": "MSFT"}));
        assert_eq!(c.unwrap(), json!({"ticker": "NVDA"}));
    }

    #[tokio::test]
    async fn partial_batch_flushes_when_the_timer_fires() {
        let executor = CountingExecutor::new(false);
        let batcher = batcher_with(
            executor.clone(),
            BatchPolicy::new(10, Duration::from_millis(20)),
        );

        let result = batcher
            .submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("AAPL"))
            .await;

        assert_eq!(result.unwrap(), json!({"ticker": "AAPL"}));
        assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executor_failure_fails_every_member() {
        let executor = CountingExecutor::new(true);
        let batcher = batcher_with(
            executor.clone(),
            BatchPolicy::new(2, Duration::from_millis(50)),
        );

        let (a, b) = tokio::join!(
            batcher.submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("AAPL")),
            batcher.submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("MSFT")),
        );

        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_sources_execute_immediately() {
        let executor = CountingExecutor::new(false);
        let batcher = batcher_with(executor.clone(), BatchPolicy::disabled());

        let result = batcher
            .submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("AAPL"))
            .await;

        assert_eq!(result.unwrap(), json!({"ticker": "AAPL"}));
        assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_pending_and_new_calls() {
        let executor = CountingExecutor::new(false);
        let batcher = batcher_with(
            executor.clone(),
            BatchPolicy::new(10, Duration::from_secs(5)),
        );

        let pending = {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("AAPL"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        batcher.shutdown();

        let parked = pending.await.expect("task not cancelled");
        assert!(parked.is_err());

        let rejected = batcher
            .submit(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("MSFT"))
            .await;
        assert!(rejected.is_err());
        assert_eq!(executor.invocations.load(Ordering::SeqCst), 0);
    }
}
