//! Bounded fan-out/fan-in over a job's chunks

use crate::error::{TranscriptionError, TranscriptionResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// Result of one item
#[derive(Debug)]
pub struct ChunkOutcome {
    /// Position of the item in the submitted list
    pub index: usize,
    /// What the handler returned
    pub result: TranscriptionResult<String>,
}

/// Runs items through a handler with at most `limit` in flight
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    limit: usize,
}

impl BoundedExecutor {
    /// Executor with the given ceiling; zero is treated as one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// Concurrency ceiling
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Run every item and wait for all of them
    ///
    /// Items are queued on a closed channel drained by `min(limit, n)` tasks.
    /// A failing or panicking handler only affects its own item. Outcomes are
    /// returned in submission order.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, handler: F) -> Vec<ChunkOutcome>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TranscriptionResult<String>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let results = Arc::new(Mutex::new(BTreeMap::new()));
        let (sender, receiver) = async_channel::unbounded();
        for (index, item) in items.into_iter().enumerate() {
            if sender.try_send((index, item)).is_err() {
                results.lock().insert(
                    index,
                    Err(TranscriptionError::worker_failed("chunk queue rejected item")),
                );
            }
        }
        sender.close();

        let handler = Arc::new(handler);
        let workers = self.limit.min(total);
        debug!("Running {total} item(s) on {workers} worker(s)");

        let handles = (0..workers)
            .map(|worker| {
                let receiver = receiver.clone();
                let handler = Arc::clone(&handler);
                let results = Arc::clone(&results);

                tokio::spawn(async move {
                    while let Ok((index, item)) = receiver.recv().await {
                        let result = match tokio::spawn((*handler)(item)).await {
                            Ok(result) => result,
                            Err(e) => {
                                error!("Chunk worker {worker} lost item {index}: {e}");
                                Err(TranscriptionError::worker_failed(e.to_string()))
                            }
                        };
                        results.lock().insert(index, result);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Chunk worker task ended abnormally: {e}");
            }
        }

        let mut results = std::mem::take(&mut *results.lock());
        (0..total)
            .map(|index| ChunkOutcome {
                index,
                result: results.remove(&index).unwrap_or_else(|| {
                    Err(TranscriptionError::worker_failed("no outcome recorded"))
                }),
            })
            .collect()
    }
}
