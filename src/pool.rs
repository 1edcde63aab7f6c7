//! Bounded worker pool shared by every per-instance fan-out.
//!
//! Tasks run as tokio tasks gated by a semaphore, so concurrency is bounded
//! by the pool size rather than by fleet size. Results are reassembled in
//! input order regardless of completion order.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Long-lived bounded task pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `max_concurrency` tasks at once.
    ///
    /// Zero selects the host's available parallelism.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        let size = if max_concurrency == 0 {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            max_concurrency
        };
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Create a pool sized from `[pool] max_concurrency`.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.pool.max_concurrency)
    }

    /// Maximum number of concurrently running tasks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `task` once per item and return the outcomes in input order.
    ///
    /// A task that panics yields [`AppError::Pool`] at its position; other
    /// positions are unaffected.
    pub async fn run_indexed<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> Vec<Result<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let task = Arc::new(task);
        let count = items.len();
        let mut set = JoinSet::new();

        for (position, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let task = Arc::clone(&task);
            set.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => task(item).await,
                    Err(_) => Err(AppError::Pool("worker pool closed".into())),
                };
                (position, outcome)
            });
        }

        let mut slots: Vec<Option<Result<T>>> = (0..count).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, outcome)) => slots[position] = Some(outcome),
                Err(err) => warn!(%err, "pool task did not complete"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(AppError::Pool("task panicked or was aborted".into())))
            })
            .collect()
    }
}
