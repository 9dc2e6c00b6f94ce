//! Batch processor with bounded concurrency and per-item progress.
//!
//! Items are split into chunks of `batch_size`. Chunks run one after another;
//! inside a chunk at most `concurrency` items are processed at once. The
//! items of a chunk are interleaved on the caller's task rather than spawned,
//! so the processor may borrow from its environment.
//!
//! Results are always returned in input order. Progress is reported once per
//! item, in completion order: the first argument counts up from 1 to the
//! total, but under concurrency > 1 the n-th report is not necessarily about
//! the n-th item.

use crate::cancellation::CancellationToken;
use crate::concurrency::ConcurrencyLimiter;
use crate::errors::{ResilienceError, ResilienceResult};
use futures::future::{join_all, try_join_all};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Progress observer: `(completed, total)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Options for one batch run.
#[derive(Clone)]
pub struct BatchOptions {
    /// Items per chunk. Always >= 1.
    pub batch_size: usize,
    /// Items processed at once inside a chunk. Always >= 1.
    pub concurrency: usize,
    on_progress: Option<ProgressCallback>,
    cancel_token: Option<Arc<CancellationToken>>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 3,
            on_progress: None,
            cancel_token: None,
        }
    }
}

impl BatchOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk size. 0 is raised to 1.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the per-chunk concurrency. 0 is raised to 1.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the progress observer.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Sets a token checked before each chunk starts.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn check_cancelled(&self) -> ResilienceResult<()> {
        match self.cancel_token {
            Some(ref token) if token.is_cancelled() => Err(ResilienceError::Cancelled(
                token.reason().unwrap_or_else(|| "batch cancelled".to_string()),
            )),
            _ => Ok(()),
        }
    }

    fn report_progress(&self, completed: usize, total: usize) {
        if let Some(ref callback) = self.on_progress {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(completed, total);
            })) {
                warn!(completed, total, "Progress callback panicked: {:?}", e);
            }
        }
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_size", &self.batch_size)
            .field("concurrency", &self.concurrency)
            .field("has_progress", &self.on_progress.is_some())
            .field("cancel_token", &self.cancel_token)
            .finish()
    }
}

struct Progress<'a> {
    options: &'a BatchOptions,
    completed: AtomicUsize,
    total: usize,
}

impl Progress<'_> {
    fn item_done(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.options.report_progress(completed, self.total);
    }
}

async fn process_item<I, O, E, F, Fut>(
    item: I,
    processor: &F,
    limiter: &ConcurrencyLimiter,
    progress: &Progress<'_>,
) -> ResilienceResult<O>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, E>>,
    E: Into<ResilienceError>,
{
    let _slot = limiter.acquire().await?;
    let result = processor(item).await.map_err(Into::into);
    progress.item_done();
    result
}

/// Processes `items` and returns the outputs in input order.
///
/// The first failure aborts the batch: items of the current chunk still in
/// flight are dropped and later chunks never start.
pub async fn process_batch<I, O, E, F, Fut>(
    items: Vec<I>,
    processor: F,
    options: &BatchOptions,
) -> ResilienceResult<Vec<O>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, E>>,
    E: Into<ResilienceError>,
{
    let total = items.len();
    let batch_size = options.batch_size.max(1);
    let limiter = ConcurrencyLimiter::new(options.concurrency);
    let progress = Progress {
        options,
        completed: AtomicUsize::new(0),
        total,
    };

    let mut results = Vec::with_capacity(total);
    let mut remaining = items.into_iter().peekable();
    let mut chunk_index = 0usize;

    while remaining.peek().is_some() {
        options.check_cancelled()?;
        let chunk: Vec<I> = remaining.by_ref().take(batch_size).collect();
        debug!(chunk = chunk_index, size = chunk.len(), total, "Processing batch chunk");

        let outputs = try_join_all(
            chunk
                .into_iter()
                .map(|item| process_item(item, &processor, &limiter, &progress)),
        )
        .await?;

        results.extend(outputs);
        chunk_index += 1;
    }

    Ok(results)
}

/// Processes every item and returns each outcome in input order.
///
/// Failures do not stop the batch. Cancellation stops it before the next
/// chunk and is returned as the overall error.
pub async fn process_batch_settled<I, O, E, F, Fut>(
    items: Vec<I>,
    processor: F,
    options: &BatchOptions,
) -> ResilienceResult<Vec<ResilienceResult<O>>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, E>>,
    E: Into<ResilienceError>,
{
    let total = items.len();
    let batch_size = options.batch_size.max(1);
    let limiter = ConcurrencyLimiter::new(options.concurrency);
    let progress = Progress {
        options,
        completed: AtomicUsize::new(0),
        total,
    };

    let mut results = Vec::with_capacity(total);
    let mut remaining = items.into_iter().peekable();

    while remaining.peek().is_some() {
        options.check_cancelled()?;
        let chunk: Vec<I> = remaining.by_ref().take(batch_size).collect();

        let outcomes = join_all(
            chunk
                .into_iter()
                .map(|item| process_item(item, &processor, &limiter, &progress)),
        )
        .await;

        let failed = outcomes.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            debug!(failed, chunk_size = outcomes.len(), "Batch chunk had failures");
        }
        results.extend(outcomes);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OperationError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_preserves_order_and_reports_each_item() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = calls.clone();
        let options = BatchOptions::new()
            .with_batch_size(2)
            .with_concurrency(2)
            .on_progress(move |done, total| c.lock().push((done, total)));

        let results = process_batch(
            vec![1, 2, 3, 4, 5],
            |n: u64| async move {
                // Later items finish first inside each chunk.
                tokio::time::sleep(Duration::from_millis(10 * (6 - n))).await;
                Ok::<_, OperationError>(n * 2)
            },
            &options,
        )
        .await;

        assert_eq!(results.ok(), Some(vec![2, 4, 6, 8, 10]));

        let calls = calls.lock().clone();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|&(_, total)| total == 5));
        let mut firsts: Vec<_> = calls.iter().map(|&(done, _)| done).collect();
        assert_eq!(firsts, vec![1, 2, 3, 4, 5]);
        firsts.sort_unstable();
        assert_eq!(firsts, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_bounds_concurrency_within_chunk() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let options = BatchOptions::new().with_batch_size(10).with_concurrency(3);

        let results = process_batch(
            (0..10).collect(),
            |n: usize| {
                let running = running.clone();
                let max_seen = max_seen.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, OperationError>(n)
                }
            },
            &options,
        )
        .await;

        assert_eq!(results.map(|r| r.len()).ok(), Some(10));
        assert_eq!(max_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let progress = Arc::new(AtomicUsize::new(0));
        let p = progress.clone();
        let options = BatchOptions::new().on_progress(move |_, _| {
            p.fetch_add(1, Ordering::SeqCst);
        });

        let results = process_batch(
            Vec::<u8>::new(),
            |n| async move { Ok::<_, OperationError>(n) },
            &options,
        )
        .await;

        assert_eq!(results.ok(), Some(vec![]));
        assert_eq!(progress.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_later_chunks() {
        let started = Arc::new(AtomicUsize::new(0));
        let options = BatchOptions::new().with_batch_size(2).with_concurrency(2);

        let results = process_batch(
            vec![1, 2, 3, 4],
            |n: u32| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if n == 2 {
                        Err(OperationError::fatal("bad item"))
                    } else {
                        Ok(n)
                    }
                }
            },
            &options,
        )
        .await;

        assert!(results.err().is_some_and(|e| e.to_string() == "bad item"));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settled_keeps_going() {
        let options = BatchOptions::new().with_batch_size(2);

        let results = process_batch_settled(
            vec![1, 2, 3],
            |n: u32| async move {
                if n == 2 {
                    Err(OperationError::fatal("bad item"))
                } else {
                    Ok(n * 10)
                }
            },
            &options,
        )
        .await
        .unwrap_or_default();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().ok(), Some(&10));
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().ok(), Some(&30));
    }

    #[tokio::test]
    async fn test_cancel_before_next_chunk() {
        let token = Arc::new(CancellationToken::new());
        let t = token.clone();
        let options = BatchOptions::new()
            .with_batch_size(1)
            .with_cancel_token(token)
            .on_progress(move |done, _| {
                if done == 2 {
                    t.cancel("user aborted");
                }
            });

        let processed = Arc::new(AtomicUsize::new(0));
        let results = process_batch(
            vec![1, 2, 3, 4],
            |n: u32| {
                let processed = processed.clone();
                async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, OperationError>(n)
                }
            },
            &options,
        )
        .await;

        assert!(matches!(results, Err(ResilienceError::Cancelled(ref r)) if r == "user aborted"));
        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_processor_may_borrow() {
        let prefix = String::from("item-");
        let options = BatchOptions::new();

        let results = process_batch(
            vec![1, 2],
            |n: u8| {
                let prefix = &prefix;
                async move { Ok::<_, OperationError>(format!("{prefix}{n}")) }
            },
            &options,
        )
        .await;

        assert_eq!(results.ok(), Some(vec!["item-1".to_string(), "item-2".to_string()]));
    }
}
