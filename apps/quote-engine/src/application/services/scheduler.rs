//! Request Scheduler
//!
//! FIFO queue of outbound work drained by a single worker task. For every
//! unit the worker:
//!
//! 1. waits out the minimum spacing since the previous start,
//! 2. waits while the quota tracker denies consumption, re-checking at the
//!    window reset boundary,
//! 3. spawns the unit on its own task and moves on.
//!
//! The unit's output reaches the caller through a oneshot channel, so a slow
//! unit only holds up the queue for the pacing delay.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::clock::SharedClock;
use crate::domain::quota::{QuotaState, QuotaTracker};
use crate::infrastructure::metrics::{set_pending_requests, set_quota_remaining};

/// Default minimum delay between two unit starts.
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_secs(1);

/// Default number of units started together in a batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default pause between two sub-batches.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(250);

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Errors returned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The worker has stopped; the unit was not (or will never be) run.
    #[error("request scheduler is closed")]
    Closed,

    /// `start` was called twice.
    #[error("request scheduler already started")]
    AlreadyStarted,
}

/// Sub-batch settings for multi-symbol fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Units enqueued together.
    pub size: usize,
    /// Pause between sub-batches.
    pub pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            pause: DEFAULT_BATCH_PAUSE,
        }
    }
}

/// Quota-gated, paced FIFO executor.
pub struct RequestScheduler {
    queue_tx: mpsc::UnboundedSender<Job>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    quota: Arc<Mutex<QuotaTracker>>,
    clock: SharedClock,
    spacing: Duration,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("spacing", &self.spacing)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl RequestScheduler {
    /// Create a scheduler. Units queue up until [`start`](Self::start).
    #[must_use]
    pub fn new(quota: QuotaTracker, clock: SharedClock, spacing: Duration) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            quota: Arc::new(Mutex::new(quota)),
            clock,
            spacing,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn the worker task. It stops when `cancel` fires, dropping any
    /// queued units (their callers receive [`SchedulerError::Closed`]).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyStarted`] on a second call.
    pub fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, SchedulerError> {
        let queue_rx = self
            .queue_rx
            .lock()
            .take()
            .ok_or(SchedulerError::AlreadyStarted)?;

        let worker = Worker {
            quota: Arc::clone(&self.quota),
            clock: Arc::clone(&self.clock),
            spacing: self.spacing,
            pending: Arc::clone(&self.pending),
        };

        Ok(tokio::spawn(worker.run(queue_rx, cancel)))
    }

    /// Queue a unit of work.
    ///
    /// The unit is queued immediately (FIFO in call order); the returned
    /// future resolves with its output once it has run.
    pub fn enqueue<F, Fut, T>(
        &self,
        work: F,
    ) -> impl Future<Output = Result<T, SchedulerError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let submitted = self.submit(work);
        async move { submitted?.await.map_err(|_| SchedulerError::Closed) }
    }

    /// Queue one unit per item, in sub-batches.
    ///
    /// Each sub-batch is queued at once and awaited before the next one,
    /// with `batch.pause` in between. Results keep the input order.
    pub async fn enqueue_batch<I, F, Fut, T>(
        &self,
        items: Vec<I>,
        batch: BatchConfig,
        work: F,
    ) -> Vec<Result<T, SchedulerError>>
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let size = batch.size.max(1);
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut items = items.into_iter().peekable();

        while items.peek().is_some() {
            let chunk: Vec<_> = items
                .by_ref()
                .take(size)
                .map(|item| {
                    let work = work.clone();
                    self.enqueue(move || work(item))
                })
                .collect();

            results.extend(join_all(chunk).await);

            if results.len() < total && !batch.pause.is_zero() {
                tokio::time::sleep(batch.pause).await;
            }
        }

        results
    }

    /// Units queued but not yet started.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Current request budget.
    #[must_use]
    pub fn quota_status(&self) -> QuotaState {
        self.quota.lock().status(self.clock.now())
    }

    fn submit<F, Fut, T>(&self, work: F) -> Result<oneshot::Receiver<T>, SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let _ = result_tx.send(work().await);
            })
        });

        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        if self.queue_tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            return Err(SchedulerError::Closed);
        }
        set_pending_requests(pending);

        Ok(result_rx)
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    quota: Arc<Mutex<QuotaTracker>>,
    clock: SharedClock,
    spacing: Duration,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self, mut queue_rx: mpsc::UnboundedReceiver<Job>, cancel: CancellationToken) {
        let mut last_start: Option<Instant> = None;

        loop {
            let job = tokio::select! {
                () = cancel.cancelled() => break,
                job = queue_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            if let Some(last) = last_start {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep_until(last + self.spacing) => {}
                }
            }

            if !self.acquire_quota(&cancel).await {
                break;
            }

            let pending = self.pending.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
            set_pending_requests(pending);
            last_start = Some(Instant::now());
            tokio::spawn(job());
        }

        queue_rx.close();
        self.pending.store(0, Ordering::Relaxed);
        set_pending_requests(0);
        tracing::debug!("Request scheduler stopped");
    }

    /// Block until one request is granted. Returns `false` if cancelled.
    async fn acquire_quota(&self, cancel: &CancellationToken) -> bool {
        loop {
            let wait = {
                let mut quota = self.quota.lock();
                let now = self.clock.now();
                if quota.consume(now) {
                    set_quota_remaining(quota.status(now).remaining);
                    return true;
                }
                quota.time_until_reset(now)
            };

            tracing::debug!(wait_ms = wait.as_millis(), "Request quota exhausted, waiting for reset");

            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
            }
        }
    }
}
