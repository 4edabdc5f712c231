//! Failed-intent retry queue with exponential backoff and a per-item deadline.
//!
//! Ported near-verbatim from `gridbot.retry_queue.RetryQueue`. The executor
//! is modeled as a narrow async capability (`RetryExecutor`) rather than
//! "anything callable" — it is handed sync or async closures equally well
//! since both live behind `async fn`.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::intent::{CancelIntent, PlaceLimitIntent};

#[derive(Debug, Clone)]
pub enum RetryIntent {
    Place(PlaceLimitIntent),
    Cancel(CancelIntent),
}

impl RetryIntent {
    fn kind_name(&self) -> &'static str {
        match self {
            RetryIntent::Place(_) => "PlaceLimitIntent",
            RetryIntent::Cancel(_) => "CancelIntent",
        }
    }
}

pub struct ExecResult {
    pub success: bool,
    pub error: Option<String>,
}

pub type ExecutorFuture = Pin<Box<dyn Future<Output = ExecResult> + Send>>;

/// A capability interface: given an intent, attempt to execute it.
pub trait RetryExecutor: Send + Sync {
    fn execute(&self, intent: &RetryIntent) -> ExecutorFuture;
}

struct RetryItem {
    intent: RetryIntent,
    attempt_count: u32,
    first_attempt: Instant,
    next_retry: Instant,
    last_error: String,
}

impl RetryItem {
    fn is_due(&self, now: Instant) -> bool {
        now >= self.next_retry
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_attempt)
    }
}

pub struct RetryQueueConfig {
    pub max_attempts: u32,
    pub max_elapsed: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub check_interval: Duration,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_elapsed: Duration::from_secs_f64(30.0),
            initial_backoff: Duration::from_secs_f64(1.0),
            backoff_multiplier: 2.0,
            check_interval: Duration::from_secs_f64(1.0),
        }
    }
}

pub struct RetryQueue {
    executor: Box<dyn RetryExecutor>,
    config: RetryQueueConfig,
    queue: Mutex<Vec<RetryItem>>,
    running: std::sync::atomic::AtomicBool,
}

impl RetryQueue {
    pub fn new(executor: Box<dyn RetryExecutor>, config: RetryQueueConfig) -> Self {
        Self {
            executor,
            config,
            queue: Mutex::new(Vec::new()),
            running: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn size(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Add a failed intent; its first retry attempt already happened, so
    /// `attempt_count` starts at 1.
    pub async fn add(&self, intent: RetryIntent, error: String) {
        let kind = intent.kind_name();
        let now = Instant::now();
        let item = RetryItem {
            intent,
            attempt_count: 1,
            first_attempt: now,
            next_retry: now + self.config.initial_backoff,
            last_error: error,
        };
        self.queue.lock().await.push(item);
        info!(kind, backoff = ?self.config.initial_backoff, "added to retry queue");
    }

    pub async fn clear(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let count = queue.len();
        queue.clear();
        count
    }

    /// Process all items whose `next_retry` has elapsed. Items are dropped
    /// once `attempt_count >= max_attempts` or `elapsed >= max_elapsed`.
    /// Returns the number of items that were processed (succeeded or dropped).
    pub async fn process_due(&self) -> u32 {
        let now = Instant::now();
        let mut processed = 0u32;
        let mut queue = self.queue.lock().await;
        let mut retained = Vec::with_capacity(queue.len());

        for mut item in queue.drain(..) {
            if !item.is_due(now) {
                retained.push(item);
                continue;
            }

            if item.attempt_count >= self.config.max_attempts {
                warn!(
                    kind = item.intent.kind_name(),
                    attempts = item.attempt_count,
                    last_error = %item.last_error,
                    "retry exhausted (max attempts)"
                );
                processed += 1;
                continue;
            }

            if item.elapsed(now) >= self.config.max_elapsed {
                warn!(
                    kind = item.intent.kind_name(),
                    elapsed_secs = item.elapsed(now).as_secs_f64(),
                    last_error = %item.last_error,
                    "retry exhausted (max elapsed)"
                );
                processed += 1;
                continue;
            }

            info!(
                kind = item.intent.kind_name(),
                attempt = item.attempt_count + 1,
                max_attempts = self.config.max_attempts,
                "retrying intent"
            );

            let result = self.executor.execute(&item.intent).await;
            if result.success {
                info!(kind = item.intent.kind_name(), "retry succeeded");
                processed += 1;
            } else {
                let backoff_secs =
                    self.config.initial_backoff.as_secs_f64() * self.config.backoff_multiplier.powi(item.attempt_count as i32);
                item.attempt_count += 1;
                item.last_error = result.error.unwrap_or_else(|| "unknown error".to_string());
                item.next_retry = now + Duration::from_secs_f64(backoff_secs);
                info!(kind = item.intent.kind_name(), backoff_secs, "retry failed, rescheduled");
                retained.push(item);
            }
        }

        *queue = retained;
        processed
    }

    /// Run `process_due` on `check_interval` until `stop` is called. Callers
    /// spawn this via `Arc<RetryQueue>` and keep the returned handle.
    pub async fn run_loop(self_: std::sync::Arc<Self>) -> JoinHandle<()> {
        self_.running.store(true, std::sync::atomic::Ordering::SeqCst);
        let interval = self_.config.check_interval;
        tokio::spawn(async move {
            while self_.running.load(std::sync::atomic::Ordering::SeqCst) {
                self_.process_due().await;
                sleep(interval).await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        info!("retry queue background task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::CancelReason;

    struct AlwaysFails;
    impl RetryExecutor for AlwaysFails {
        fn execute(&self, _intent: &RetryIntent) -> ExecutorFuture {
            Box::pin(async { ExecResult { success: false, error: Some("still failing".into()) } })
        }
    }

    struct AlwaysSucceeds;
    impl RetryExecutor for AlwaysSucceeds {
        fn execute(&self, _intent: &RetryIntent) -> ExecutorFuture {
            Box::pin(async { ExecResult { success: true, error: None } })
        }
    }

    fn dummy_cancel() -> RetryIntent {
        RetryIntent::Cancel(CancelIntent {
            symbol: "BTCUSDT".into(),
            order_id: 1,
            reason: CancelReason::PriceNotInGrid,
        })
    }

    #[tokio::test]
    async fn drops_item_after_max_attempts() {
        let queue = RetryQueue::new(
            Box::new(AlwaysFails),
            RetryQueueConfig { max_attempts: 1, initial_backoff: Duration::ZERO, ..Default::default() },
        );
        queue.add(dummy_cancel(), "boom".into()).await;
        assert_eq!(queue.size().await, 1);

        let processed = queue.process_due().await;
        assert_eq!(processed, 1);
        assert_eq!(queue.size().await, 0);
    }

    #[tokio::test]
    async fn successful_retry_removes_item() {
        let queue = RetryQueue::new(
            Box::new(AlwaysSucceeds),
            RetryQueueConfig { initial_backoff: Duration::ZERO, ..Default::default() },
        );
        queue.add(dummy_cancel(), "boom".into()).await;
        let processed = queue.process_due().await;
        assert_eq!(processed, 1);
        assert_eq!(queue.size().await, 0);
    }

    #[tokio::test]
    async fn not_due_items_are_retained() {
        let queue = RetryQueue::new(
            Box::new(AlwaysFails),
            RetryQueueConfig { initial_backoff: Duration::from_secs(60), ..Default::default() },
        );
        queue.add(dummy_cancel(), "boom".into()).await;
        let processed = queue.process_due().await;
        assert_eq!(processed, 0);
        assert_eq!(queue.size().await, 1);
    }
}
