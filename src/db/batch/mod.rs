//! Batch-coalescing writers.
//!
//! High-rate row operations are enqueued and flushed as one multi-row
//! statement when either the queue reaches `max_items`, `max_wait` elapses
//! since the first enqueue, or a caller drains explicitly. Flushes are
//! single-flight per queue.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub mod candles;
pub mod pool_state;
pub mod trades;

pub use candles::CandleWriter;
pub use pool_state::PoolStateWriter;
pub use trades::TradeWriter;

/// Retry attempts for transient database failures during a flush.
pub(crate) const DB_RETRY_ATTEMPTS: u32 = 3;

/// Linear backoff step between flush retries.
pub(crate) const DB_RETRY_STEP: Duration = Duration::from_millis(150);

/// Sink that turns a batch of items into one amortized statement.
///
/// Batches are borrowed so a transient database failure can replay the
/// same batch; every statement behind a writer is an upsert or a
/// conflict-ignoring insert, so replays are safe.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    fn label(&self) -> &'static str;

    async fn write_batch(&self, items: &[Self::Item]) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub max_items: usize,
    pub max_wait: Duration,
}

/// Coalescing queue in front of a `BatchWriter`.
pub struct BatchQueue<W: BatchWriter> {
    writer: W,
    settings: BatchSettings,
    queue: Mutex<Vec<W::Item>>,
    /// Signaled when the first item lands in an empty queue; arms the
    /// deadline timer.
    armed: Notify,
    /// Single-flight guard: overlapping flushes of one queue would race the
    /// multi-row statements against each other.
    flush_lock: tokio::sync::Mutex<()>,
}

impl<W: BatchWriter> BatchQueue<W> {
    pub fn new(writer: W, settings: BatchSettings) -> Self {
        Self {
            writer,
            settings,
            queue: Mutex::new(Vec::new()),
            armed: Notify::new(),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Enqueue one item; flushes inline when the size threshold is hit.
    pub async fn enqueue(&self, item: W::Item) {
        let should_flush = {
            let mut queue = self.queue.lock().expect("batch queue poisoned");
            queue.push(item);
            if queue.len() == 1 {
                self.armed.notify_one();
            }
            queue.len() >= self.settings.max_items
        };

        if should_flush {
            if let Err(e) = self.flush().await {
                error!("[{}] Size-triggered flush failed: {e:#}", self.writer.label());
            }
        }
    }

    /// Flush everything currently queued. Single-flight; concurrent callers
    /// serialize and the second one flushes whatever arrived meanwhile.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;

        let items = {
            let mut queue = self.queue.lock().expect("batch queue poisoned");
            std::mem::take(&mut *queue)
        };
        if items.is_empty() {
            return Ok(());
        }

        let count = items.len();
        self.write_with_retry(items).await.map_err(|e| {
            error!("[{}] Failed to flush batch of {count}: {e:#}", self.writer.label());
            e
        })
    }

    /// Explicit drain for commit points and shutdown.
    pub async fn drain(&self) -> Result<()> {
        self.flush().await
    }

    async fn write_with_retry(&self, items: Vec<W::Item>) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=DB_RETRY_ATTEMPTS {
            match self.writer.write_batch(&items).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt < DB_RETRY_ATTEMPTS {
                        log::warn!(
                            "[{}] Batch write of {} failed (attempt {attempt}/{DB_RETRY_ATTEMPTS}): {e:#}",
                            self.writer.label(),
                            items.len()
                        );
                        tokio::time::sleep(DB_RETRY_STEP * attempt).await;
                    }
                    last_error = Some(e);
                },
            }
        }
        Err(last_error.expect("retry loop ran at least once"))
    }

    /// Deadline loop: after the first enqueue into an empty queue, wait
    /// `max_wait` and flush whatever accumulated. Runs until cancellation,
    /// with a final drain on the way out.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => {
                    if let Err(e) = self.flush().await {
                        error!("[{}] Final drain failed: {e:#}", self.writer.label());
                    }
                    info!("[{}] Batch writer stopped", self.writer.label());
                    break;
                }

                _ = self.armed.notified() => {
                    tokio::time::sleep(self.settings.max_wait).await;
                    if let Err(e) = self.flush().await {
                        error!("[{}] Deadline flush failed: {e:#}", self.writer.label());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct RecordingWriter {
        batches: Arc<Mutex<Vec<Vec<i64>>>>,
    }

    #[async_trait]
    impl BatchWriter for RecordingWriter {
        type Item = i64;

        fn label(&self) -> &'static str {
            "TEST"
        }

        async fn write_batch(&self, items: &[i64]) -> Result<()> {
            self.batches
                .lock()
                .expect("test batches poisoned")
                .push(items.to_vec());
            Ok(())
        }
    }

    fn queue(max_items: usize) -> (BatchQueue<RecordingWriter>, Arc<Mutex<Vec<Vec<i64>>>>) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let writer = RecordingWriter {
            batches: batches.clone(),
        };
        let queue = BatchQueue::new(
            writer,
            BatchSettings {
                max_items,
                max_wait: Duration::from_millis(120),
            },
        );
        (queue, batches)
    }

    #[tokio::test]
    async fn size_threshold_triggers_flush() {
        let (queue, batches) = queue(3);
        for i in 0..3 {
            queue.enqueue(i).await;
        }
        let recorded = batches.lock().unwrap().clone();
        assert_eq!(recorded, vec![vec![0, 1, 2]]);
    }

    #[tokio::test]
    async fn drain_flushes_partial_batch() {
        let (queue, batches) = queue(100);
        queue.enqueue(7).await;
        queue.enqueue(8).await;
        assert!(batches.lock().unwrap().is_empty());

        queue.drain().await.unwrap();
        let recorded = batches.lock().unwrap().clone();
        assert_eq!(recorded, vec![vec![7, 8]]);

        // draining an empty queue writes nothing
        queue.drain().await.unwrap();
        assert_eq!(batches.lock().unwrap().len(), 1);
    }
}
