//! Top-level ingestion driver.
//!
//! Keeps a bounded window of heights in flight and commits strictly in
//! ascending order: a height is checkpointed only after every lower height
//! has been drained and checkpointed. Committing means draining all three
//! batch writers, then persisting the checkpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::stream::{FuturesOrdered, StreamExt};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::config::Settings;
use crate::db::Database;
use crate::worker::BlockProcessor;

/// Interval for logging progress updates (10 seconds)
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

pub struct PipelineDriver {
    processor: Arc<BlockProcessor>,
    chain: ChainClient,
    db: Database,
    settings: Arc<Settings>,
}

impl PipelineDriver {
    pub fn new(
        processor: Arc<BlockProcessor>,
        chain: ChainClient,
        db: Database,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            processor,
            chain,
            db,
            settings,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let mut next_height = match self.db.postgres.read_checkpoint().await? {
            Some(checkpoint) => checkpoint.last_height + 1,
            None => {
                let tip = self
                    .chain
                    .status()
                    .await
                    .context("No checkpoint and tip unavailable")?;
                info!("No checkpoint found, starting at chain tip {tip}");
                tip
            },
        };

        let mut processed: i64 = 0;
        let mut last_progress_log = Instant::now();

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            let target = match self.chain.status().await {
                Ok(height) => height,
                Err(e) => {
                    warn!("Chain status unavailable: {e:#}");
                    self.sleep_poll(&cancellation_token).await;
                    continue;
                },
            };

            if next_height > target {
                self.sleep_poll(&cancellation_token).await;
                continue;
            }

            // Bounded window of in-flight heights; FuturesOrdered yields
            // completions in submission order, which is exactly the commit
            // order we need.
            let depth = self.settings.pipeline_depth.max(1);
            let mut inflight = FuturesOrdered::new();

            while (next_height <= target || !inflight.is_empty())
                && !cancellation_token.is_cancelled()
            {
                while inflight.len() < depth && next_height <= target {
                    let processor = self.processor.clone();
                    let height = next_height;
                    inflight.push_back(async move {
                        (height, processor.process_height(height).await)
                    });
                    next_height += 1;
                }

                let Some((height, result)) = inflight.next().await else {
                    break;
                };
                self.commit(height, result).await?;
                processed += 1;

                if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                    info!("Synced to height {height} ({processed} blocks this run)");
                    last_progress_log = Instant::now();
                }

                if self.settings.max_blocks > 0 && processed >= self.settings.max_blocks {
                    // Finish what is already in flight, in order, then stop
                    while let Some((h, r)) = inflight.next().await {
                        self.commit(h, r).await?;
                    }
                    info!("MAX_BLOCKS ({}) reached, stopping driver", self.settings.max_blocks);
                    return Ok(());
                }
            }

            // Cancellation inside the window: commit what already finished
            if cancellation_token.is_cancelled() {
                while let Some((h, r)) = inflight.next().await {
                    self.commit(h, r).await?;
                }
                break;
            }
        }

        self.drain_writers().await?;
        info!("Pipeline driver stopped");
        Ok(())
    }

    async fn sleep_poll(&self, cancellation_token: &CancellationToken) {
        tokio::select! {
            _ = cancellation_token.cancelled() => {},
            _ = tokio::time::sleep(Duration::from_millis(self.settings.poll_sleep_ms)) => {}
        }
    }

    /// Flush all pending rows, then persist the checkpoint. A drain failure
    /// halts the driver: checkpointing past unflushed data would lose it.
    async fn commit(&self, height: i64, result: anyhow::Result<()>) -> anyhow::Result<()> {
        if let Err(e) = result {
            error!("Height {height} failed: {e:#}");
            if !self.settings.checkpoint_on_error {
                anyhow::bail!("Halting at height {height} (CHECKPOINT_ON_ERROR=false)");
            }
        }

        self.drain_writers()
            .await
            .with_context(|| format!("Drain before checkpoint {height} failed"))?;

        self.db
            .postgres
            .write_checkpoint(height)
            .await
            .with_context(|| format!("Checkpoint write for height {height} failed"))?;

        Ok(())
    }

    async fn drain_writers(&self) -> anyhow::Result<()> {
        self.processor.trades.drain().await?;
        self.processor.pool_states.drain().await?;
        self.processor.candles.drain().await?;
        Ok(())
    }
}
