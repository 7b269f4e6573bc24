use std::sync::Arc;

use anyhow::Context;
use log::{error, info, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use zigdex::config::Settings;
use zigdex::cron::jobs::partitions;
use zigdex::cron::CronScheduler;
use zigdex::db::batch::{BatchQueue, BatchSettings, CandleWriter, PoolStateWriter, TradeWriter};
use zigdex::db::postgres::ops::TokenMetaPatch;
use zigdex::db::Database;
use zigdex::pubsub::PairCreatedListener;
use zigdex::worker::reserves::ReservesCache;
use zigdex::{
    BlockProcessor, ChainClient, FastTrackWorker, HoldersIndexer, MetadataResolver,
    PipelineDriver, ReservesPriceTicker, SecurityScanner,
};

#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .context("Failed to initialize logger")?;

    let settings = Arc::new(Settings::new().context("Failed to load configuration")?);
    info!("Starting zigdex indexer");

    let db = Database::new(&settings).await?;

    // Partitions must exist before the first trade lands
    partitions::run(&db, &settings).await?;
    seed_native_token(&db, &settings).await?;

    let chain = ChainClient::new(settings.rpc_endpoints(), settings.lcd_endpoints())?;
    let reserves = Arc::new(ReservesCache::new(chain.clone()));
    let metadata = Arc::new(MetadataResolver::new(
        chain.clone(),
        db.clone(),
        settings.clone(),
    ));

    let root_token = CancellationToken::new();
    let mut handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    // Batch writers with their deadline loops
    let trades = Arc::new(BatchQueue::new(
        TradeWriter::new(db.clone()),
        BatchSettings {
            max_items: settings.trades_batch_max,
            max_wait: std::time::Duration::from_millis(settings.trades_batch_wait_ms),
        },
    ));
    let pool_states = Arc::new(BatchQueue::new(
        PoolStateWriter::new(db.clone()),
        BatchSettings {
            max_items: settings.state_batch_max,
            max_wait: std::time::Duration::from_millis(settings.state_batch_wait_ms),
        },
    ));
    let candles = Arc::new(BatchQueue::new(
        CandleWriter::new(db.clone()),
        BatchSettings {
            max_items: settings.ohlcv_batch_max,
            max_wait: std::time::Duration::from_millis(settings.ohlcv_batch_wait_ms),
        },
    ));

    {
        let (t, p, c) = (trades.clone(), pool_states.clone(), candles.clone());
        let (tt, tp, tc) = (
            root_token.child_token(),
            root_token.child_token(),
            root_token.child_token(),
        );
        handles.push(tokio::spawn(async move { t.run(tt).await }));
        handles.push(tokio::spawn(async move { p.run(tp).await }));
        handles.push(tokio::spawn(async move { c.run(tc).await }));
    }

    // Block processing pipeline
    let processor = Arc::new(BlockProcessor::new(
        chain.clone(),
        db.clone(),
        settings.clone(),
        trades.clone(),
        pool_states.clone(),
        candles.clone(),
        reserves.clone(),
        metadata.clone(),
    ));
    let driver = PipelineDriver::new(processor, chain.clone(), db.clone(), settings.clone());
    {
        let token = root_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = driver.run(token).await {
                error!("Pipeline driver failed: {e:#}");
            }
        }));
    }

    // Fast-track listener (exactly one per process)
    let page_permits = Arc::new(Semaphore::new(settings.lcd_page_concurrency.max(1)));
    let holders = Arc::new(HoldersIndexer::new(
        chain.clone(),
        db.clone(),
        settings.clone(),
        page_permits.clone(),
    ));
    let security = Arc::new(SecurityScanner::new(chain.clone(), db.clone()));

    let (pair_tx, pair_rx) = mpsc::channel(256);
    let listener = PairCreatedListener::new(db.clone(), pair_tx)?;
    {
        let token = root_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = listener.run(token).await {
                error!("pair_created listener failed: {e:#}");
            }
        }));
    }

    let fast_track = FastTrackWorker::new(
        db.clone(),
        settings.clone(),
        metadata.clone(),
        holders.clone(),
        security,
        reserves.clone(),
        pair_rx,
    );
    {
        let token = root_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = fast_track.run(token).await {
                error!("Fast-track worker failed: {e:#}");
            }
        }));
    }

    // Holders sweeper
    {
        let holders = holders.clone();
        let token = root_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = holders.run(token).await {
                error!("Holders sweeper failed: {e:#}");
            }
        }));
    }

    // Price-from-reserves ticker
    let ticker = ReservesPriceTicker::new(db.clone(), settings.clone(), reserves.clone());
    {
        let token = root_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = ticker.run(token).await {
                error!("Price ticker failed: {e:#}");
            }
        }));
    }

    // Periodic metadata refresh + registry reload
    {
        let metadata = metadata.clone();
        let token = root_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = metadata.run(token).await {
                error!("Metadata refresher failed: {e:#}");
            }
        }));
    }

    // Cron jobs: rollups, FX, partitions
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;
    let cron = CronScheduler::new(db.clone(), settings.clone(), http);
    {
        let token = root_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = cron.run(token).await {
                error!("Cron scheduler failed: {e:#}");
            }
        }));
    }

    // One-shot metadata backfill
    if settings.meta_backfill {
        let metadata = metadata.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = metadata.backfill().await {
                warn!("Metadata backfill failed: {e:#}");
            }
        }));
    }

    shutdown_signal().await;
    info!("Shutdown signal received, draining...");
    root_token.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    // Writers already drained in their own shutdown paths; one more pass
    // catches anything enqueued during teardown.
    let _ = trades.drain().await;
    let _ = pool_states.drain().await;
    let _ = candles.drain().await;

    info!("zigdex stopped");
    Ok(())
}

/// Ensure the native token row exists before any worker runs.
async fn seed_native_token(db: &Database, settings: &Settings) -> anyhow::Result<()> {
    let native = &settings.native_denom;
    db.postgres.ensure_token(native, native).await?;
    db.postgres
        .merge_token_metadata(
            native,
            &TokenMetaPatch {
                name: Some("ZigChain".to_string()),
                symbol: Some("ZIG".to_string()),
                display: Some("zig".to_string()),
                exponent: Some(6),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
