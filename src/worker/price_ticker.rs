//! Independent price ticker.
//!
//! Every cycle recomputes ZIG-quoted prices for native-quoted pools
//! straight from LCD reserves (TTL-cached, in-flight coalesced) and
//! appends a sampled tick trail. Runs next to the block processor's price
//! path; whichever writes last is freshest and wins.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::db::models::{PoolPrice, PriceTick};
use crate::db::Database;
use crate::worker::reserves::{price_from_reserves, ReservesCache};

pub struct ReservesPriceTicker {
    db: Database,
    settings: Arc<Settings>,
    reserves: Arc<ReservesCache>,
}

impl ReservesPriceTicker {
    pub fn new(db: Database, settings: Arc<Settings>, reserves: Arc<ReservesCache>) -> Self {
        Self {
            db,
            settings,
            reserves,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let interval = std::time::Duration::from_secs(self.settings.price_sim_sec);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if let Err(e) = self.tick().await {
                warn!("Price ticker cycle failed: {e:#}");
            }
        }

        info!("Price ticker stopped");
        Ok(())
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let pools = self.db.postgres.native_quoted_pools().await?;
        if pools.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let ticks: Vec<PriceTick> = futures::stream::iter(pools)
            .map(|pool| async move {
                // Unknown base exponent: cannot orient the price yet
                let token = self
                    .db
                    .postgres
                    .get_token_by_denom(&pool.base_denom)
                    .await
                    .ok()??;
                let base_exp = token.exponent? as u32;

                let live = match self.reserves.get(&pool.pair_contract).await {
                    Ok(live) => live,
                    Err(e) => {
                        warn!("Reserves fetch failed for {}: {e:#}", pool.pair_contract);
                        return None;
                    },
                };

                let price = price_from_reserves(
                    &live,
                    &pool.base_denom,
                    &pool.quote_denom,
                    base_exp,
                    6,
                )?;

                let update = PoolPrice::new(pool.base_token_id, pool.id, price, true);
                if let Err(e) = self.db.postgres.upsert_price(&update).await {
                    warn!("Price upsert failed for pool {}: {e:#}", pool.id);
                    return None;
                }

                Some(PriceTick {
                    token_id: pool.base_token_id,
                    pool_id: pool.id,
                    ts: now,
                    price_in_native: price,
                })
            })
            .buffer_unordered(self.settings.price_job_concurrency.max(1))
            .filter_map(|tick| async move { tick })
            .collect()
            .await;

        self.db.postgres.insert_price_ticks(&ticks).await?;
        Ok(())
    }
}
