//! Fast-track seeding on pair creation.
//!
//! Consumes `pair_created` notifications and, best-effort and
//! independently, refreshes metadata, holders, the security scan, the
//! matrices, and seeds the initial price and 1-minute candle. Every step
//! logs failures and continues; nothing here is fatal to the pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::cron::jobs::rollup_matrices;
use crate::db::models::{Candle, Pool, PoolPrice, Token};
use crate::db::Database;
use crate::pubsub::PairCreatedEvent;
use crate::utils::{base_to_display, minute_floor, validate_positive_price};
use crate::worker::holders::SweepOutcome;
use crate::worker::reserves::price_from_reserves;
use crate::worker::{HoldersIndexer, MetadataResolver, ReservesCache, SecurityScanner};

/// Initial price from the first provide-liquidity reserves:
/// (quote_raw / 10^quote_exp) / (base_raw / 10^base_exp).
pub(crate) fn seed_price(
    reserve_base: &str,
    reserve_quote: &str,
    base_exponent: u32,
    quote_exponent: u32,
) -> Option<f64> {
    let base = base_to_display(reserve_base, base_exponent)?;
    let quote = base_to_display(reserve_quote, quote_exponent)?;
    if base <= 0.0 || quote <= 0.0 {
        return None;
    }
    validate_positive_price(quote / base)
}

/// Flat candle seeded at pair creation: zero volume, zero trades.
pub(crate) fn seed_candle(pool_id: i64, at: DateTime<Utc>, price: f64) -> Candle {
    Candle {
        pool_id,
        bucket_start: minute_floor(at),
        open: price,
        high: price,
        low: price,
        close: price,
        volume_native: 0.0,
        trade_count: 0,
        liquidity: None,
    }
}

pub struct FastTrackWorker {
    db: Database,
    settings: Arc<Settings>,
    metadata: Arc<MetadataResolver>,
    holders: Arc<HoldersIndexer>,
    security: Arc<SecurityScanner>,
    reserves: Arc<ReservesCache>,
    receiver: mpsc::Receiver<PairCreatedEvent>,
}

impl FastTrackWorker {
    pub fn new(
        db: Database,
        settings: Arc<Settings>,
        metadata: Arc<MetadataResolver>,
        holders: Arc<HoldersIndexer>,
        security: Arc<SecurityScanner>,
        reserves: Arc<ReservesCache>,
        receiver: mpsc::Receiver<PairCreatedEvent>,
    ) -> Self {
        Self {
            db,
            settings,
            metadata,
            holders,
            security,
            reserves,
            receiver,
        }
    }

    pub async fn run(mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,

                event = self.receiver.recv() => {
                    let Some(event) = event else { break };
                    info!("Fast-track seeding pool {} ({})", event.pool_id, event.pair_contract);
                    self.handle(&event).await;
                }
            }
        }

        info!("Fast-track listener stopped");
        Ok(())
    }

    async fn handle(&self, event: &PairCreatedEvent) {
        let pool = match self.db.postgres.get_pool_by_id(event.pool_id).await {
            Ok(Some(pool)) => pool,
            Ok(None) => {
                warn!("pair_created for unknown pool {}", event.pool_id);
                return;
            },
            Err(e) => {
                warn!("Pool load failed for {}: {e:#}", event.pool_id);
                return;
            },
        };

        for denom in [&pool.base_denom, &pool.quote_denom] {
            if let Err(e) = self.metadata.refresh(denom).await {
                warn!("Fast-track metadata refresh failed for {denom}: {e:#}");
            }
        }

        let base = self.load_token(pool.base_token_id).await;
        let quote = self.load_token(pool.quote_token_id).await;

        for token in [&base, &quote].into_iter().flatten() {
            if token.denom != self.settings.native_denom {
                self.refresh_holders_with_retry(token).await;
            }
        }

        if let Some(base) = &base {
            if let Err(e) = self.security.scan(base).await {
                warn!("Security scan failed for {}: {e:#}", base.denom);
            }
        }
        if let Some(quote) = &quote {
            if quote.denom != self.settings.native_denom {
                if let Err(e) = self.security.scan(quote).await {
                    warn!("Security scan failed for {}: {e:#}", quote.denom);
                }
            }
        }

        if let Err(e) = rollup_matrices::refresh_pool_matrix(&self.db, Some(pool.id)).await {
            warn!("Fast-track pool matrix refresh failed: {e:#}");
        }
        for token_id in [pool.base_token_id, pool.quote_token_id] {
            if let Err(e) =
                rollup_matrices::refresh_token_matrix(&self.db, &self.settings, Some(token_id))
                    .await
            {
                warn!("Fast-track token matrix refresh failed: {e:#}");
            }
        }

        if pool.is_native_quote {
            if let Err(e) = self.seed_initial_price(&pool, base.as_ref(), quote.as_ref()).await {
                warn!("Initial price seed failed for pool {}: {e:#}", pool.id);
            }
        }
    }

    async fn load_token(&self, token_id: i64) -> Option<Token> {
        match self.db.postgres.get_token_by_id(token_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Token load failed for {token_id}: {e:#}");
                None
            },
        }
    }

    /// Holder sets can lag right after creation; one retry covers the
    /// common empty-first-page case.
    async fn refresh_holders_with_retry(&self, token: &Token) {
        for attempt in 0..2 {
            match self.holders.refresh_holders(token).await {
                Ok(SweepOutcome::Refreshed(0)) if attempt == 0 => continue,
                Ok(_) => return,
                Err(e) => {
                    warn!("Fast-track holder refresh failed for {}: {e:#}", token.denom);
                    return;
                },
            }
        }
    }

    /// Prefer the first provide-liquidity trade; fall back to live LCD
    /// reserves at the pair creation time.
    async fn seed_initial_price(
        &self,
        pool: &Pool,
        base: Option<&Token>,
        quote: Option<&Token>,
    ) -> anyhow::Result<()> {
        let Some(base_exp) = base.and_then(|t| t.exponent) else {
            // Exponent unknown even after the refresh; the block processor
            // will price the pool once metadata resolves.
            return Ok(());
        };
        let base_exp = base_exp as u32;
        let quote_exp = quote.and_then(|t| t.exponent).unwrap_or(6) as u32;

        if let Some(trade) = self.db.postgres.first_provide_trade(pool.id).await? {
            if let (Some(reserve_base), Some(reserve_quote)) =
                (&trade.reserve_base_base, &trade.reserve_quote_base)
            {
                if let Some(price) = seed_price(reserve_base, reserve_quote, base_exp, quote_exp) {
                    self.write_seed(pool, price, trade.created_at).await?;
                    return Ok(());
                }
            }
        }

        let live = self.reserves.get(&pool.pair_contract).await?;
        if let Some(price) =
            price_from_reserves(&live, &pool.base_denom, &pool.quote_denom, base_exp, quote_exp)
        {
            self.write_seed(pool, price, pool.created_at).await?;
        }

        Ok(())
    }

    async fn write_seed(&self, pool: &Pool, price: f64, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.db
            .postgres
            .upsert_price(&PoolPrice::new(pool.base_token_id, pool.id, price, true))
            .await?;
        self.db
            .postgres
            .upsert_candles(&[seed_candle(pool.id, at, price)])
            .await?;
        info!("Seeded initial price {price} for pool {}", pool.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn seed_price_from_first_provide() {
        // 1000 TKN display vs 2 ZIG display -> 0.002
        let price = seed_price("1000000000", "2000000", 6, 6).unwrap();
        assert!((price - 0.002).abs() < 1e-12);
    }

    #[test]
    fn seed_price_requires_positive_reserves() {
        assert_eq!(seed_price("0", "2000000", 6, 6), None);
        assert_eq!(seed_price("1000000000", "0", 6, 6), None);
        assert_eq!(seed_price("garbage", "2000000", 6, 6), None);
    }

    #[test]
    fn seed_candle_is_flat_and_minute_aligned() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        let candle = seed_candle(7, at, 0.002);
        assert_eq!(
            candle.bucket_start,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(candle.open, 0.002);
        assert_eq!(candle.high, 0.002);
        assert_eq!(candle.low, 0.002);
        assert_eq!(candle.close, 0.002);
        assert_eq!(candle.volume_native, 0.0);
        assert_eq!(candle.trade_count, 0);
    }
}
