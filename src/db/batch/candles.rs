use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashMap;

use crate::db::batch::BatchWriter;
use crate::db::models::{Candle, CandleTick};
use crate::db::Database;

/// OHLCV coalescing writer.
///
/// In-batch ticks aggregate per (pool, minute); one lookup then resolves
/// the previous minute's closes for all affected keys so that
/// open(m) = close(m-1) where a prior candle exists, else the minute's
/// first observed price.
pub struct CandleWriter {
    db: Database,
}

impl CandleWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Per-key aggregate before the open is resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CandleAgg {
    pub pool_id: i64,
    pub bucket_start: DateTime<Utc>,
    pub first_price: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_native: f64,
    pub trade_count: i64,
    pub liquidity: Option<f64>,
}

/// Fold ticks into per-(pool, minute) aggregates, preserving enqueue order
/// inside each key: close is the last observation, first_price the first.
pub(crate) fn aggregate_ticks(ticks: &[CandleTick]) -> Vec<CandleAgg> {
    let mut index: FxHashMap<(i64, DateTime<Utc>), usize> = FxHashMap::default();
    let mut aggs: Vec<CandleAgg> = Vec::new();

    for tick in ticks {
        let key = (tick.pool_id, tick.bucket_start);
        match index.get(&key) {
            Some(&i) => {
                let agg = &mut aggs[i];
                agg.high = agg.high.max(tick.price);
                agg.low = agg.low.min(tick.price);
                agg.close = tick.price;
                agg.volume_native += tick.volume_native;
                agg.trade_count += tick.trade_count;
                if tick.liquidity.is_some() {
                    agg.liquidity = tick.liquidity;
                }
            },
            None => {
                index.insert(key, aggs.len());
                aggs.push(CandleAgg {
                    pool_id: tick.pool_id,
                    bucket_start: tick.bucket_start,
                    first_price: tick.price,
                    high: tick.price,
                    low: tick.price,
                    close: tick.price,
                    volume_native: tick.volume_native,
                    trade_count: tick.trade_count,
                    liquidity: tick.liquidity,
                });
            },
        }
    }

    aggs
}

/// Turn an aggregate into a row, applying the prior-close rule and keeping
/// the OHLC bounds consistent (open must sit inside [low, high]).
pub(crate) fn resolve_candle(agg: &CandleAgg, prior_close: Option<f64>) -> Candle {
    let open = prior_close.unwrap_or(agg.first_price);
    Candle {
        pool_id: agg.pool_id,
        bucket_start: agg.bucket_start,
        open,
        high: agg.high.max(open),
        low: agg.low.min(open),
        close: agg.close,
        volume_native: agg.volume_native,
        trade_count: agg.trade_count,
        liquidity: agg.liquidity,
    }
}

#[async_trait]
impl BatchWriter for CandleWriter {
    type Item = CandleTick;

    fn label(&self) -> &'static str {
        "OHLCV"
    }

    async fn write_batch(&self, items: &[CandleTick]) -> Result<()> {
        let aggs = aggregate_ticks(items);
        if aggs.is_empty() {
            return Ok(());
        }

        let pool_ids: Vec<i64> = aggs.iter().map(|a| a.pool_id).collect();
        let prev_minutes: Vec<DateTime<Utc>> = aggs
            .iter()
            .map(|a| a.bucket_start - TimeDelta::minutes(1))
            .collect();

        let prior = self
            .db
            .postgres
            .prev_candle_closes(&pool_ids, &prev_minutes)
            .await?;
        let prior_map: FxHashMap<(i64, DateTime<Utc>), f64> = prior
            .into_iter()
            .map(|(pool_id, bucket_start, close)| ((pool_id, bucket_start), close))
            .collect();

        let candles: Vec<Candle> = aggs
            .iter()
            .map(|agg| {
                let prior_close = prior_map
                    .get(&(agg.pool_id, agg.bucket_start - TimeDelta::minutes(1)))
                    .copied();
                resolve_candle(agg, prior_close)
            })
            .collect();

        self.db.postgres.upsert_candles(&candles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap()
    }

    fn tick(pool_id: i64, m: u32, price: f64, volume: f64) -> CandleTick {
        CandleTick {
            pool_id,
            bucket_start: minute(m),
            price,
            volume_native: volume,
            trade_count: 1,
            liquidity: None,
        }
    }

    #[test]
    fn aggregation_folds_per_key() {
        let ticks = vec![
            tick(1, 0, 1.0, 10.0),
            tick(1, 0, 1.5, 5.0),
            tick(1, 0, 0.8, 2.0),
            tick(2, 0, 3.0, 1.0),
            tick(1, 1, 2.0, 4.0),
        ];

        let aggs = aggregate_ticks(&ticks);
        assert_eq!(aggs.len(), 3);

        let a = &aggs[0];
        assert_eq!((a.pool_id, a.bucket_start), (1, minute(0)));
        assert_eq!(a.first_price, 1.0);
        assert_eq!(a.high, 1.5);
        assert_eq!(a.low, 0.8);
        assert_eq!(a.close, 0.8);
        assert_eq!(a.volume_native, 17.0);
        assert_eq!(a.trade_count, 3);
    }

    #[test]
    fn open_is_prior_close_when_present() {
        let aggs = aggregate_ticks(&[tick(1, 1, 1.10, 0.0)]);
        let candle = resolve_candle(&aggs[0], Some(1.0));
        assert_eq!(candle.open, 1.0);
        assert_eq!(candle.close, 1.10);
        // a lower prior close widens the low bound
        assert_eq!(candle.low, 1.0);
        assert_eq!(candle.high, 1.10);
    }

    #[test]
    fn open_falls_back_to_first_price() {
        let aggs = aggregate_ticks(&[tick(1, 0, 1.0, 0.0), tick(1, 0, 1.2, 0.0)]);
        let candle = resolve_candle(&aggs[0], None);
        assert_eq!(candle.open, 1.0);
        assert_eq!(candle.high, 1.2);
        assert_eq!(candle.low, 1.0);
    }

    #[test]
    fn candle_bounds_hold() {
        let aggs = aggregate_ticks(&[tick(1, 1, 0.5, 0.0)]);
        // prior close above the whole range pushes the high up
        let candle = resolve_candle(&aggs[0], Some(0.9));
        assert!(candle.low <= candle.open && candle.open <= candle.high);
        assert!(candle.low <= candle.close && candle.close <= candle.high);
    }

    #[test]
    fn last_liquidity_observation_sticks() {
        let mut with_liq = tick(1, 0, 1.0, 0.0);
        with_liq.liquidity = Some(500.0);
        let without = tick(1, 0, 1.1, 0.0);

        let aggs = aggregate_ticks(&[with_liq, without]);
        assert_eq!(aggs[0].liquidity, Some(500.0));
    }
}
