//! Pool and token matrix rollups.
//!
//! Each cycle rebuilds the rolling volume/TVL matrix per pool and the
//! price/valuation matrix per token across all buckets. The single-entity
//! variants run the same queries scoped to one id; the fast-track listener
//! uses them right after pair creation.

use anyhow::Result;
use chrono::Utc;
use log::info;
use rustc_hash::FxHashMap;

use crate::config::Settings;
use crate::db::models::{Bucket, PoolMatrixRow, TokenMatrixRow};
use crate::db::postgres::ops::{PoolTvlInputs, TokenPriceInputs};
use crate::db::Database;
use crate::utils::base_to_display;

/// When a heuristic can't resolve the exponent the chain default applies.
const DEFAULT_EXPONENT: u32 = 6;

pub async fn run(db: &Database, settings: &Settings) -> Result<()> {
    let start = std::time::Instant::now();

    let pools = refresh_pool_matrix(db, None).await?;
    let tokens = refresh_token_matrix(db, settings, None).await?;

    info!(
        "Matrix rollup complete in {:?} ({pools} pools, {tokens} tokens)",
        start.elapsed()
    );
    Ok(())
}

/// First finite, positive candidate wins; candidates are ordered by
/// preference.
pub(crate) fn select_display_price(candidates: &[Option<f64>]) -> f64 {
    candidates
        .iter()
        .flatten()
        .copied()
        .find(|p| p.is_finite() && *p > 0.0)
        .unwrap_or(0.0)
}

/// Resolve a token price from candidate A (latest Price row) and candidate
/// B (60-minute candle average).
///
/// The scale guard salvages rows where an upstream writer stored a
/// BASE-denominated price: when A is 1e5..1e7 times B on an exponent-6
/// token, A is treated as leaked BASE units and divided down.
pub(crate) fn resolve_token_price(
    a: Option<f64>,
    b: Option<f64>,
    exponent: Option<i32>,
    scale_guard: bool,
) -> f64 {
    if let (Some(a), Some(b)) = (a, b) {
        if scale_guard && b > 0.0 && exponent == Some(6) {
            let ratio = a / b;
            if (1e5..=1e7).contains(&ratio) {
                return a / 1e6;
            }
        }
    }
    a.or(b).filter(|p| p.is_finite() && *p > 0.0).unwrap_or(0.0)
}

/// TVL and display reserves of one pool from raw reserves and the price
/// candidates, per the documented selection order.
pub(crate) fn compute_tvl(inputs: &PoolTvlInputs) -> (f64, f64, f64) {
    let base_exp = inputs.base_exponent.map(|e| e as u32).unwrap_or(DEFAULT_EXPONENT);
    let quote_exp = inputs
        .quote_exponent
        .map(|e| e as u32)
        .unwrap_or(DEFAULT_EXPONENT);

    let reserve_base_display = inputs
        .reserve_base
        .as_deref()
        .and_then(|r| base_to_display(r, base_exp))
        .unwrap_or(0.0);
    let reserve_quote_display = inputs
        .reserve_quote
        .as_deref()
        .and_then(|r| base_to_display(r, quote_exp))
        .unwrap_or(0.0);

    let base_px = select_display_price(&[
        inputs.base_px_self,
        inputs.base_px_native,
        inputs.last_close,
    ]);
    let quote_px = if inputs.is_native_quote {
        1.0
    } else {
        select_display_price(&[inputs.quote_px_self, inputs.quote_px_native])
    };

    let tvl = reserve_quote_display * quote_px + reserve_base_display * base_px;
    (tvl, reserve_base_display, reserve_quote_display)
}

pub async fn refresh_pool_matrix(db: &Database, pool_id: Option<i64>) -> Result<usize> {
    let tvl_inputs = db.postgres.pool_tvl_inputs(pool_id).await?;
    let tvl_map: FxHashMap<i64, (f64, f64, f64)> = tvl_inputs
        .iter()
        .map(|inputs| (inputs.pool_id, compute_tvl(inputs)))
        .collect();

    let now = Utc::now();
    let mut total = 0usize;

    for bucket in Bucket::ALL {
        let aggs = db.postgres.pool_volume_aggs(bucket.minutes(), pool_id).await?;
        let rows: Vec<PoolMatrixRow> = aggs
            .iter()
            .map(|agg| {
                let divisor = if agg.is_native_quote {
                    1e6
                } else {
                    10f64.powi(agg.quote_exponent.unwrap_or(DEFAULT_EXPONENT as i32))
                };
                let vol_buy_quote = agg.buy_quote_raw / divisor;
                let vol_sell_quote = agg.sell_quote_raw / divisor;

                let quote_px = if agg.is_native_quote {
                    1.0
                } else {
                    agg.quote_price_native.unwrap_or(0.0)
                };

                let (tvl_native, reserve_base_display, reserve_quote_display) =
                    tvl_map.get(&agg.pool_id).copied().unwrap_or((0.0, 0.0, 0.0));

                PoolMatrixRow {
                    pool_id: agg.pool_id,
                    bucket: bucket.label().to_string(),
                    vol_buy_quote,
                    vol_sell_quote,
                    vol_buy_native: vol_buy_quote * quote_px,
                    vol_sell_native: vol_sell_quote * quote_px,
                    tx_buy: agg.tx_buy,
                    tx_sell: agg.tx_sell,
                    traders: agg.traders,
                    tvl_native,
                    reserve_base_display,
                    reserve_quote_display,
                    updated_at: now,
                }
            })
            .collect();

        total = total.max(rows.len());
        db.postgres.upsert_pool_matrix(&rows).await?;
    }

    Ok(total)
}

fn supply_display(supply: Option<&str>, exponent: Option<i32>) -> f64 {
    let exp = exponent.map(|e| e as u32).unwrap_or(DEFAULT_EXPONENT);
    supply.and_then(|s| base_to_display(s, exp)).unwrap_or(0.0)
}

fn token_row(inputs: &TokenPriceInputs, bucket: Bucket, settings: &Settings) -> TokenMatrixRow {
    let price = resolve_token_price(
        inputs.px_latest,
        inputs.px_avg_close,
        inputs.exponent,
        settings.price_scale_guard,
    );
    let circulating = supply_display(inputs.total_supply_base.as_deref(), inputs.exponent);
    let max = supply_display(inputs.max_supply_base.as_deref(), inputs.exponent);

    TokenMatrixRow {
        token_id: inputs.token_id,
        bucket: bucket.label().to_string(),
        price_native: price,
        market_cap_native: circulating * price,
        fdv_native: max * price,
        holders: inputs.holders,
        updated_at: Utc::now(),
    }
}

pub async fn refresh_token_matrix(
    db: &Database,
    settings: &Settings,
    token_id: Option<i64>,
) -> Result<usize> {
    let inputs = db.postgres.token_price_inputs(token_id).await?;

    let rows: Vec<TokenMatrixRow> = inputs
        .iter()
        .flat_map(|i| Bucket::ALL.iter().map(move |b| token_row(i, *b, settings)))
        .collect();

    db.postgres.upsert_token_matrix(&rows).await?;
    Ok(inputs.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tvl_inputs() -> PoolTvlInputs {
        PoolTvlInputs {
            pool_id: 1,
            is_native_quote: true,
            base_exponent: Some(6),
            quote_exponent: Some(6),
            reserve_base: Some("1000000000".to_string()),
            reserve_quote: Some("2000000".to_string()),
            base_px_self: Some(0.002),
            base_px_native: Some(0.003),
            quote_px_self: None,
            quote_px_native: None,
            last_close: Some(0.004),
        }
    }

    #[test]
    fn price_selection_prefers_earlier_candidates() {
        assert_eq!(select_display_price(&[Some(1.0), Some(2.0)]), 1.0);
        assert_eq!(select_display_price(&[None, Some(2.0)]), 2.0);
        assert_eq!(select_display_price(&[Some(0.0), Some(2.0)]), 2.0);
        assert_eq!(select_display_price(&[None, None]), 0.0);
    }

    #[test]
    fn tvl_uses_self_price_first() {
        let inputs = tvl_inputs();
        let (tvl, rb, rq) = compute_tvl(&inputs);
        // 2.0 quote display * 1.0 + 1000.0 base display * 0.002 = 4.0
        assert_eq!(rb, 1000.0);
        assert_eq!(rq, 2.0);
        assert!((tvl - 4.0).abs() < 1e-9);
    }

    #[test]
    fn tvl_falls_back_to_native_price_then_close() {
        let mut inputs = tvl_inputs();
        inputs.base_px_self = None;
        let (tvl, _, _) = compute_tvl(&inputs);
        assert!((tvl - (2.0 + 1000.0 * 0.003)).abs() < 1e-9);

        inputs.base_px_native = None;
        let (tvl, _, _) = compute_tvl(&inputs);
        assert!((tvl - (2.0 + 1000.0 * 0.004)).abs() < 1e-9);
    }

    #[test]
    fn token_price_resolution_rule() {
        // A alone
        assert_eq!(resolve_token_price(Some(0.5), None, Some(6), true), 0.5);
        // B alone
        assert_eq!(resolve_token_price(None, Some(0.7), Some(6), true), 0.7);
        // neither
        assert_eq!(resolve_token_price(None, None, Some(6), true), 0.0);
        // A preferred over B when ratio is sane
        assert_eq!(resolve_token_price(Some(0.5), Some(0.6), Some(6), true), 0.5);
    }

    #[test]
    fn scale_guard_salvages_base_denominated_prices() {
        // A is 1e6 times B on an exponent-6 token: BASE leakage
        let price = resolve_token_price(Some(500_000.0), Some(0.5), Some(6), true);
        assert!((price - 0.5).abs() < 1e-12);

        // guard off: A wins untouched
        let raw = resolve_token_price(Some(500_000.0), Some(0.5), Some(6), false);
        assert_eq!(raw, 500_000.0);

        // non-6 exponent: no salvage
        let other = resolve_token_price(Some(500_000.0), Some(0.5), Some(8), true);
        assert_eq!(other, 500_000.0);

        // ratio outside [1e5, 1e7]: no salvage
        let sane = resolve_token_price(Some(5.0), Some(0.5), Some(6), true);
        assert_eq!(sane, 5.0);
    }
}
