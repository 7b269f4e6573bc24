use chrono::{DateTime, Utc};

/// Latest scalar price per (token, pool) (PostgreSQL `prices`).
///
/// `price_in_native` is native units per one DISPLAY unit of the base
/// token. Unique on (token_id, pool_id); every update advances
/// `updated_at`.
#[derive(Debug, Clone)]
pub struct PoolPrice {
    pub token_id: i64,
    pub pool_id: i64,
    pub price_in_native: f64,
    pub is_pair_native: bool,
    pub updated_at: DateTime<Utc>,
}

impl PoolPrice {
    pub fn new(token_id: i64, pool_id: i64, price_in_native: f64, is_pair_native: bool) -> Self {
        Self {
            token_id,
            pool_id,
            price_in_native,
            is_pair_native,
            updated_at: Utc::now(),
        }
    }
}

/// Append-only sampled price trail (PostgreSQL `price_ticks`, partitioned
/// monthly).
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub token_id: i64,
    pub pool_id: i64,
    pub ts: DateTime<Utc>,
    pub price_in_native: f64,
}
