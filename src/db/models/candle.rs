use chrono::{DateTime, Utc};

/// One OHLCV row (PostgreSQL `ohlcv_1m`, partitioned monthly).
///
/// Invariants per row: low <= open, close <= high; volume and trade_count
/// are non-negative. For consecutive minutes of the same pool,
/// open(m) == close(m-1).
#[derive(Debug, Clone)]
pub struct Candle {
    pub pool_id: i64,
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_native: f64,
    pub trade_count: i64,
    pub liquidity: Option<f64>,
}

/// A single price observation to be folded into a minute candle.
///
/// `bucket_start` must already be minute-floored. `trade_count` is 0 for
/// seeding observations (initial candle on pair creation) and 1 for swaps.
#[derive(Debug, Clone)]
pub struct CandleTick {
    pub pool_id: i64,
    pub bucket_start: DateTime<Utc>,
    pub price: f64,
    pub volume_native: f64,
    pub trade_count: i64,
    pub liquidity: Option<f64>,
}
