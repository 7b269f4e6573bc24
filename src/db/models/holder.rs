use chrono::{DateTime, Utc};

/// Balance of one address for one token (PostgreSQL `holders`).
/// Balances are BASE-unit decimal strings; stale holders are normalized to
/// "0" by the sweeper rather than deleted.
#[derive(Debug, Clone)]
pub struct Holder {
    pub token_id: i64,
    pub address: String,
    pub balance_base: String,
    pub updated_at: DateTime<Utc>,
}

/// Holder count per token (PostgreSQL `holder_stats`).
#[derive(Debug, Clone)]
pub struct HolderStats {
    pub token_id: i64,
    pub holders_count: i64,
    pub updated_at: DateTime<Utc>,
}
