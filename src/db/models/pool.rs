use chrono::{DateTime, Utc};

/// AMM pair flavor as reported by the factory's `create_pair` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairType {
    Xyk,
    Concentrated,
    CustomConcentrated,
}

impl PairType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairType::Xyk => "xyk",
            PairType::Concentrated => "concentrated",
            PairType::CustomConcentrated => "custom-concentrated",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "concentrated" => PairType::Concentrated,
            "custom-concentrated" => PairType::CustomConcentrated,
            _ => PairType::Xyk,
        }
    }
}

/// AMM pair metadata (PostgreSQL `pools`).
///
/// Primary Key: id. Unique on pair_contract.
/// Created by the block processor on `create_pair`, rarely mutated after.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Pool {
    pub id: i64,
    pub pair_contract: String,

    pub base_token_id: i64,
    pub quote_token_id: i64,
    // Denormalized denoms so hot paths skip a token lookup
    pub base_denom: String,
    pub quote_denom: String,

    pub lp_denom: Option<String>,
    pub pair_type: String,
    /// True iff the quote denom equals the chain's native denom.
    pub is_native_quote: bool,

    pub factory_addr: String,
    pub router_addr: Option<String>,

    pub created_height: i64,
    pub created_tx: Option<String>,
    pub creator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Latest raw reserves per pool (PostgreSQL `pool_state`, one row per pool).
/// Reserves are BASE-unit decimal strings.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub pool_id: i64,
    pub reserve_base: String,
    pub reserve_quote: String,
    pub updated_at: DateTime<Utc>,
}

impl PoolState {
    pub fn new(pool_id: i64, reserve_base: String, reserve_quote: String) -> Self {
        Self {
            pool_id,
            reserve_base,
            reserve_quote,
            updated_at: Utc::now(),
        }
    }
}
