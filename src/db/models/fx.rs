use chrono::{DateTime, Utc};

/// External USD/native rate sample (PostgreSQL `fx_rates`).
/// One row per minute; repeated fetches inside a minute overwrite.
#[derive(Debug, Clone)]
pub struct FxRate {
    pub ts: DateTime<Utc>,
    pub native_per_usd: f64,
}
