use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexer progress checkpoint (PostgreSQL `index_state`, singleton row).
///
/// Tracks the highest fully committed height. Used to resume indexing after
/// restarts without missing or duplicating data; `last_height` is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCheckpoint {
    pub last_height: i64,
    pub updated_at: DateTime<Utc>,
}

impl IndexCheckpoint {
    pub fn new(last_height: i64) -> Self {
        Self {
            last_height,
            updated_at: Utc::now(),
        }
    }
}
