use anyhow::Result;
use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::db::batch::BatchWriter;
use crate::db::models::PoolState;
use crate::db::Database;

/// Pool-state upserts, deduplicated last-wins per pool.
///
/// A multi-row UPSERT may not touch the same key twice in one statement,
/// and only the newest reserves matter anyway.
pub struct PoolStateWriter {
    db: Database,
}

impl PoolStateWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Keep the last state per pool, preserving the order in which pools were
/// first seen.
fn dedupe_last_wins(items: &[PoolState]) -> Vec<PoolState> {
    let mut index: FxHashMap<i64, usize> = FxHashMap::default();
    let mut deduped: Vec<PoolState> = Vec::with_capacity(items.len());

    for state in items {
        match index.get(&state.pool_id) {
            Some(&i) => deduped[i] = state.clone(),
            None => {
                index.insert(state.pool_id, deduped.len());
                deduped.push(state.clone());
            },
        }
    }

    deduped
}

#[async_trait]
impl BatchWriter for PoolStateWriter {
    type Item = PoolState;

    fn label(&self) -> &'static str {
        "POOL_STATE"
    }

    async fn write_batch(&self, items: &[PoolState]) -> Result<()> {
        let deduped = dedupe_last_wins(items);
        self.db.postgres.set_pool_states(&deduped).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pool_id: i64, base: &str) -> PoolState {
        PoolState::new(pool_id, base.to_string(), "1".to_string())
    }

    #[test]
    fn last_state_wins_per_pool() {
        let items = vec![
            state(1, "100"),
            state(2, "200"),
            state(1, "150"),
            state(1, "175"),
        ];

        let deduped = dedupe_last_wins(&items);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].pool_id, 1);
        assert_eq!(deduped[0].reserve_base, "175");
        assert_eq!(deduped[1].pool_id, 2);
        assert_eq!(deduped[1].reserve_base, "200");
    }

    #[test]
    fn empty_batch_is_empty() {
        assert!(dedupe_last_wins(&[]).is_empty());
    }
}
