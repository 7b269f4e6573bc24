use anyhow::Result;
use async_trait::async_trait;

use crate::db::batch::BatchWriter;
use crate::db::models::Trade;
use crate::db::Database;

/// Multi-row trade inserts with conflict-ignore on the natural key.
pub struct TradeWriter {
    db: Database,
}

impl TradeWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BatchWriter for TradeWriter {
    type Item = Trade;

    fn label(&self) -> &'static str {
        "TRADES"
    }

    async fn write_batch(&self, items: &[Trade]) -> Result<()> {
        self.db.postgres.insert_trades(items).await
    }
}
