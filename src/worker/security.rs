//! Token security scan.
//!
//! Combines factory minting flags with holder concentration into a
//! per-token security row. Invoked best-effort from the fast-track
//! listener on pair creation; all failures are logged, never fatal.

use log::info;

use crate::chain::ChainClient;
use crate::db::models::Token;
use crate::db::Database;

pub struct SecurityScanner {
    chain: ChainClient,
    db: Database,
}

impl SecurityScanner {
    pub fn new(chain: ChainClient, db: Database) -> Self {
        Self { chain, db }
    }

    pub async fn scan(&self, token: &Token) -> anyhow::Result<()> {
        let mut creator = None;
        let mut can_change_minting_cap = None;
        let mut minting_cap = None;

        if token.denom.starts_with("factory/") {
            if let Ok(Some(factory)) = self.chain.factory_denom(&token.denom).await {
                creator = factory["creator"]
                    .as_str()
                    .or_else(|| factory["denom"]["creator"].as_str())
                    .map(str::to_string);
                can_change_minting_cap = factory["can_change_minting_cap"]
                    .as_bool()
                    .or_else(|| factory["denom"]["can_change_minting_cap"].as_bool());
                minting_cap = factory["minting_cap"]
                    .as_str()
                    .or_else(|| factory["denom"]["minting_cap"].as_str())
                    .map(str::to_string);
            }
        }

        let (top10, total) = self.db.postgres.holder_concentration(token.id).await?;
        let top10_share = if total > 0.0 { Some(top10 / total) } else { None };

        self.db
            .postgres
            .upsert_token_security(
                token.id,
                creator.as_deref(),
                can_change_minting_cap,
                minting_cap.as_deref(),
                top10_share,
            )
            .await?;

        info!(
            "Security scan stored for {} (top10 share {:?})",
            token.denom, top10_share
        );
        Ok(())
    }
}
