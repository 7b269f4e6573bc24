//! Token ownership sweeper.
//!
//! Every cycle picks the stalest tokens and pages through
//! `denom_owners`, throttled by a process-wide semaphore. After a full
//! sweep, balances of addresses that no longer appear are normalized to
//! zero and the holder count is recomputed in one transaction.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::config::Settings;
use crate::db::models::{Holder, Token};
use crate::db::Database;

/// Result of refreshing one token's holder set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Sweep completed; carries the resulting positive-balance count.
    Refreshed(i64),
    /// Ownership endpoint answered 501 for this denom.
    NotSupported,
}

pub struct HoldersIndexer {
    chain: ChainClient,
    db: Database,
    settings: Arc<Settings>,
    /// Bounds concurrent LCD page fetches process-wide; shared with the
    /// fast-track listener's holder refreshes.
    page_permits: Arc<Semaphore>,
}

/// Decode one denom_owners page into holder rows and the pagination key.
pub(crate) fn parse_owners_page(token_id: i64, page: &Value) -> (Vec<Holder>, Option<String>) {
    let now = Utc::now();
    let holders = page["denom_owners"]
        .as_array()
        .map(|owners| {
            owners
                .iter()
                .filter_map(|owner| {
                    let address = owner["address"].as_str()?;
                    let balance = owner["balance"]["amount"].as_str()?;
                    Some(Holder {
                        token_id,
                        address: address.to_string(),
                        balance_base: balance.to_string(),
                        updated_at: now,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let next_key = page["pagination"]["next_key"]
        .as_str()
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    (holders, next_key)
}

impl HoldersIndexer {
    pub fn new(
        chain: ChainClient,
        db: Database,
        settings: Arc<Settings>,
        page_permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            chain,
            db,
            settings,
            page_permits,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let interval = std::time::Duration::from_secs(self.settings.holders_refresh_sec);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let tokens = match self
                .db
                .postgres
                .stalest_holder_tokens(self.settings.holders_batch_size)
                .await
            {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!("Holder sweep could not pick tokens: {e:#}");
                    continue;
                },
            };

            for token in &tokens {
                if cancellation_token.is_cancelled() {
                    break;
                }
                match self.refresh_holders(token).await {
                    Ok(SweepOutcome::Refreshed(count)) => {
                        info!("Holders refreshed for {} ({count} holders)", token.denom);
                    },
                    Ok(SweepOutcome::NotSupported) => {},
                    Err(e) => warn!("Holder sweep failed for {}: {e:#}", token.denom),
                }
            }
        }

        info!("Holders sweeper stopped");
        Ok(())
    }

    /// Paginate the full ownership set of one token and normalize stale
    /// balances to zero.
    pub async fn refresh_holders(&self, token: &Token) -> anyhow::Result<SweepOutcome> {
        let mut seen: Vec<String> = Vec::new();
        let mut page_key: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = {
                let _permit = self
                    .page_permits
                    .acquire()
                    .await
                    .context("page semaphore closed")?;
                self.chain
                    .denom_owners(&token.denom, page_key.as_deref())
                    .await?
            };

            let Some(page) = page else {
                // 501: denom not supported by the ownership index. Bump
                // updated_at so the rotation stays fair.
                self.db.postgres.touch_holder_stats(token.id).await?;
                return Ok(SweepOutcome::NotSupported);
            };

            let (holders, next_key) = parse_owners_page(token.id, &page);
            seen.extend(holders.iter().map(|h| h.address.clone()));
            self.db.postgres.upsert_holders(&holders).await?;

            pages += 1;
            page_key = next_key;
            if page_key.is_none() || pages >= self.settings.max_holder_pages_per_cycle {
                break;
            }
        }

        let count = self
            .db
            .postgres
            .finalize_holder_sweep(token.id, &seen)
            .await?;
        Ok(SweepOutcome::Refreshed(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_page_parsing() {
        let page = serde_json::json!({
            "denom_owners": [
                { "address": "zig1a", "balance": { "denom": "utkn", "amount": "120" } },
                { "address": "zig1b", "balance": { "denom": "utkn", "amount": "50" } }
            ],
            "pagination": { "next_key": "bmV4dA==", "total": "0" }
        });

        let (holders, next) = parse_owners_page(9, &page);
        assert_eq!(holders.len(), 2);
        assert_eq!(holders[0].token_id, 9);
        assert_eq!(holders[0].address, "zig1a");
        assert_eq!(holders[0].balance_base, "120");
        assert_eq!(next.as_deref(), Some("bmV4dA=="));
    }

    #[test]
    fn empty_next_key_ends_pagination() {
        let page = serde_json::json!({
            "denom_owners": [],
            "pagination": { "next_key": "" }
        });
        let (holders, next) = parse_owners_page(1, &page);
        assert!(holders.is_empty());
        assert_eq!(next, None);
    }
}
