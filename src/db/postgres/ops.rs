use chrono::{DateTime, Utc};
use log::error;

use crate::db::models::{
    Candle, FxRate, Holder, HolderStats, IndexCheckpoint, Pool, PoolMatrixRow, PoolPrice,
    PoolState, PriceTick, Token, TokenMatrixRow, Trade, TradeAction, TradeDirection,
};
use crate::db::postgres::PostgresClient;

/// Token names and symbols come straight from chain metadata and can
/// carry NUL bytes, which PostgreSQL TEXT columns reject. Drop them
/// before binding.
fn strip_nul(s: &str) -> String {
    s.chars().filter(|c| *c != '\0').collect()
}

/// Build `($1, $2, ...), ($n+1, ...)` placeholder clauses for a multi-row
/// VALUES insert.
fn values_clauses(rows: usize, cols_per_row: usize) -> String {
    (0..rows)
        .map(|i| {
            let start = i * cols_per_row + 1;
            let placeholders: Vec<String> =
                (start..start + cols_per_row).map(|n| format!("${n}")).collect();
            format!("({})", placeholders.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Discretionary token fields produced by the metadata resolver. Null
/// fields leave the stored value untouched.
#[derive(Debug, Default, Clone)]
pub struct TokenMetaPatch {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub display: Option<String>,
    pub exponent: Option<i32>,
    pub image: Option<String>,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
    pub description: Option<String>,
}

/// Per-pool swap aggregate for one rollup bucket, joined with the pool
/// context needed for unit conversion.
#[derive(Debug, Clone)]
pub struct PoolVolumeAgg {
    pub pool_id: i64,
    pub is_native_quote: bool,
    pub quote_exponent: Option<i32>,
    /// Latest price of the quote token across native-quoted pools.
    pub quote_price_native: Option<f64>,
    pub buy_quote_raw: f64,
    pub sell_quote_raw: f64,
    pub tx_buy: i64,
    pub tx_sell: i64,
    pub traders: i64,
}

/// Per-pool inputs for the TVL computation: raw reserves, exponents, and
/// the price candidates the selection rule chooses from.
#[derive(Debug, Clone)]
pub struct PoolTvlInputs {
    pub pool_id: i64,
    pub is_native_quote: bool,
    pub base_exponent: Option<i32>,
    pub quote_exponent: Option<i32>,
    pub reserve_base: Option<String>,
    pub reserve_quote: Option<String>,
    pub base_px_self: Option<f64>,
    pub base_px_native: Option<f64>,
    pub quote_px_self: Option<f64>,
    pub quote_px_native: Option<f64>,
    pub last_close: Option<f64>,
}

/// Per-token inputs for the token matrix.
#[derive(Debug, Clone)]
pub struct TokenPriceInputs {
    pub token_id: i64,
    pub exponent: Option<i32>,
    /// Candidate A: latest Price row across native-quoted pools.
    pub px_latest: Option<f64>,
    /// Candidate B: 60-minute average candle close across native-quoted
    /// pools where this token is base.
    pub px_avg_close: Option<f64>,
    pub max_supply_base: Option<String>,
    pub total_supply_base: Option<String>,
    pub holders: i64,
}

fn row_to_token(row: &tokio_postgres::Row) -> Token {
    Token {
        id: row.get("id"),
        denom: row.get("denom"),
        kind: row.get("kind"),
        name: row.get("name"),
        symbol: row.get("symbol"),
        display: row.get("display"),
        image: row.get("image"),
        website: row.get("website"),
        twitter: row.get("twitter"),
        telegram: row.get("telegram"),
        description: row.get("description"),
        exponent: row.get("exponent"),
        max_supply_base: row.get("max_supply_base"),
        total_supply_base: row.get("total_supply_base"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_pool(row: &tokio_postgres::Row) -> Pool {
    Pool {
        id: row.get("id"),
        pair_contract: row.get("pair_contract"),
        base_token_id: row.get("base_token_id"),
        quote_token_id: row.get("quote_token_id"),
        base_denom: row.get("base_denom"),
        quote_denom: row.get("quote_denom"),
        lp_denom: row.get("lp_denom"),
        pair_type: row.get("pair_type"),
        is_native_quote: row.get("is_native_quote"),
        factory_addr: row.get("factory_addr"),
        router_addr: row.get("router_addr"),
        created_height: row.get("created_height"),
        created_tx: row.get("created_tx"),
        creator: row.get("creator"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_trade(row: &tokio_postgres::Row) -> Trade {
    let action: String = row.get("action");
    let direction: String = row.get("direction");
    Trade {
        created_at: row.get("created_at"),
        tx_hash: row.get("tx_hash"),
        pool_id: row.get("pool_id"),
        msg_index: row.get("msg_index"),
        action: match action.as_str() {
            "provide" => TradeAction::Provide,
            "withdraw" => TradeAction::Withdraw,
            _ => TradeAction::Swap,
        },
        direction: match direction.as_str() {
            "buy" => TradeDirection::Buy,
            "provide" => TradeDirection::Provide,
            "withdraw" => TradeDirection::Withdraw,
            _ => TradeDirection::Sell,
        },
        offer_denom: row.get("offer_denom"),
        ask_denom: row.get("ask_denom"),
        offer_amount_base: row.get("offer_amount_base"),
        return_amount_base: row.get("return_amount_base"),
        reserve_base_base: row.get("reserve_base_base"),
        reserve_quote_base: row.get("reserve_quote_base"),
        height: row.get("height"),
        signer: row.get("signer"),
        is_router: row.get("is_router"),
    }
}

impl PostgresClient {
    // ==================== TOKENS ====================

    /// Get or create the token row for a denom; new denoms get a minimal
    /// stub, to be enriched by the metadata resolver.
    pub async fn ensure_token(&self, denom: &str, native_denom: &str) -> anyhow::Result<Token> {
        let stub = Token::stub(denom, native_denom);
        let client = self.pool.get().await?;

        let query = r#"
            INSERT INTO tokens (denom, kind, exponent, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (denom) DO NOTHING
        "#;
        client
            .execute(query, &[&stub.denom, &stub.kind, &stub.exponent])
            .await?;

        let row = client
            .query_one(
                "SELECT id, denom, kind, name, symbol, display, image, website, twitter,
                        telegram, description, exponent, max_supply_base, total_supply_base,
                        updated_at
                 FROM tokens WHERE denom = $1",
                &[&denom],
            )
            .await?;
        Ok(row_to_token(&row))
    }

    pub async fn get_token_by_denom(&self, denom: &str) -> anyhow::Result<Option<Token>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, denom, kind, name, symbol, display, image, website, twitter,
                        telegram, description, exponent, max_supply_base, total_supply_base,
                        updated_at
                 FROM tokens WHERE denom = $1",
                &[&denom],
            )
            .await?;
        Ok(row.as_ref().map(row_to_token))
    }

    pub async fn get_token_by_id(&self, token_id: i64) -> anyhow::Result<Option<Token>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, denom, kind, name, symbol, display, image, website, twitter,
                        telegram, description, exponent, max_supply_base, total_supply_base,
                        updated_at
                 FROM tokens WHERE id = $1",
                &[&token_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_token))
    }

    /// Merge resolver output into a token row. Patch fields that are null
    /// leave the stored value untouched, so a failed upstream lookup never
    /// clobbers curated data.
    pub async fn merge_token_metadata(
        &self,
        denom: &str,
        patch: &TokenMetaPatch,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE tokens SET
                kind = COALESCE($2, kind),
                name = COALESCE($3, name),
                symbol = COALESCE($4, symbol),
                display = COALESCE($5, display),
                exponent = COALESCE($6, exponent),
                image = COALESCE($7, image),
                website = COALESCE($8, website),
                twitter = COALESCE($9, twitter),
                telegram = COALESCE($10, telegram),
                description = COALESCE($11, description),
                updated_at = NOW()
            WHERE denom = $1
        "#;

        let name = patch.name.as_deref().map(strip_nul);
        let symbol = patch.symbol.as_deref().map(strip_nul);
        let description = patch.description.as_deref().map(strip_nul);

        client
            .execute(
                query,
                &[
                    &denom,
                    &patch.kind,
                    &name,
                    &symbol,
                    &patch.display,
                    &patch.exponent,
                    &patch.image,
                    &patch.website,
                    &patch.twitter,
                    &patch.telegram,
                    &description,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to merge metadata for {denom}: {e:?}");
                e
            })?;
        Ok(())
    }

    pub async fn update_token_supply(
        &self,
        denom: &str,
        max_supply_base: Option<&str>,
        total_supply_base: Option<&str>,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE tokens SET
                    max_supply_base = COALESCE($2, max_supply_base),
                    total_supply_base = COALESCE($3, total_supply_base),
                    updated_at = NOW()
                WHERE denom = $1
                "#,
                &[&denom, &max_supply_base, &total_supply_base],
            )
            .await?;
        Ok(())
    }

    /// Tokens whose metadata is the stalest, regardless of completeness.
    pub async fn stalest_tokens(&self, limit: i64) -> anyhow::Result<Vec<Token>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, denom, kind, name, symbol, display, image, website, twitter,
                        telegram, description, exponent, max_supply_base, total_supply_base,
                        updated_at
                 FROM tokens
                 ORDER BY updated_at ASC NULLS FIRST
                 LIMIT $1",
                &[&limit],
            )
            .await?;
        Ok(rows.iter().map(row_to_token).collect())
    }

    /// Tokens with no resolved symbol yet, oldest first (metadata backfill).
    pub async fn tokens_missing_metadata(&self, limit: i64) -> anyhow::Result<Vec<Token>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, denom, kind, name, symbol, display, image, website, twitter,
                        telegram, description, exponent, max_supply_base, total_supply_base,
                        updated_at
                 FROM tokens
                 WHERE symbol IS NULL
                 ORDER BY updated_at ASC NULLS FIRST
                 LIMIT $1",
                &[&limit],
            )
            .await?;
        Ok(rows.iter().map(row_to_token).collect())
    }

    // ==================== POOLS ====================

    /// Insert a pool discovered from a `create_pair` event.
    ///
    /// Creation fields are immutable: a replayed or spoofed event never
    /// rewrites an existing pool row.
    pub async fn upsert_pool(&self, pool: &Pool) -> anyhow::Result<i64> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO pools (
                pair_contract, base_token_id, quote_token_id, base_denom, quote_denom,
                lp_denom, pair_type, is_native_quote, factory_addr, router_addr,
                created_height, created_tx, creator, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())
            ON CONFLICT (pair_contract) DO UPDATE SET
                lp_denom = COALESCE(EXCLUDED.lp_denom, pools.lp_denom),
                updated_at = NOW()
            RETURNING id
        "#;

        let row = client
            .query_one(
                query,
                &[
                    &pool.pair_contract,
                    &pool.base_token_id,
                    &pool.quote_token_id,
                    &pool.base_denom,
                    &pool.quote_denom,
                    &pool.lp_denom,
                    &pool.pair_type,
                    &pool.is_native_quote,
                    &pool.factory_addr,
                    &pool.router_addr,
                    &pool.created_height,
                    &pool.created_tx,
                    &pool.creator,
                    &pool.created_at,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to upsert pool {}: {:?}", pool.pair_contract, e);
                e
            })?;

        Ok(row.get(0))
    }

    pub async fn get_pool_by_contract(&self, pair_contract: &str) -> anyhow::Result<Option<Pool>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, pair_contract, base_token_id, quote_token_id, base_denom,
                        quote_denom, lp_denom, pair_type, is_native_quote, factory_addr,
                        router_addr, created_height, created_tx, creator, created_at, updated_at
                 FROM pools WHERE pair_contract = $1",
                &[&pair_contract],
            )
            .await?;
        Ok(row.as_ref().map(row_to_pool))
    }

    pub async fn get_pool_by_id(&self, pool_id: i64) -> anyhow::Result<Option<Pool>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, pair_contract, base_token_id, quote_token_id, base_denom,
                        quote_denom, lp_denom, pair_type, is_native_quote, factory_addr,
                        router_addr, created_height, created_tx, creator, created_at, updated_at
                 FROM pools WHERE id = $1",
                &[&pool_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_pool))
    }

    /// Get pools by pair contract (batched, for the prefetch phase).
    pub async fn get_pools_by_contracts(
        &self,
        contracts: &[String],
    ) -> anyhow::Result<Vec<Pool>> {
        if contracts.is_empty() {
            return Ok(vec![]);
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, pair_contract, base_token_id, quote_token_id, base_denom,
                        quote_denom, lp_denom, pair_type, is_native_quote, factory_addr,
                        router_addr, created_height, created_tx, creator, created_at, updated_at
                 FROM pools WHERE pair_contract = ANY($1)",
                &[&contracts],
            )
            .await?;
        Ok(rows.iter().map(row_to_pool).collect())
    }

    pub async fn native_quoted_pools(&self) -> anyhow::Result<Vec<Pool>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, pair_contract, base_token_id, quote_token_id, base_denom,
                        quote_denom, lp_denom, pair_type, is_native_quote, factory_addr,
                        router_addr, created_height, created_tx, creator, created_at, updated_at
                 FROM pools WHERE is_native_quote",
                &[],
            )
            .await?;
        Ok(rows.iter().map(row_to_pool).collect())
    }

    // ==================== POOL STATE ====================

    /// Batch upsert of latest reserves. Items must already be deduplicated
    /// by pool_id (last-wins), otherwise the multi-row statement conflicts
    /// with itself.
    pub async fn set_pool_states(&self, states: &[PoolState]) -> anyhow::Result<()> {
        if states.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 4;
        const BATCH_SIZE: usize = 500;

        let client = self.pool.get().await?;

        for chunk in states.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO pool_state (pool_id, reserve_base, reserve_quote, updated_at)
                VALUES {}
                ON CONFLICT (pool_id) DO UPDATE SET
                    reserve_base = EXCLUDED.reserve_base,
                    reserve_quote = EXCLUDED.reserve_quote,
                    updated_at = EXCLUDED.updated_at
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for state in chunk {
                params.push(&state.pool_id);
                params.push(&state.reserve_base);
                params.push(&state.reserve_quote);
                params.push(&state.updated_at);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch upsert {} pool states: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    pub async fn get_pool_state(&self, pool_id: i64) -> anyhow::Result<Option<PoolState>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT pool_id, reserve_base, reserve_quote, updated_at
                 FROM pool_state WHERE pool_id = $1",
                &[&pool_id],
            )
            .await?;
        Ok(row.map(|r| PoolState {
            pool_id: r.get("pool_id"),
            reserve_base: r.get("reserve_base"),
            reserve_quote: r.get("reserve_quote"),
            updated_at: r.get("updated_at"),
        }))
    }

    // ==================== TRADES ====================

    /// Append-only batch insert; duplicates on the natural key are silently
    /// dropped.
    pub async fn insert_trades(&self, trades: &[Trade]) -> anyhow::Result<()> {
        if trades.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 15;
        const BATCH_SIZE: usize = 300;

        let client = self.pool.get().await?;

        for chunk in trades.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO trades (
                    created_at, tx_hash, pool_id, msg_index, action, direction,
                    offer_denom, ask_denom, offer_amount_base, return_amount_base,
                    reserve_base_base, reserve_quote_base, height, signer, is_router
                ) VALUES {}
                ON CONFLICT (created_at, tx_hash, pool_id, msg_index) DO NOTHING
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let actions: Vec<&'static str> = chunk.iter().map(|t| t.action.as_str()).collect();
            let directions: Vec<&'static str> =
                chunk.iter().map(|t| t.direction.as_str()).collect();

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for (i, trade) in chunk.iter().enumerate() {
                params.push(&trade.created_at);
                params.push(&trade.tx_hash);
                params.push(&trade.pool_id);
                params.push(&trade.msg_index);
                params.push(&actions[i]);
                params.push(&directions[i]);
                params.push(&trade.offer_denom);
                params.push(&trade.ask_denom);
                params.push(&trade.offer_amount_base);
                params.push(&trade.return_amount_base);
                params.push(&trade.reserve_base_base);
                params.push(&trade.reserve_quote_base);
                params.push(&trade.height);
                params.push(&trade.signer);
                params.push(&trade.is_router);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} trades: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    /// First provide-liquidity trade of a pool in chain order, used to seed
    /// the initial price and candle.
    pub async fn first_provide_trade(&self, pool_id: i64) -> anyhow::Result<Option<Trade>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT created_at, tx_hash, pool_id, msg_index, action, direction,
                        offer_denom, ask_denom, offer_amount_base, return_amount_base,
                        reserve_base_base, reserve_quote_base, height, signer, is_router
                 FROM trades
                 WHERE pool_id = $1 AND action = 'provide'
                 ORDER BY height ASC, msg_index ASC
                 LIMIT 1",
                &[&pool_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_trade))
    }

    // ==================== PRICES ====================

    pub async fn upsert_price(&self, price: &PoolPrice) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO prices (token_id, pool_id, price_in_native, is_pair_native, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (token_id, pool_id) DO UPDATE SET
                    price_in_native = EXCLUDED.price_in_native,
                    is_pair_native = EXCLUDED.is_pair_native,
                    updated_at = EXCLUDED.updated_at
                "#,
                &[
                    &price.token_id,
                    &price.pool_id,
                    &price.price_in_native,
                    &price.is_pair_native,
                    &price.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    "Failed to upsert price for token {} pool {}: {:?}",
                    price.token_id, price.pool_id, e
                );
                e
            })?;
        Ok(())
    }

    pub async fn insert_price_ticks(&self, ticks: &[PriceTick]) -> anyhow::Result<()> {
        if ticks.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 4;
        let client = self.pool.get().await?;

        for chunk in ticks.chunks(1000) {
            let query = format!(
                r#"
                INSERT INTO price_ticks (token_id, pool_id, ts, price_in_native)
                VALUES {}
                ON CONFLICT (ts, token_id, pool_id) DO NOTHING
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for tick in chunk {
                params.push(&tick.token_id);
                params.push(&tick.pool_id);
                params.push(&tick.ts);
                params.push(&tick.price_in_native);
            }

            client.execute(&query, &params).await?;
        }

        Ok(())
    }

    // ==================== CANDLES ====================

    /// Closing prices of the minute before each given (pool, minute) key.
    /// `prev_minutes[i]` must be `bucket_start[i] - 1 minute`.
    pub async fn prev_candle_closes(
        &self,
        pool_ids: &[i64],
        prev_minutes: &[DateTime<Utc>],
    ) -> anyhow::Result<Vec<(i64, DateTime<Utc>, f64)>> {
        if pool_ids.is_empty() {
            return Ok(vec![]);
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT c.pool_id, c.bucket_start, c.close
                FROM ohlcv_1m c
                JOIN UNNEST($1::bigint[], $2::timestamptz[]) AS k(pool_id, bucket_start)
                  ON c.pool_id = k.pool_id AND c.bucket_start = k.bucket_start
                "#,
                &[&pool_ids, &prev_minutes],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("pool_id"), r.get("bucket_start"), r.get("close")))
            .collect())
    }

    /// Multi-row candle upsert. `open` is written only on insert; on
    /// conflict high/low widen, close follows the incoming batch, and
    /// volume/trade_count accumulate.
    pub async fn upsert_candles(&self, candles: &[Candle]) -> anyhow::Result<()> {
        if candles.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 9;
        const BATCH_SIZE: usize = 400;

        let client = self.pool.get().await?;

        for chunk in candles.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO ohlcv_1m (
                    pool_id, bucket_start, open, high, low, close,
                    volume_native, trade_count, liquidity
                ) VALUES {}
                ON CONFLICT (bucket_start, pool_id) DO UPDATE SET
                    high = GREATEST(ohlcv_1m.high, EXCLUDED.high),
                    low = LEAST(ohlcv_1m.low, EXCLUDED.low),
                    close = EXCLUDED.close,
                    volume_native = ohlcv_1m.volume_native + EXCLUDED.volume_native,
                    trade_count = ohlcv_1m.trade_count + EXCLUDED.trade_count,
                    liquidity = COALESCE(EXCLUDED.liquidity, ohlcv_1m.liquidity)
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for candle in chunk {
                params.push(&candle.pool_id);
                params.push(&candle.bucket_start);
                params.push(&candle.open);
                params.push(&candle.high);
                params.push(&candle.low);
                params.push(&candle.close);
                params.push(&candle.volume_native);
                params.push(&candle.trade_count);
                params.push(&candle.liquidity);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch upsert {} candles: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== ROLLUPS ====================

    /// Swap volume aggregates over the trailing window, joined with quote
    /// token context. Every pool gets a row (zeroes when it had no swaps in
    /// the window) so rolling volumes decay instead of going stale.
    /// `pool_id` scopes the query to one pool.
    pub async fn pool_volume_aggs(
        &self,
        window_minutes: i64,
        pool_id: Option<i64>,
    ) -> anyhow::Result<Vec<PoolVolumeAgg>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                p.id AS pool_id,
                p.is_native_quote,
                qt.exponent AS quote_exponent,
                qpx.price AS quote_price_native,
                COALESCE(SUM(CASE WHEN t.direction = 'buy'
                    THEN COALESCE(t.offer_amount_base, '0')::numeric ELSE 0 END), 0)::float8
                    AS buy_quote_raw,
                COALESCE(SUM(CASE WHEN t.direction = 'sell'
                    THEN COALESCE(t.return_amount_base, '0')::numeric ELSE 0 END), 0)::float8
                    AS sell_quote_raw,
                COUNT(t.pool_id) FILTER (WHERE t.direction = 'buy') AS tx_buy,
                COUNT(t.pool_id) FILTER (WHERE t.direction = 'sell') AS tx_sell,
                COUNT(DISTINCT t.signer) AS traders
            FROM pools p
            JOIN tokens qt ON qt.id = p.quote_token_id
            LEFT JOIN trades t
              ON t.pool_id = p.id
             AND t.action = 'swap'
             AND t.created_at >= NOW() - make_interval(mins => $1::int)
            LEFT JOIN LATERAL (
                SELECT price_in_native AS price
                FROM prices
                WHERE token_id = p.quote_token_id AND is_pair_native
                ORDER BY updated_at DESC
                LIMIT 1
            ) qpx ON TRUE
            WHERE ($2::bigint IS NULL OR p.id = $2)
            GROUP BY p.id, p.is_native_quote, qt.exponent, qpx.price
        "#;

        let rows = client
            .query(query, &[&(window_minutes as i32), &pool_id])
            .await?;

        Ok(rows
            .iter()
            .map(|r| PoolVolumeAgg {
                pool_id: r.get("pool_id"),
                is_native_quote: r.get("is_native_quote"),
                quote_exponent: r.get("quote_exponent"),
                quote_price_native: r.get("quote_price_native"),
                buy_quote_raw: r.get("buy_quote_raw"),
                sell_quote_raw: r.get("sell_quote_raw"),
                tx_buy: r.get("tx_buy"),
                tx_sell: r.get("tx_sell"),
                traders: r.get("traders"),
            })
            .collect())
    }

    /// TVL inputs for every pool (or one): reserves, exponents, and price
    /// candidates in preference order.
    pub async fn pool_tvl_inputs(&self, pool_id: Option<i64>) -> anyhow::Result<Vec<PoolTvlInputs>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                p.id AS pool_id,
                p.is_native_quote,
                bt.exponent AS base_exponent,
                qt.exponent AS quote_exponent,
                ps.reserve_base,
                ps.reserve_quote,
                bself.price AS base_px_self,
                bany.price AS base_px_native,
                qself.price AS quote_px_self,
                qany.price AS quote_px_native,
                lc.close AS last_close
            FROM pools p
            JOIN tokens bt ON bt.id = p.base_token_id
            JOIN tokens qt ON qt.id = p.quote_token_id
            LEFT JOIN pool_state ps ON ps.pool_id = p.id
            LEFT JOIN LATERAL (
                SELECT price_in_native AS price FROM prices
                WHERE token_id = p.base_token_id AND pool_id = p.id
            ) bself ON TRUE
            LEFT JOIN LATERAL (
                SELECT price_in_native AS price FROM prices
                WHERE token_id = p.base_token_id AND is_pair_native
                ORDER BY updated_at DESC LIMIT 1
            ) bany ON TRUE
            LEFT JOIN LATERAL (
                SELECT price_in_native AS price FROM prices
                WHERE token_id = p.quote_token_id AND pool_id = p.id
            ) qself ON TRUE
            LEFT JOIN LATERAL (
                SELECT price_in_native AS price FROM prices
                WHERE token_id = p.quote_token_id AND is_pair_native
                ORDER BY updated_at DESC LIMIT 1
            ) qany ON TRUE
            LEFT JOIN LATERAL (
                SELECT close FROM ohlcv_1m
                WHERE pool_id = p.id
                ORDER BY bucket_start DESC LIMIT 1
            ) lc ON TRUE
            WHERE ($1::bigint IS NULL OR p.id = $1)
        "#;

        let rows = client.query(query, &[&pool_id]).await?;
        Ok(rows
            .iter()
            .map(|r| PoolTvlInputs {
                pool_id: r.get("pool_id"),
                is_native_quote: r.get("is_native_quote"),
                base_exponent: r.get("base_exponent"),
                quote_exponent: r.get("quote_exponent"),
                reserve_base: r.get("reserve_base"),
                reserve_quote: r.get("reserve_quote"),
                base_px_self: r.get("base_px_self"),
                base_px_native: r.get("base_px_native"),
                quote_px_self: r.get("quote_px_self"),
                quote_px_native: r.get("quote_px_native"),
                last_close: r.get("last_close"),
            })
            .collect())
    }

    /// Price candidates, supply and holder counts per token (or one).
    pub async fn token_price_inputs(
        &self,
        token_id: Option<i64>,
    ) -> anyhow::Result<Vec<TokenPriceInputs>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                tk.id AS token_id,
                tk.exponent,
                a.price AS px_latest,
                b.avg_close AS px_avg_close,
                tk.max_supply_base,
                tk.total_supply_base,
                COALESCE(h.holders, 0) AS holders
            FROM tokens tk
            LEFT JOIN LATERAL (
                SELECT price_in_native AS price FROM prices
                WHERE token_id = tk.id AND is_pair_native
                ORDER BY updated_at DESC LIMIT 1
            ) a ON TRUE
            LEFT JOIN LATERAL (
                SELECT AVG(c.close) AS avg_close
                FROM ohlcv_1m c
                JOIN pools p ON p.id = c.pool_id
                WHERE p.base_token_id = tk.id
                  AND p.is_native_quote
                  AND c.bucket_start >= NOW() - make_interval(mins => 60)
            ) b ON TRUE
            LEFT JOIN LATERAL (
                SELECT COUNT(*) AS holders FROM holders
                WHERE token_id = tk.id AND balance_base::numeric > 0
            ) h ON TRUE
            WHERE ($1::bigint IS NULL OR tk.id = $1)
        "#;

        let rows = client.query(query, &[&token_id]).await?;
        Ok(rows
            .iter()
            .map(|r| TokenPriceInputs {
                token_id: r.get("token_id"),
                exponent: r.get("exponent"),
                px_latest: r.get("px_latest"),
                px_avg_close: r.get("px_avg_close"),
                max_supply_base: r.get("max_supply_base"),
                total_supply_base: r.get("total_supply_base"),
                holders: r.get("holders"),
            })
            .collect())
    }

    pub async fn upsert_pool_matrix(&self, rows: &[PoolMatrixRow]) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 13;
        let client = self.pool.get().await?;

        for chunk in rows.chunks(300) {
            let query = format!(
                r#"
                INSERT INTO pool_matrix (
                    pool_id, bucket, vol_buy_quote, vol_sell_quote, vol_buy_native,
                    vol_sell_native, tx_buy, tx_sell, traders, tvl_native,
                    reserve_base_display, reserve_quote_display, updated_at
                ) VALUES {}
                ON CONFLICT (pool_id, bucket) DO UPDATE SET
                    vol_buy_quote = EXCLUDED.vol_buy_quote,
                    vol_sell_quote = EXCLUDED.vol_sell_quote,
                    vol_buy_native = EXCLUDED.vol_buy_native,
                    vol_sell_native = EXCLUDED.vol_sell_native,
                    tx_buy = EXCLUDED.tx_buy,
                    tx_sell = EXCLUDED.tx_sell,
                    traders = EXCLUDED.traders,
                    tvl_native = EXCLUDED.tvl_native,
                    reserve_base_display = EXCLUDED.reserve_base_display,
                    reserve_quote_display = EXCLUDED.reserve_quote_display,
                    updated_at = EXCLUDED.updated_at
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for row in chunk {
                params.push(&row.pool_id);
                params.push(&row.bucket);
                params.push(&row.vol_buy_quote);
                params.push(&row.vol_sell_quote);
                params.push(&row.vol_buy_native);
                params.push(&row.vol_sell_native);
                params.push(&row.tx_buy);
                params.push(&row.tx_sell);
                params.push(&row.traders);
                params.push(&row.tvl_native);
                params.push(&row.reserve_base_display);
                params.push(&row.reserve_quote_display);
                params.push(&row.updated_at);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to upsert {} pool matrix rows: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    pub async fn upsert_token_matrix(&self, rows: &[TokenMatrixRow]) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 7;
        let client = self.pool.get().await?;

        for chunk in rows.chunks(500) {
            let query = format!(
                r#"
                INSERT INTO token_matrix (
                    token_id, bucket, price_native, market_cap_native, fdv_native,
                    holders, updated_at
                ) VALUES {}
                ON CONFLICT (token_id, bucket) DO UPDATE SET
                    price_native = EXCLUDED.price_native,
                    market_cap_native = EXCLUDED.market_cap_native,
                    fdv_native = EXCLUDED.fdv_native,
                    holders = EXCLUDED.holders,
                    updated_at = EXCLUDED.updated_at
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for row in chunk {
                params.push(&row.token_id);
                params.push(&row.bucket);
                params.push(&row.price_native);
                params.push(&row.market_cap_native);
                params.push(&row.fdv_native);
                params.push(&row.holders);
                params.push(&row.updated_at);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to upsert {} token matrix rows: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== HOLDERS ====================

    /// Tokens whose holder stats are the stalest, excluding native and IBC
    /// denoms (ownership pagination is not meaningful for them).
    pub async fn stalest_holder_tokens(&self, limit: i64) -> anyhow::Result<Vec<Token>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT t.id, t.denom, t.kind, t.name, t.symbol, t.display, t.image,
                       t.website, t.twitter, t.telegram, t.description, t.exponent,
                       t.max_supply_base, t.total_supply_base, t.updated_at
                FROM tokens t
                LEFT JOIN holder_stats hs ON hs.token_id = t.id
                WHERE t.kind NOT IN ('native', 'ibc')
                ORDER BY hs.updated_at ASC NULLS FIRST
                LIMIT $1
                "#,
                &[&limit],
            )
            .await?;
        Ok(rows.iter().map(row_to_token).collect())
    }

    /// Upsert one ownership page inside a transaction.
    pub async fn upsert_holders(&self, holders: &[Holder]) -> anyhow::Result<()> {
        if holders.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 4;
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        for chunk in holders.chunks(1000) {
            let query = format!(
                r#"
                INSERT INTO holders (token_id, address, balance_base, updated_at)
                VALUES {}
                ON CONFLICT (token_id, address) DO UPDATE SET
                    balance_base = EXCLUDED.balance_base,
                    updated_at = EXCLUDED.updated_at
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for holder in chunk {
                params.push(&holder.token_id);
                params.push(&holder.address);
                params.push(&holder.balance_base);
                params.push(&holder.updated_at);
            }

            tx.execute(&query, &params).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Finish a sweep: zero balances not seen this cycle, then recount and
    /// store the holder stats. One transaction so readers never observe a
    /// half-normalized state.
    pub async fn finalize_holder_sweep(
        &self,
        token_id: i64,
        seen_addresses: &[String],
    ) -> anyhow::Result<i64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.execute(
            r#"
            UPDATE holders SET balance_base = '0', updated_at = NOW()
            WHERE token_id = $1
              AND NOT (address = ANY($2))
              AND balance_base <> '0'
            "#,
            &[&token_id, &seen_addresses],
        )
        .await?;

        let row = tx
            .query_one(
                "SELECT COUNT(*) FROM holders WHERE token_id = $1 AND balance_base::numeric > 0",
                &[&token_id],
            )
            .await?;
        let holders_count: i64 = row.get(0);

        tx.execute(
            r#"
            INSERT INTO holder_stats (token_id, holders_count, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (token_id) DO UPDATE SET
                holders_count = EXCLUDED.holders_count,
                updated_at = NOW()
            "#,
            &[&token_id, &holders_count],
        )
        .await?;

        tx.commit().await?;
        Ok(holders_count)
    }

    /// Bump updated_at without touching the count (ownership endpoint not
    /// implemented for this denom; keeps the sweep rotation fair).
    pub async fn touch_holder_stats(&self, token_id: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO holder_stats (token_id, holders_count, updated_at)
                VALUES ($1, 0, NOW())
                ON CONFLICT (token_id) DO UPDATE SET updated_at = NOW()
                "#,
                &[&token_id],
            )
            .await?;
        Ok(())
    }

    pub async fn holder_stats(&self, token_id: i64) -> anyhow::Result<Option<HolderStats>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT token_id, holders_count, updated_at FROM holder_stats WHERE token_id = $1",
                &[&token_id],
            )
            .await?;
        Ok(row.map(|r| HolderStats {
            token_id: r.get("token_id"),
            holders_count: r.get("holders_count"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Share of supply held by the ten largest positive balances, as
    /// (top10_sum, total_sum) in BASE units collapsed to f64.
    pub async fn holder_concentration(&self, token_id: i64) -> anyhow::Result<(f64, f64)> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                WITH pos AS (
                    SELECT balance_base::numeric AS b FROM holders
                    WHERE token_id = $1 AND balance_base::numeric > 0
                )
                SELECT
                    COALESCE((SELECT SUM(b) FROM (SELECT b FROM pos ORDER BY b DESC LIMIT 10) top), 0)::float8,
                    COALESCE((SELECT SUM(b) FROM pos), 0)::float8
                "#,
                &[&token_id],
            )
            .await?;
        Ok((row.get(0), row.get(1)))
    }

    // ==================== TOKEN SECURITY ====================

    pub async fn upsert_token_security(
        &self,
        token_id: i64,
        creator: Option<&str>,
        can_change_minting_cap: Option<bool>,
        minting_cap_base: Option<&str>,
        top10_share: Option<f64>,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO token_security (
                    token_id, creator, can_change_minting_cap, minting_cap_base,
                    top10_share, updated_at
                ) VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (token_id) DO UPDATE SET
                    creator = COALESCE(EXCLUDED.creator, token_security.creator),
                    can_change_minting_cap =
                        COALESCE(EXCLUDED.can_change_minting_cap, token_security.can_change_minting_cap),
                    minting_cap_base =
                        COALESCE(EXCLUDED.minting_cap_base, token_security.minting_cap_base),
                    top10_share = COALESCE(EXCLUDED.top10_share, token_security.top10_share),
                    updated_at = NOW()
                "#,
                &[
                    &token_id,
                    &creator,
                    &can_change_minting_cap,
                    &minting_cap_base,
                    &top10_share,
                ],
            )
            .await?;
        Ok(())
    }

    // ==================== INDEX CHECKPOINT ====================

    pub async fn read_checkpoint(&self) -> anyhow::Result<Option<IndexCheckpoint>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT last_height, updated_at FROM index_state WHERE id = 'block'",
                &[],
            )
            .await?;
        Ok(row.map(|r| IndexCheckpoint {
            last_height: r.get("last_height"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Persist the checkpoint. GREATEST keeps the stored height monotonic
    /// even if a stale writer races a fresher one.
    pub async fn write_checkpoint(&self, height: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO index_state (id, last_height, updated_at)
                VALUES ('block', $1, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    last_height = GREATEST(index_state.last_height, EXCLUDED.last_height),
                    updated_at = NOW()
                "#,
                &[&height],
            )
            .await
            .map_err(|e| {
                error!("Failed to write checkpoint {height}: {e:?}");
                e
            })?;
        Ok(())
    }

    // ==================== FX RATES ====================

    /// Idempotent per minute: a second fetch in the same minute overwrites.
    pub async fn upsert_fx_rate(&self, rate: &FxRate) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO fx_rates (ts, native_per_usd)
                VALUES ($1, $2)
                ON CONFLICT (ts) DO UPDATE SET native_per_usd = EXCLUDED.native_per_usd
                "#,
                &[&rate.ts, &rate.native_per_usd],
            )
            .await?;
        Ok(())
    }

    // ==================== PARTITIONS ====================

    /// Ensure the monthly child partition `<parent>_YYYY_MM` exists.
    /// Idempotent via IF NOT EXISTS; parent names come from a fixed list in
    /// the caller, never from input.
    pub async fn ensure_month_partition(
        &self,
        parent: &str,
        year: i32,
        month: u32,
    ) -> anyhow::Result<()> {
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {parent}_{year}_{month:02}
            PARTITION OF {parent}
            FOR VALUES FROM ('{year}-{month:02}-01 00:00:00+00')
                        TO ('{next_year}-{next_month:02}-01 00:00:00+00')
            "#
        );
        let client = self.pool.get().await?;
        client
            .execute(&query, &[])
            .await
            .map_err(|e| {
                error!("Failed to ensure partition {parent}_{year}_{month:02}: {e:?}");
                e
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_clauses_places_params() {
        assert_eq!(values_clauses(1, 3), "($1, $2, $3)");
        assert_eq!(values_clauses(2, 2), "($1, $2), ($3, $4)");
    }

    #[test]
    fn nul_bytes_are_stripped() {
        assert_eq!(strip_nul("ab\0c"), "abc");
        assert_eq!(strip_nul("\0"), "");
        assert_eq!(strip_nul("clean"), "clean");
    }
}
