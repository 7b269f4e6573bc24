//! Per-height block processing.
//!
//! A height runs in phases: pool creations first (so same-tx liquidity
//! finds its pool), then a prefetch of pool rows touched by swaps and
//! liquidity, then the bounded core fan-out that enqueues trades, pool
//! state and candles, and finally a low-priority metadata refresh for
//! newly seen denoms.

use std::sync::{Arc, Mutex, RwLock};

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::chain::events::{
    block_time, block_txs, by_type, classify_direction, events_of_tx, msg_senders, parse_pair,
    parse_reserves_kv, tx_hash, txs_results, EventView,
};
use crate::chain::ChainClient;
use crate::config::Settings;
use crate::db::batch::{BatchQueue, CandleWriter, PoolStateWriter, TradeWriter};
use crate::db::models::{
    CandleTick, PairType, Pool, PoolPrice, PoolState, Trade, TradeAction, TradeDirection,
};
use crate::db::Database;
use crate::pubsub::PairCreatedEvent;
use crate::utils::minute_floor;
use crate::worker::metadata::MetadataResolver;
use crate::worker::reserves::{price_from_reserves, ReservesCache};

/// Pool creation extracted from a factory `create_pair` event.
#[derive(Debug, Clone)]
pub(crate) struct PoolCreation {
    pub pair: String,
    pub pair_type: String,
    pub pool_addr: String,
    pub lp_denom: Option<String>,
    pub msg_index: i32,
    pub tx_hash: String,
    pub signer: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SwapEvent {
    pub contract: String,
    pub offer_denom: String,
    pub offer_amount: Option<String>,
    pub ask_denom: Option<String>,
    pub return_amount: Option<String>,
    pub reserves: Option<String>,
    pub msg_index: i32,
    pub tx_hash: String,
    pub signer: Option<String>,
    pub is_router: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct LiquidityEvent {
    pub contract: String,
    pub withdraw: bool,
    pub asset1_denom: Option<String>,
    pub asset1_amount: Option<String>,
    pub asset2_denom: Option<String>,
    pub asset2_amount: Option<String>,
    pub msg_index: i32,
    pub tx_hash: String,
    pub signer: Option<String>,
    pub is_router: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum CoreTask {
    Swap(SwapEvent),
    Liquidity(LiquidityEvent),
}

impl CoreTask {
    fn contract(&self) -> &str {
        match self {
            CoreTask::Swap(s) => &s.contract,
            CoreTask::Liquidity(l) => &l.contract,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BlockTasks {
    pub pools: Vec<PoolCreation>,
    pub core: Vec<CoreTask>,
}

/// Scan every tx result once and bucket the events we index.
pub(crate) fn collect_tasks(
    block: &Value,
    block_results: &Value,
    factory_addr: &str,
    router_addr: Option<&str>,
) -> BlockTasks {
    let mut tasks = BlockTasks::default();

    let raw_txs = block_txs(block);
    let results = txs_results(block_results);

    for (i, result) in results.iter().enumerate() {
        // Failed txs emit no state changes
        if result["code"].as_i64().unwrap_or(0) != 0 {
            continue;
        }

        let hash = raw_txs
            .get(i)
            .and_then(|raw| tx_hash(raw))
            .unwrap_or_default();

        let events = events_of_tx(result);
        let senders = msg_senders(&events);
        let wasms = by_type(&events, "wasm");

        let is_router = router_addr
            .map(|router| wasms.iter().any(|w| w.contract() == Some(router)))
            .unwrap_or(false);

        // Instantiate events carry the freshly created contract address;
        // the last one is the pair when `register` is missing.
        let instantiated: Vec<&str> = by_type(&events, "instantiate")
            .iter()
            .filter_map(|e| e.contract())
            .collect();

        let registers: Vec<&&EventView> = wasms
            .iter()
            .filter(|w| w.contract() == Some(factory_addr) && w.attr("pair_contract_addr").is_some())
            .collect();

        let signer_for = |msg_index: i32| -> Option<String> {
            senders
                .get(&msg_index)
                .or_else(|| senders.get(&0))
                .cloned()
        };

        for ev in wasms
            .iter()
            .filter(|w| w.attr("action") == Some("create_pair"))
        {
            // Only pairs created by the configured factory are indexed
            if ev.contract() != Some(factory_addr) {
                continue;
            }
            let Some(pair) = ev.attr("pair") else {
                continue;
            };
            let msg_index = ev.msg_index().unwrap_or(0);

            let register = registers
                .iter()
                .find(|r| r.msg_index().unwrap_or(0) == msg_index)
                .or_else(|| registers.first());

            let pool_addr = register
                .and_then(|r| r.attr("pair_contract_addr"))
                .or_else(|| instantiated.last().copied());
            let Some(pool_addr) = pool_addr else {
                warn!("create_pair without register or instantiate in tx {hash}");
                continue;
            };

            tasks.pools.push(PoolCreation {
                pair: pair.to_string(),
                pair_type: PairType::from_str(ev.attr("pair_type").unwrap_or("xyk")).as_str()
                    .to_string(),
                pool_addr: pool_addr.to_string(),
                lp_denom: register
                    .and_then(|r| r.attr("lp_denom").or_else(|| r.attr("liquidity_token_addr")))
                    .map(str::to_string),
                msg_index,
                tx_hash: hash.clone(),
                signer: signer_for(msg_index),
            });
        }

        for ev in wasms.iter().filter(|w| w.attr("action") == Some("swap")) {
            let (Some(contract), Some(offer_denom)) = (ev.contract(), ev.attr("offer_asset"))
            else {
                continue;
            };
            let msg_index = ev.msg_index().unwrap_or(0);
            tasks.core.push(CoreTask::Swap(SwapEvent {
                contract: contract.to_string(),
                offer_denom: offer_denom.to_string(),
                offer_amount: ev.attr("offer_amount").map(str::to_string),
                ask_denom: ev.attr("ask_asset").map(str::to_string),
                return_amount: ev.attr_last("return_amount").map(str::to_string),
                reserves: ev.attr("reserves").map(str::to_string),
                msg_index,
                tx_hash: hash.clone(),
                signer: signer_for(msg_index),
                is_router,
            }));
        }

        for (action, withdraw) in [("provide_liquidity", false), ("withdraw_liquidity", true)] {
            for ev in wasms.iter().filter(|w| w.attr("action") == Some(action)) {
                let Some(contract) = ev.contract() else {
                    continue;
                };
                let msg_index = ev.msg_index().unwrap_or(0);
                tasks.core.push(CoreTask::Liquidity(LiquidityEvent {
                    contract: contract.to_string(),
                    withdraw,
                    asset1_denom: ev.attr("reserve_asset1_denom").map(str::to_string),
                    asset1_amount: ev.attr("reserve_asset1_amount").map(str::to_string),
                    asset2_denom: ev.attr("reserve_asset2_denom").map(str::to_string),
                    asset2_amount: ev.attr("reserve_asset2_amount").map(str::to_string),
                    msg_index,
                    tx_hash: hash.clone(),
                    signer: signer_for(msg_index),
                    is_router,
                }));
            }
        }
    }

    tasks
}

/// Align a `{denom, amount}` pair list to a pool's (base, quote) order.
pub(crate) fn align_reserves(
    assets: &[crate::chain::events::ParsedAsset],
    pool: &Pool,
) -> Option<(String, String)> {
    let base = assets.iter().find(|a| a.denom == pool.base_denom)?;
    let quote = assets.iter().find(|a| a.denom == pool.quote_denom)?;
    Some((base.amount_base.clone(), quote.amount_base.clone()))
}

pub struct BlockProcessor {
    chain: ChainClient,
    db: Database,
    settings: Arc<Settings>,
    pub trades: Arc<BatchQueue<TradeWriter>>,
    pub pool_states: Arc<BatchQueue<PoolStateWriter>>,
    pub candles: Arc<BatchQueue<CandleWriter>>,
    reserves: Arc<ReservesCache>,
    metadata: Arc<MetadataResolver>,
    /// pair contract -> pool row; written by phase 1 and the prefetch,
    /// read by phase 2.
    pool_cache: RwLock<FxHashMap<String, Arc<Pool>>>,
    /// denom -> resolved exponent (only known values are cached)
    exponent_cache: RwLock<FxHashMap<String, i32>>,
    /// denoms already sent through the metadata resolver this process
    meta_fetched: Mutex<FxHashSet<String>>,
}

impl BlockProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: ChainClient,
        db: Database,
        settings: Arc<Settings>,
        trades: Arc<BatchQueue<TradeWriter>>,
        pool_states: Arc<BatchQueue<PoolStateWriter>>,
        candles: Arc<BatchQueue<CandleWriter>>,
        reserves: Arc<ReservesCache>,
        metadata: Arc<MetadataResolver>,
    ) -> Self {
        Self {
            chain,
            db,
            settings,
            trades,
            pool_states,
            candles,
            reserves,
            metadata,
            pool_cache: RwLock::new(FxHashMap::default()),
            exponent_cache: RwLock::new(FxHashMap::default()),
            meta_fetched: Mutex::new(FxHashSet::default()),
        }
    }

    fn cached_pool(&self, contract: &str) -> Option<Arc<Pool>> {
        self.pool_cache
            .read()
            .expect("pool cache poisoned")
            .get(contract)
            .cloned()
    }

    fn cache_pool(&self, pool: Pool) -> Arc<Pool> {
        let pool = Arc::new(pool);
        self.pool_cache
            .write()
            .expect("pool cache poisoned")
            .insert(pool.pair_contract.clone(), pool.clone());
        pool
    }

    /// Exponent of a denom, if resolved. Unknown exponents are looked up
    /// each time so a later metadata refresh takes effect without
    /// invalidation.
    async fn exponent_of(&self, denom: &str) -> Option<u32> {
        if let Some(exp) = self
            .exponent_cache
            .read()
            .expect("exponent cache poisoned")
            .get(denom)
        {
            return Some(*exp as u32);
        }

        let token = self.db.postgres.get_token_by_denom(denom).await.ok()??;
        let exp = token.exponent?;
        self.exponent_cache
            .write()
            .expect("exponent cache poisoned")
            .insert(denom.to_string(), exp);
        Some(exp as u32)
    }

    /// Process one height end to end. Individual task failures are logged;
    /// an error here means the height itself could not be fetched or its
    /// pools could not be created.
    pub async fn process_height(&self, height: i64) -> anyhow::Result<()> {
        let (block, block_results) = tokio::try_join!(
            self.chain.block(height),
            self.chain.block_results(height)
        )?;

        let time = block_time(&block)
            .with_context(|| format!("Missing block time at height {height}"))?;

        let tasks = collect_tasks(
            &block,
            &block_results,
            &self.settings.factory_addr,
            self.settings.router_addr.as_deref(),
        );

        if tasks.pools.is_empty() && tasks.core.is_empty() {
            return Ok(());
        }

        // Phase 1: pools exist before any same-tx liquidity touches them
        for creation in &tasks.pools {
            if let Err(e) = self.create_pool(creation, height, time).await {
                warn!("Pool creation failed at height {height}: {e:#}");
            }
        }

        // Phase 1.5: pull pool rows for contracts not yet cached
        let mut missing: Vec<String> = tasks
            .core
            .iter()
            .map(|t| t.contract().to_string())
            .filter(|c| self.cached_pool(c).is_none())
            .collect();
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            match self.db.postgres.get_pools_by_contracts(&missing).await {
                Ok(pools) => {
                    for pool in pools {
                        self.cache_pool(pool);
                    }
                },
                Err(e) => warn!("Pool prefetch failed at height {height}: {e:#}"),
            }
        }

        // Phase 2: bounded fan-out; chunked so a burst larger than the task
        // cap is flushed to disk before more work queues up
        for chunk in tasks.core.chunks(self.settings.block_proc_max_tasks.max(1)) {
            futures::stream::iter(chunk)
                .for_each_concurrent(self.settings.block_proc_concurrency.max(1), |task| async move {
                    let result = match task {
                        CoreTask::Swap(swap) => self.handle_swap(swap, height, time).await,
                        CoreTask::Liquidity(liq) => self.handle_liquidity(liq, height, time).await,
                    };
                    if let Err(e) = result {
                        warn!("Core task failed at height {height}: {e:#}");
                    }
                })
                .await;

            if chunk.len() >= self.settings.block_proc_max_tasks {
                info!("Task cap reached at height {height}, interim drain");
                let _ = self.trades.drain().await;
                let _ = self.pool_states.drain().await;
                let _ = self.candles.drain().await;
            }
        }

        // Phase 3: low-priority metadata refresh for denoms first seen here
        let fresh_denoms = self.take_unfetched_denoms(&tasks);
        if !fresh_denoms.is_empty() {
            futures::stream::iter(fresh_denoms)
                .for_each_concurrent(self.settings.meta_concurrency.max(1), |denom| async move {
                    if let Err(e) = self.metadata.refresh(&denom).await {
                        warn!("Metadata refresh failed for {denom}: {e:#}");
                    }
                })
                .await;
        }

        Ok(())
    }

    fn take_unfetched_denoms(&self, tasks: &BlockTasks) -> Vec<String> {
        let cache = self.pool_cache.read().expect("pool cache poisoned");
        let mut denoms: Vec<String> = Vec::new();
        let mut fetched = self.meta_fetched.lock().expect("meta set poisoned");

        let mut push = |denom: &str| {
            if fetched.insert(denom.to_string()) {
                denoms.push(denom.to_string());
            }
        };

        for task in &tasks.core {
            if let Some(pool) = cache.get(task.contract()) {
                push(&pool.base_denom);
                push(&pool.quote_denom);
            }
        }
        for creation in &tasks.pools {
            if let Some(pool) = cache.get(&creation.pool_addr) {
                push(&pool.base_denom);
                push(&pool.quote_denom);
            }
        }

        denoms
    }

    async fn create_pool(
        &self,
        creation: &PoolCreation,
        height: i64,
        time: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let native = &self.settings.native_denom;
        let (base_denom, quote_denom) = parse_pair(&creation.pair, native)
            .with_context(|| format!("Unparseable pair string: {}", creation.pair))?;

        let base = self.db.postgres.ensure_token(&base_denom, native).await?;
        let quote = self.db.postgres.ensure_token(&quote_denom, native).await?;

        for token in [&base, &quote] {
            if let Some(exp) = token.exponent {
                self.exponent_cache
                    .write()
                    .expect("exponent cache poisoned")
                    .insert(token.denom.clone(), exp);
            }
        }

        let mut pool = Pool {
            id: 0,
            pair_contract: creation.pool_addr.clone(),
            base_token_id: base.id,
            quote_token_id: quote.id,
            base_denom: base_denom.clone(),
            quote_denom: quote_denom.clone(),
            lp_denom: creation.lp_denom.clone(),
            pair_type: creation.pair_type.clone(),
            is_native_quote: quote_denom == *native,
            factory_addr: self.settings.factory_addr.clone(),
            router_addr: self.settings.router_addr.clone(),
            created_height: height,
            created_tx: Some(creation.tx_hash.clone()),
            creator: creation.signer.clone(),
            created_at: time,
            updated_at: None,
        };

        pool.id = self.db.postgres.upsert_pool(&pool).await?;
        let pool = self.cache_pool(pool);

        info!(
            "Pool {} created at height {height} ({} / {})",
            pool.pair_contract, pool.base_denom, pool.quote_denom
        );

        let event = PairCreatedEvent {
            pool_id: pool.id,
            pair_contract: pool.pair_contract.clone(),
            base_denom: pool.base_denom.clone(),
            quote_denom: pool.quote_denom.clone(),
            base_token_id: pool.base_token_id,
            quote_token_id: pool.quote_token_id,
            is_native_quote: pool.is_native_quote,
        };
        if let Err(e) = event.publish(&self.db).await {
            warn!("pair_created notify failed for {}: {e:#}", pool.pair_contract);
        }

        Ok(())
    }

    async fn handle_swap(
        &self,
        swap: &SwapEvent,
        height: i64,
        time: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        // Events from contracts we never registered are not ours
        let Some(pool) = self.cached_pool(&swap.contract) else {
            return Ok(());
        };

        let direction = classify_direction(&swap.offer_denom, &pool.quote_denom);

        let observed = swap
            .reserves
            .as_deref()
            .map(parse_reserves_kv)
            .and_then(|assets| align_reserves(&assets, &pool));

        self.trades
            .enqueue(Trade {
                created_at: time,
                tx_hash: swap.tx_hash.clone(),
                pool_id: pool.id,
                msg_index: swap.msg_index,
                action: TradeAction::Swap,
                direction,
                offer_denom: Some(swap.offer_denom.clone()),
                ask_denom: swap.ask_denom.clone(),
                offer_amount_base: swap.offer_amount.clone(),
                return_amount_base: swap.return_amount.clone(),
                reserve_base_base: observed.as_ref().map(|(b, _)| b.clone()),
                reserve_quote_base: observed.as_ref().map(|(_, q)| q.clone()),
                height,
                signer: swap.signer.clone(),
                is_router: swap.is_router,
            })
            .await;

        if let Some((reserve_base, reserve_quote)) = observed {
            self.pool_states
                .enqueue(PoolState::new(pool.id, reserve_base, reserve_quote))
                .await;
        }

        if !pool.is_native_quote {
            return Ok(());
        }
        // Without a resolved base exponent the price cannot be oriented;
        // the trade row is already written, nothing is lost.
        let Some(base_exp) = self.exponent_of(&pool.base_denom).await else {
            return Ok(());
        };

        let live = match self.reserves.get(&pool.pair_contract).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Live reserves unavailable for {}: {e:#}", pool.pair_contract);
                return Ok(());
            },
        };

        let Some(price) =
            price_from_reserves(&live, &pool.base_denom, &pool.quote_denom, base_exp, 6)
        else {
            return Ok(());
        };

        let quote_leg_raw = match direction {
            TradeDirection::Buy => swap.offer_amount.as_deref(),
            _ => swap.return_amount.as_deref(),
        };
        let volume_native = quote_leg_raw
            .and_then(|raw| crate::utils::base_to_display(raw, 6))
            .unwrap_or(0.0);

        self.candles
            .enqueue(CandleTick {
                pool_id: pool.id,
                bucket_start: minute_floor(time),
                price,
                volume_native,
                trade_count: 1,
                liquidity: None,
            })
            .await;

        self.db
            .postgres
            .upsert_price(&PoolPrice::new(pool.base_token_id, pool.id, price, true))
            .await?;

        Ok(())
    }

    async fn handle_liquidity(
        &self,
        liq: &LiquidityEvent,
        height: i64,
        time: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let Some(pool) = self.cached_pool(&liq.contract) else {
            return Ok(());
        };

        let assets: Vec<crate::chain::events::ParsedAsset> = [
            (liq.asset1_denom.as_ref(), liq.asset1_amount.as_ref()),
            (liq.asset2_denom.as_ref(), liq.asset2_amount.as_ref()),
        ]
        .into_iter()
        .filter_map(|(denom, amount)| {
            Some(crate::chain::events::ParsedAsset {
                denom: denom?.clone(),
                amount_base: amount?.clone(),
            })
        })
        .collect();

        let observed = align_reserves(&assets, &pool);

        let (action, direction) = if liq.withdraw {
            (TradeAction::Withdraw, TradeDirection::Withdraw)
        } else {
            (TradeAction::Provide, TradeDirection::Provide)
        };

        self.trades
            .enqueue(Trade {
                created_at: time,
                tx_hash: liq.tx_hash.clone(),
                pool_id: pool.id,
                msg_index: liq.msg_index,
                action,
                direction,
                offer_denom: None,
                ask_denom: None,
                offer_amount_base: None,
                return_amount_base: None,
                reserve_base_base: observed.as_ref().map(|(b, _)| b.clone()),
                reserve_quote_base: observed.as_ref().map(|(_, q)| q.clone()),
                height,
                signer: liq.signer.clone(),
                is_router: liq.is_router,
            })
            .await;

        if let Some((reserve_base, reserve_quote)) = observed {
            self.pool_states
                .enqueue(PoolState::new(pool.id, reserve_base, reserve_quote))
                .await;
        }

        if !pool.is_native_quote {
            return Ok(());
        }
        let Some(base_exp) = self.exponent_of(&pool.base_denom).await else {
            return Ok(());
        };

        let live = match self.reserves.get(&pool.pair_contract).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Live reserves unavailable for {}: {e:#}", pool.pair_contract);
                return Ok(());
            },
        };

        if let Some(price) =
            price_from_reserves(&live, &pool.base_denom, &pool.quote_denom, base_exp, 6)
        {
            self.db
                .postgres
                .upsert_price(&PoolPrice::new(pool.base_token_id, pool.id, price, true))
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;

    const FACTORY: &str = "zig1factory";

    fn b64(s: &str) -> String {
        BASE64_STANDARD.encode(s)
    }

    fn wasm_event(attrs: &[(&str, &str)]) -> Value {
        serde_json::json!({
            "type": "wasm",
            "attributes": attrs.iter().map(|(k, v)| {
                serde_json::json!({ "key": b64(k), "value": b64(v) })
            }).collect::<Vec<_>>()
        })
    }

    fn block_with_txs(txs: Vec<&str>) -> Value {
        serde_json::json!({
            "result": { "block": {
                "header": { "time": "2024-01-01T00:00:30Z" },
                "data": { "txs": txs.iter().map(|t| b64(t)).collect::<Vec<_>>() }
            }}
        })
    }

    fn results_with_events(events: Vec<Value>) -> Value {
        serde_json::json!({
            "result": { "txs_results": [ { "code": 0, "events": events } ] }
        })
    }

    #[test]
    fn pair_creation_with_same_tx_provide() {
        // Scenario: create_pair + register + provide_liquidity in one tx
        let block = block_with_txs(vec!["tx-1"]);
        let results = results_with_events(vec![
            wasm_event(&[
                ("_contract_address", FACTORY),
                ("action", "create_pair"),
                ("pair", "TKN-uzig"),
                ("pair_type", "xyk"),
                ("msg_index", "0"),
            ]),
            wasm_event(&[
                ("_contract_address", FACTORY),
                ("action", "register"),
                ("pair_contract_addr", "zig1pair"),
                ("msg_index", "0"),
            ]),
            wasm_event(&[
                ("_contract_address", "zig1pair"),
                ("action", "provide_liquidity"),
                ("reserve_asset1_denom", "TKN"),
                ("reserve_asset1_amount", "1000000000"),
                ("reserve_asset2_denom", "uzig"),
                ("reserve_asset2_amount", "2000000"),
                ("assets", "1000000000TKN,2000000uzig"),
                ("msg_index", "0"),
            ]),
        ]);

        let tasks = collect_tasks(&block, &results, FACTORY, None);

        assert_eq!(tasks.pools.len(), 1);
        let creation = &tasks.pools[0];
        assert_eq!(creation.pair, "TKN-uzig");
        assert_eq!(creation.pool_addr, "zig1pair");
        assert_eq!(creation.pair_type, "xyk");

        assert_eq!(tasks.core.len(), 1);
        match &tasks.core[0] {
            CoreTask::Liquidity(liq) => {
                assert!(!liq.withdraw);
                assert_eq!(liq.contract, "zig1pair");
                assert_eq!(liq.asset1_amount.as_deref(), Some("1000000000"));
                assert_eq!(liq.asset2_denom.as_deref(), Some("uzig"));
            },
            other => panic!("expected liquidity task, got {other:?}"),
        }
    }

    #[test]
    fn pool_address_falls_back_to_last_instantiate() {
        let block = block_with_txs(vec!["tx-1"]);
        let results = serde_json::json!({
            "result": { "txs_results": [ { "code": 0, "events": [
                wasm_event(&[
                    ("_contract_address", FACTORY),
                    ("action", "create_pair"),
                    ("pair", "TKN-uzig"),
                ]),
                {
                    "type": "instantiate",
                    "attributes": [
                        { "key": b64("_contract_address"), "value": b64("zig1lp") }
                    ]
                },
                {
                    "type": "instantiate",
                    "attributes": [
                        { "key": b64("_contract_address"), "value": b64("zig1pair") }
                    ]
                }
            ] } ] }
        });

        let tasks = collect_tasks(&block, &results, FACTORY, None);
        assert_eq!(tasks.pools.len(), 1);
        assert_eq!(tasks.pools[0].pool_addr, "zig1pair");
    }

    #[test]
    fn foreign_factory_pairs_are_ignored() {
        let block = block_with_txs(vec!["tx-1"]);
        let results = results_with_events(vec![wasm_event(&[
            ("_contract_address", "zig1otherfactory"),
            ("action", "create_pair"),
            ("pair", "TKN-uzig"),
        ])]);

        let tasks = collect_tasks(&block, &results, FACTORY, None);
        assert!(tasks.pools.is_empty());
    }

    #[test]
    fn swap_task_extraction() {
        let block = block_with_txs(vec!["tx-1"]);
        let results = results_with_events(vec![
            wasm_event(&[
                ("_contract_address", "zig1pair"),
                ("action", "swap"),
                ("offer_asset", "uzig"),
                ("offer_amount", "500000"),
                ("ask_asset", "TKN"),
                ("return_amount", "240000000"),
                ("reserves", "TKN:760000000,uzig:2500000"),
                ("msg_index", "0"),
            ]),
            serde_json::json!({
                "type": "message",
                "attributes": [
                    { "key": "sender", "value": "zig1signer" },
                    { "key": "msg_index", "value": "0" }
                ]
            }),
        ]);

        let tasks = collect_tasks(&block, &results, FACTORY, Some("zig1router"));
        assert_eq!(tasks.core.len(), 1);
        match &tasks.core[0] {
            CoreTask::Swap(swap) => {
                assert_eq!(swap.offer_denom, "uzig");
                assert_eq!(swap.offer_amount.as_deref(), Some("500000"));
                assert_eq!(swap.return_amount.as_deref(), Some("240000000"));
                assert_eq!(swap.signer.as_deref(), Some("zig1signer"));
                assert!(!swap.is_router);
            },
            other => panic!("expected swap task, got {other:?}"),
        }
    }

    #[test]
    fn failed_txs_are_skipped() {
        let block = block_with_txs(vec!["tx-1"]);
        let results = serde_json::json!({
            "result": { "txs_results": [ { "code": 5, "events": [
                wasm_event(&[
                    ("_contract_address", "zig1pair"),
                    ("action", "swap"),
                    ("offer_asset", "uzig"),
                ])
            ] } ] }
        });

        let tasks = collect_tasks(&block, &results, FACTORY, None);
        assert!(tasks.core.is_empty());
    }

    #[test]
    fn reserve_alignment_follows_pool_denoms() {
        let pool = Pool {
            id: 1,
            pair_contract: "zig1pair".to_string(),
            base_token_id: 2,
            quote_token_id: 1,
            base_denom: "TKN".to_string(),
            quote_denom: "uzig".to_string(),
            lp_denom: None,
            pair_type: "xyk".to_string(),
            is_native_quote: true,
            factory_addr: FACTORY.to_string(),
            router_addr: None,
            created_height: 100,
            created_tx: None,
            creator: None,
            created_at: Utc::now(),
            updated_at: None,
        };

        let assets = parse_reserves_kv("uzig:2500000,TKN:760000000");
        let (base, quote) = align_reserves(&assets, &pool).unwrap();
        assert_eq!(base, "760000000");
        assert_eq!(quote, "2500000");

        let partial = parse_reserves_kv("uzig:2500000");
        assert_eq!(align_reserves(&partial, &pool), None);
    }
}
