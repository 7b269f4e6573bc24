//! TTL-cached pool reserves from LCD smart queries.
//!
//! Both price-update paths (block processor and the independent ticker)
//! read reserves through this cache; the short TTL keeps prices fresh
//! while `get_with` coalesces concurrent fetches for the same pair
//! contract into one in-flight request.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;

use crate::chain::{events::ParsedAsset, ChainClient};
use crate::utils::{base_to_display, validate_positive_price};

/// How long a fetched reserve snapshot stays valid.
const RESERVES_TTL: Duration = Duration::from_secs(2);

/// Upper bound on distinct pair contracts kept at once.
const RESERVES_CAPACITY: u64 = 10_000;

#[derive(Clone)]
pub struct ReservesCache {
    chain: ChainClient,
    cache: Cache<String, Arc<Vec<ParsedAsset>>>,
}

impl ReservesCache {
    pub fn new(chain: ChainClient) -> Self {
        let cache = Cache::builder()
            .max_capacity(RESERVES_CAPACITY)
            .time_to_live(RESERVES_TTL)
            .build();
        Self { chain, cache }
    }

    /// Live reserves of a pair contract, served from cache within the TTL.
    pub async fn get(&self, pair_contract: &str) -> anyhow::Result<Arc<Vec<ParsedAsset>>> {
        let chain = self.chain.clone();
        let contract = pair_contract.to_string();

        self.cache
            .try_get_with(pair_contract.to_string(), async move {
                let response = chain.pool_reserves(&contract).await?;
                Ok::<_, anyhow::Error>(Arc::new(parse_pool_response(&response)))
            })
            .await
            .map_err(|e: Arc<anyhow::Error>| anyhow::anyhow!("Reserves fetch failed: {e:#}"))
    }
}

/// Extract `{denom, amount}` pairs from a CosmWasm `{"pool":{}}` response.
/// Assets carry either a native denom or a cw20 contract address.
pub fn parse_pool_response(response: &Value) -> Vec<ParsedAsset> {
    let assets = response["data"]["assets"]
        .as_array()
        .or_else(|| response["assets"].as_array());

    let Some(assets) = assets else {
        return Vec::new();
    };

    assets
        .iter()
        .filter_map(|asset| {
            let amount = asset["amount"].as_str()?;
            let info = &asset["info"];
            let denom = info["native_token"]["denom"]
                .as_str()
                .or_else(|| info["token"]["contract_addr"].as_str())?;
            Some(ParsedAsset {
                denom: denom.to_string(),
                amount_base: amount.to_string(),
            })
        })
        .collect()
}

/// Mid price of a native-quoted pool from raw reserves:
/// (quote_raw / 10^quote_exp) / (base_raw / 10^base_exp), i.e. native units
/// per DISPLAY unit of base.
pub fn price_from_reserves(
    assets: &[ParsedAsset],
    base_denom: &str,
    quote_denom: &str,
    base_exponent: u32,
    quote_exponent: u32,
) -> Option<f64> {
    let base_raw = assets.iter().find(|a| a.denom == base_denom)?;
    let quote_raw = assets.iter().find(|a| a.denom == quote_denom)?;

    let base_display = base_to_display(&base_raw.amount_base, base_exponent)?;
    let quote_display = base_to_display(&quote_raw.amount_base, quote_exponent)?;

    if base_display <= 0.0 || quote_display <= 0.0 {
        return None;
    }

    validate_positive_price(quote_display / base_display)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(denom: &str, amount: &str) -> ParsedAsset {
        ParsedAsset {
            denom: denom.to_string(),
            amount_base: amount.to_string(),
        }
    }

    #[test]
    fn price_orientation() {
        // R_b = 1e9 base units at exp 6, R_q = 2e6 uzig:
        // (2e6 / 1e6) / (1e9 / 1e6) = 2 / 1000 = 0.002
        let assets = vec![asset("TKN", "1000000000"), asset("uzig", "2000000")];
        let price = price_from_reserves(&assets, "TKN", "uzig", 6, 6).unwrap();
        assert!((price - 0.002).abs() < 1e-12);
    }

    #[test]
    fn price_respects_base_exponent() {
        // Same raw reserves, exponent 8 base: (2.0) / (10.0) = 0.2
        let assets = vec![asset("TKN", "1000000000"), asset("uzig", "2000000")];
        let price = price_from_reserves(&assets, "TKN", "uzig", 8, 6).unwrap();
        assert!((price - 0.2).abs() < 1e-12);
    }

    #[test]
    fn zero_reserves_produce_no_price() {
        let assets = vec![asset("TKN", "0"), asset("uzig", "2000000")];
        assert_eq!(price_from_reserves(&assets, "TKN", "uzig", 6, 6), None);

        let missing = vec![asset("uzig", "2000000")];
        assert_eq!(price_from_reserves(&missing, "TKN", "uzig", 6, 6), None);
    }

    #[test]
    fn pool_response_parsing() {
        let response = serde_json::json!({
            "data": {
                "assets": [
                    { "info": { "native_token": { "denom": "TKN" } }, "amount": "760000000" },
                    { "info": { "native_token": { "denom": "uzig" } }, "amount": "2500000" }
                ],
                "total_share": "44721359"
            }
        });

        let assets = parse_pool_response(&response);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0], asset("TKN", "760000000"));
        assert_eq!(assets[1], asset("uzig", "2500000"));

        assert!(parse_pool_response(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn cw20_assets_use_contract_address() {
        let response = serde_json::json!({
            "data": {
                "assets": [
                    { "info": { "token": { "contract_addr": "zig1cw20" } }, "amount": "5" }
                ]
            }
        });
        let assets = parse_pool_response(&response);
        assert_eq!(assets[0].denom, "zig1cw20");
    }
}
