//! JSON client for the chain's RPC and LCD endpoints.
//!
//! Every call iterates the configured endpoint list (primary first) and
//! retries transient failures with jittered exponential backoff. Responses
//! are returned as decoded JSON trees; interpretation is the caller's
//! responsibility.

use anyhow::{anyhow, Context};
use base64::prelude::*;
use log::warn;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Attempts across the whole endpoint list before giving up.
const MAX_ATTEMPTS: u32 = 5;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff for attempt `n`: min(1000 * 1.5^n, 10000) + U[0, 250) ms.
fn backoff_delay(attempt: u32) -> Duration {
    let base = (1000.0 * 1.5f64.powi(attempt as i32)).min(10_000.0) as u64;
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base + jitter)
}

/// Outcome of a single endpoint hit, used to pick between failover,
/// backoff, and fail-fast.
enum FetchOutcome {
    Ok(Value),
    /// 429 / 5xx / transport error: try the next endpoint, then back off.
    Transient(String),
    /// Other 4xx or malformed JSON: raise immediately.
    Fatal(anyhow::Error),
    /// Endpoint does not implement this query (HTTP 501).
    NotImplemented,
}

#[derive(Clone)]
pub struct ChainClient {
    http: reqwest::Client,
    rpc_endpoints: Vec<String>,
    lcd_endpoints: Vec<String>,
}

impl ChainClient {
    pub fn new(rpc_endpoints: Vec<String>, lcd_endpoints: Vec<String>) -> anyhow::Result<Self> {
        for endpoint in rpc_endpoints.iter().chain(lcd_endpoints.iter()) {
            Url::parse(endpoint).with_context(|| format!("Invalid endpoint URL: {endpoint}"))?;
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            rpc_endpoints,
            lcd_endpoints,
        })
    }

    async fn hit(&self, url: &str) -> FetchOutcome {
        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Transient(format!("transport error: {e}")),
        };

        let status = resp.status();
        if status.as_u16() == 501 {
            return FetchOutcome::NotImplemented;
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return FetchOutcome::Transient(format!("HTTP {status}"));
        }
        if status.is_client_error() {
            return FetchOutcome::Fatal(anyhow!("HTTP {status} for {url}"));
        }

        match resp.json::<Value>().await {
            Ok(v) => FetchOutcome::Ok(v),
            Err(e) => FetchOutcome::Fatal(anyhow!("malformed JSON from {url}: {e}")),
        }
    }

    /// Fetch `path` against each endpoint in order; transient failures walk
    /// the list and back off between rounds, semantic failures raise.
    async fn fetch(&self, endpoints: &[String], path: &str) -> anyhow::Result<Value> {
        let mut last_transient = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            for endpoint in endpoints {
                let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
                match self.hit(&url).await {
                    FetchOutcome::Ok(v) => return Ok(v),
                    FetchOutcome::Transient(reason) => {
                        warn!("Transient failure on {url}: {reason}");
                        last_transient = reason;
                    },
                    FetchOutcome::Fatal(e) => return Err(e),
                    FetchOutcome::NotImplemented => {
                        return Err(anyhow!("HTTP 501 for {path}"));
                    },
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        Err(anyhow!(
            "All endpoints failed for {path} after {MAX_ATTEMPTS} attempts: {last_transient}"
        ))
    }

    /// Same as `fetch` but maps HTTP 501 to Ok(None) so callers can treat
    /// unsupported queries as a skip.
    async fn fetch_optional(&self, endpoints: &[String], path: &str) -> anyhow::Result<Option<Value>> {
        let mut last_transient = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            for endpoint in endpoints {
                let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
                match self.hit(&url).await {
                    FetchOutcome::Ok(v) => return Ok(Some(v)),
                    FetchOutcome::NotImplemented => return Ok(None),
                    FetchOutcome::Transient(reason) => {
                        warn!("Transient failure on {url}: {reason}");
                        last_transient = reason;
                    },
                    FetchOutcome::Fatal(e) => return Err(e),
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        Err(anyhow!(
            "All endpoints failed for {path} after {MAX_ATTEMPTS} attempts: {last_transient}"
        ))
    }

    // ==================== RPC ====================

    /// Latest block height from `/status`.
    pub async fn status(&self) -> anyhow::Result<i64> {
        let v = self.fetch(&self.rpc_endpoints, "/status").await?;
        v["result"]["sync_info"]["latest_block_height"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("Missing latest_block_height in /status response"))
    }

    pub async fn block(&self, height: i64) -> anyhow::Result<Value> {
        self.fetch(&self.rpc_endpoints, &format!("/block?height={height}"))
            .await
    }

    pub async fn block_results(&self, height: i64) -> anyhow::Result<Value> {
        self.fetch(
            &self.rpc_endpoints,
            &format!("/block_results?height={height}"),
        )
        .await
    }

    // ==================== LCD ====================

    pub async fn denom_metadata(&self, denom: &str) -> anyhow::Result<Value> {
        self.fetch(
            &self.lcd_endpoints,
            &format!(
                "/cosmos/bank/v1beta1/denoms_metadata/{}",
                urlencode(denom)
            ),
        )
        .await
    }

    /// Chain-specific factory endpoint with supply/minting fields.
    pub async fn factory_denom(&self, denom: &str) -> anyhow::Result<Option<Value>> {
        self.fetch_optional(
            &self.lcd_endpoints,
            &format!("/zigchain/factory/denom/{}", urlencode(denom)),
        )
        .await
    }

    /// One page of token ownership. Ok(None) means the endpoint answered
    /// 501 and the denom is not supported.
    pub async fn denom_owners(
        &self,
        denom: &str,
        page_key: Option<&str>,
    ) -> anyhow::Result<Option<Value>> {
        let mut path = format!("/cosmos/bank/v1beta1/denom_owners/{}", urlencode(denom));
        if let Some(key) = page_key {
            path.push_str(&format!("?pagination.key={}", urlencode(key)));
        }
        self.fetch_optional(&self.lcd_endpoints, &path).await
    }

    pub async fn ibc_denom_trace(&self, hash: &str) -> anyhow::Result<Value> {
        self.fetch(
            &self.lcd_endpoints,
            &format!("/ibc/apps/transfer/v1/denoms/ibc/{}", urlencode(hash)),
        )
        .await
    }

    /// CosmWasm smart query; `msg` is serialized and base64-encoded into
    /// the path.
    pub async fn smart_query(&self, contract: &str, msg: &Value) -> anyhow::Result<Value> {
        let encoded = BASE64_STANDARD.encode(msg.to_string());
        self.fetch(
            &self.lcd_endpoints,
            &format!(
                "/cosmwasm/wasm/v1/contract/{}/smart/{}",
                urlencode(contract),
                urlencode(&encoded)
            ),
        )
        .await
    }

    /// Pool reserves via the standard `{"pool":{}}` query.
    pub async fn pool_reserves(&self, pair_contract: &str) -> anyhow::Result<Value> {
        self.smart_query(pair_contract, &serde_json::json!({ "pool": {} }))
            .await
    }

    /// Arbitrary GET used for metadata URIs and external providers.
    pub async fn get_external(&self, url: &str) -> anyhow::Result<reqwest::Response> {
        self.http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))
    }
}

/// Percent-encode a path/query segment (denoms and pagination keys can
/// carry '/', '+', '=').
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            },
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_with_jitter() {
        for attempt in 0..10 {
            let d = backoff_delay(attempt).as_millis() as u64;
            let base = (1000.0 * 1.5f64.powi(attempt as i32)).min(10_000.0) as u64;
            assert!(d >= base);
            assert!(d < base + 250);
        }
    }

    #[test]
    fn urlencode_escapes_reserved() {
        assert_eq!(urlencode("uzig"), "uzig");
        assert_eq!(
            urlencode("factory/zig1abc/utoken"),
            "factory%2Fzig1abc%2Futoken"
        );
        assert_eq!(urlencode("ab+c="), "ab%2Bc%3D");
    }
}
