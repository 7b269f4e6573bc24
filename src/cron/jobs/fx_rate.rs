//! External USD/native rate fetcher.
//!
//! Pulls the configured pair from the CMC quotes endpoint and upserts one
//! row per minute; refetches inside a minute overwrite, so the cycle is
//! idempotent.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DurationRound, TimeDelta, Utc};
use log::warn;
use serde_json::Value;

use crate::config::Settings;
use crate::db::models::FxRate;
use crate::db::Database;

const QUOTES_URL: &str = "https://pro-api.coinmarketcap.com/v2/cryptocurrency/quotes/latest";

const MAX_ATTEMPTS: u32 = 4;

/// Backoff for attempt `n`: 1.5 s doubling, capped at 15 s.
fn backoff_delay(attempt: u32) -> std::time::Duration {
    let ms = (1500u64 * 2u64.pow(attempt)).min(15_000);
    std::time::Duration::from_millis(ms)
}

/// Pull the price number out of a quotes response. The v2 shape nests an
/// array per symbol; the v1 shape a single object.
pub(crate) fn extract_price(body: &Value, symbol: &str, convert: &str) -> Option<f64> {
    let entry = &body["data"][symbol];
    let quote = if entry.is_array() {
        &entry[0]["quote"][convert]["price"]
    } else {
        &entry["quote"][convert]["price"]
    };
    quote.as_f64().filter(|p| p.is_finite() && *p > 0.0)
}

pub async fn run(db: &Database, http: &reqwest::Client, settings: &Settings) -> Result<()> {
    let Some(api_key) = settings.cmc_api_key.as_deref() else {
        // No key configured: the FX trail is optional
        return Ok(());
    };

    let url = format!(
        "{QUOTES_URL}?symbol={}&convert={}",
        settings.cmc_symbol, settings.cmc_convert
    );

    let mut last_error = None;
    for attempt in 0..MAX_ATTEMPTS {
        let response = match http
            .get(&url)
            .header("X-CMC_PRO_API_KEY", api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(anyhow!("transport error: {e}"));
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            },
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            warn!("FX provider returned {status}, backing off");
            last_error = Some(anyhow!("HTTP {status}"));
            tokio::time::sleep(backoff_delay(attempt)).await;
            continue;
        }
        if !status.is_success() {
            bail!("FX provider returned {status}");
        }

        let body: Value = response.json().await.context("FX response decode failed")?;
        let price = extract_price(&body, &settings.cmc_symbol, &settings.cmc_convert)
            .ok_or_else(|| anyhow!("No price in FX response"))?;

        let ts = Utc::now()
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or_else(|_| Utc::now());
        db.postgres
            .upsert_fx_rate(&FxRate {
                ts,
                native_per_usd: price,
            })
            .await?;
        return Ok(());
    }

    Err(last_error.unwrap_or_else(|| anyhow!("FX fetch exhausted retries")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_extraction_v2_shape() {
        let body = serde_json::json!({
            "data": { "ZIG": [ { "quote": { "USD": { "price": 0.0123 } } } ] }
        });
        assert_eq!(extract_price(&body, "ZIG", "USD"), Some(0.0123));
    }

    #[test]
    fn price_extraction_v1_shape() {
        let body = serde_json::json!({
            "data": { "ZIG": { "quote": { "USD": { "price": 0.5 } } } }
        });
        assert_eq!(extract_price(&body, "ZIG", "USD"), Some(0.5));
    }

    #[test]
    fn missing_or_invalid_price_is_none() {
        assert_eq!(extract_price(&serde_json::json!({}), "ZIG", "USD"), None);
        let negative = serde_json::json!({
            "data": { "ZIG": { "quote": { "USD": { "price": -1.0 } } } }
        });
        assert_eq!(extract_price(&negative, "ZIG", "USD"), None);
    }

    #[test]
    fn backoff_caps_at_fifteen_seconds() {
        assert_eq!(backoff_delay(0).as_millis(), 1500);
        assert_eq!(backoff_delay(1).as_millis(), 3000);
        assert_eq!(backoff_delay(10).as_millis(), 15_000);
    }
}
