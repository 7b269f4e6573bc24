//! Typed views over block-results payloads.
//!
//! Tendermint delivers event attributes base64-encoded depending on node
//! version. Attributes are decoded only when the decode is provably safe
//! (round-trips to the original and is printable ASCII); otherwise the raw
//! string is kept.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::models::TradeDirection;

/// One event with decoded attributes, in emission order.
#[derive(Debug, Clone)]
pub struct EventView {
    pub ty: String,
    pub attrs: Vec<(String, String)>,
}

impl EventView {
    /// First value for `key`, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Last value for `key`. Some contracts emit an attribute repeatedly
    /// and the final one reflects post-execution state.
    pub fn attr_last(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The emitting contract for wasm events.
    pub fn contract(&self) -> Option<&str> {
        self.attr("_contract_address")
    }

    /// The message index this event belongs to, when the node stamps it.
    pub fn msg_index(&self) -> Option<i32> {
        self.attr("msg_index").and_then(|s| s.parse().ok())
    }
}

/// A `{denom, amount}` pair in BASE units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAsset {
    pub denom: String,
    pub amount_base: String,
}

/// Decode an attribute string if and only if the decode is safe.
pub fn decode_attr(raw: &str) -> String {
    if let Ok(bytes) = BASE64_STANDARD.decode(raw) {
        if BASE64_STANDARD.encode(&bytes) == raw {
            if let Ok(decoded) = std::str::from_utf8(&bytes) {
                if decoded
                    .bytes()
                    .all(|b| (0x20..0x7f).contains(&b) || b == b'\n' || b == b'\t')
                {
                    return decoded.to_string();
                }
            }
        }
    }
    raw.to_string()
}

/// All events of one tx result as decoded views, preserving order.
pub fn events_of_tx(tx_result: &Value) -> Vec<EventView> {
    let Some(events) = tx_result["events"].as_array() else {
        return Vec::new();
    };

    events
        .iter()
        .filter_map(|ev| {
            let ty = ev["type"].as_str()?.to_string();
            let attrs = ev["attributes"]
                .as_array()
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter_map(|a| {
                            let key = a["key"].as_str()?;
                            let value = a["value"].as_str().unwrap_or_default();
                            Some((decode_attr(key), decode_attr(value)))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(EventView { ty, attrs })
        })
        .collect()
}

/// Events of a given type.
pub fn by_type<'a>(events: &'a [EventView], ty: &str) -> Vec<&'a EventView> {
    events.iter().filter(|e| e.ty == ty).collect()
}

/// Wasm events whose `action` attribute matches.
pub fn wasm_by_action<'a>(wasms: &[&'a EventView], action: &str) -> Vec<&'a EventView> {
    wasms
        .iter()
        .filter(|e| e.attr("action") == Some(action))
        .copied()
        .collect()
}

/// Map msg_index -> signer from `message` events.
pub fn msg_senders(events: &[EventView]) -> FxHashMap<i32, String> {
    let mut senders = FxHashMap::default();
    for ev in events.iter().filter(|e| e.ty == "message") {
        if let (Some(index), Some(sender)) = (ev.msg_index(), ev.attr("sender")) {
            senders.entry(index).or_insert_with(|| sender.to_string());
        }
    }
    senders
}

/// Split a factory pair string like `TKN-uzig` into (base, quote).
///
/// If either side equals the native denom, that side becomes the quote.
/// Denoms can themselves contain '-' (IBC hashes do not, but factory
/// subdenoms may), so the native denom is matched at the string ends first
/// and the last separator is used as a fallback.
pub fn parse_pair(pair: &str, native_denom: &str) -> Option<(String, String)> {
    let suffix = format!("-{native_denom}");
    if let Some(base) = pair.strip_suffix(&suffix) {
        if !base.is_empty() {
            return Some((base.to_string(), native_denom.to_string()));
        }
    }
    let prefix = format!("{native_denom}-");
    if let Some(base) = pair.strip_prefix(&prefix) {
        if !base.is_empty() {
            return Some((base.to_string(), native_denom.to_string()));
        }
    }

    let idx = pair.rfind('-')?;
    let (left, right) = pair.split_at(idx);
    let right = &right[1..];
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((left.to_string(), right.to_string()))
}

/// Parse `denom:amount` lists like `TKN:760000000,uzig:2500000`.
pub fn parse_reserves_kv(s: &str) -> Vec<ParsedAsset> {
    s.split(',')
        .filter_map(|part| {
            let (denom, amount) = part.trim().split_once(':')?;
            if denom.is_empty() || amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            Some(ParsedAsset {
                denom: denom.to_string(),
                amount_base: amount.to_string(),
            })
        })
        .collect()
}

/// Parse coin lists like `1000000000TKN,2000000uzig` (amount prefix,
/// denom rest).
pub fn parse_assets_list(s: &str) -> Vec<ParsedAsset> {
    s.split(',')
        .filter_map(|part| {
            let part = part.trim();
            let digits_end = part
                .bytes()
                .position(|b| !b.is_ascii_digit())
                .unwrap_or(part.len());
            if digits_end == 0 || digits_end == part.len() {
                return None;
            }
            Some(ParsedAsset {
                amount_base: part[..digits_end].to_string(),
                denom: part[digits_end..].to_string(),
            })
        })
        .collect()
}

/// Offering the quote asset buys the base asset.
pub fn classify_direction(offer_denom: &str, quote_denom: &str) -> TradeDirection {
    if offer_denom == quote_denom {
        TradeDirection::Buy
    } else {
        TradeDirection::Sell
    }
}

/// Uppercase-hex SHA-256 of the decoded raw tx bytes.
pub fn tx_hash(raw_base64_tx: &str) -> Option<String> {
    let bytes = BASE64_STANDARD.decode(raw_base64_tx).ok()?;
    let digest = Sha256::digest(&bytes);
    Some(hex::encode_upper(digest))
}

/// Block header time as UTC.
pub fn block_time(block: &Value) -> Option<DateTime<Utc>> {
    block["result"]["block"]["header"]["time"]
        .as_str()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

/// Raw base64 tx payloads of a block.
pub fn block_txs(block: &Value) -> Vec<&str> {
    block["result"]["block"]["data"]["txs"]
        .as_array()
        .map(|txs| txs.iter().filter_map(|t| t.as_str()).collect())
        .unwrap_or_default()
}

/// Per-tx results of a block_results payload.
pub fn txs_results(block_results: &Value) -> Vec<&Value> {
    block_results["result"]["txs_results"]
        .as_array()
        .map(|txs| txs.iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_attr_round_trips_safe_base64() {
        // "swap" encoded
        assert_eq!(decode_attr("c3dhcA=="), "swap");
        // plain strings survive untouched
        assert_eq!(decode_attr("swap"), "swap");
        assert_eq!(decode_attr("pair_contract_addr"), "pair_contract_addr");
    }

    #[test]
    fn decode_attr_keeps_binary_payloads_raw() {
        // valid base64 of non-printable bytes must stay encoded
        let raw = BASE64_STANDARD.encode([0u8, 1, 2, 255]);
        assert_eq!(decode_attr(&raw), raw);
    }

    #[test]
    fn pair_parsing_forces_native_quote() {
        assert_eq!(
            parse_pair("TKN-uzig", "uzig"),
            Some(("TKN".to_string(), "uzig".to_string()))
        );
        assert_eq!(
            parse_pair("uzig-TKN", "uzig"),
            Some(("TKN".to_string(), "uzig".to_string()))
        );
        // factory denoms with separators keep the full base denom
        assert_eq!(
            parse_pair("factory/zig1abc/sub-token-uzig", "uzig"),
            Some(("factory/zig1abc/sub-token".to_string(), "uzig".to_string()))
        );
        // non-native pairs split at the last separator
        assert_eq!(
            parse_pair("aaa-bbb", "uzig"),
            Some(("aaa".to_string(), "bbb".to_string()))
        );
        assert_eq!(parse_pair("nodash", "uzig"), None);
    }

    #[test]
    fn reserves_and_asset_lists() {
        let kv = parse_reserves_kv("TKN:760000000,uzig:2500000");
        assert_eq!(kv.len(), 2);
        assert_eq!(kv[0].denom, "TKN");
        assert_eq!(kv[0].amount_base, "760000000");
        assert_eq!(kv[1].denom, "uzig");

        let coins = parse_assets_list("1000000000TKN,2000000uzig");
        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].amount_base, "1000000000");
        assert_eq!(coins[0].denom, "TKN");
        assert_eq!(coins[1].denom, "uzig");

        assert!(parse_reserves_kv("garbage").is_empty());
        assert!(parse_assets_list("TKN1000").is_empty());
    }

    #[test]
    fn direction_rule() {
        assert_eq!(classify_direction("uzig", "uzig"), TradeDirection::Buy);
        assert_eq!(classify_direction("TKN", "uzig"), TradeDirection::Sell);
    }

    #[test]
    fn tx_hash_matches_known_vector() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(
            tx_hash("").as_deref(),
            Some("E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855")
        );
        // sha256("abc"), "abc" = base64 "YWJj"
        assert_eq!(
            tx_hash("YWJj").as_deref(),
            Some("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD")
        );
        assert_eq!(tx_hash("not base64!!"), None);
    }

    #[test]
    fn event_views_from_tx_result() {
        let tx = serde_json::json!({
            "events": [
                {
                    "type": "wasm",
                    "attributes": [
                        { "key": "X2NvbnRyYWN0X2FkZHJlc3M=", "value": "emlnMXBvb2w=" },
                        { "key": "YWN0aW9u", "value": "c3dhcA==" }
                    ]
                },
                {
                    "type": "message",
                    "attributes": [
                        { "key": "sender", "value": "zig1signer" },
                        { "key": "msg_index", "value": "0" }
                    ]
                }
            ]
        });

        let events = events_of_tx(&tx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].contract(), Some("zig1pool"));
        assert_eq!(events[0].attr("action"), Some("swap"));

        let senders = msg_senders(&events);
        assert_eq!(senders.get(&0).map(String::as_str), Some("zig1signer"));

        let wasms = by_type(&events, "wasm");
        assert_eq!(wasm_by_action(&wasms, "swap").len(), 1);
        assert!(wasm_by_action(&wasms, "provide_liquidity").is_empty());
    }
}
