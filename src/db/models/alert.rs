use serde::{Deserialize, Serialize};

/// Typed view over the `alerts.params` JSON blob.
///
/// The alert engine itself runs out of process; this crate only shares the
/// schema. Each alert kind carries its own parameter record, discriminated
/// by the `kind` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertParams {
    PriceCross {
        token_id: i64,
        threshold_native: f64,
        /// "above" or "below"
        edge: String,
    },
    WalletTrade {
        address: String,
        pool_id: Option<i64>,
    },
    LargeTrade {
        pool_id: i64,
        min_quote_display: f64,
    },
    TvlChange {
        pool_id: i64,
        pct: f64,
        window_minutes: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_round_trip() {
        let params = AlertParams::LargeTrade {
            pool_id: 7,
            min_quote_display: 1500.0,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kind"], "large_trade");
        let back: AlertParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = serde_json::json!({ "kind": "moon_phase", "pool_id": 1 });
        assert!(serde_json::from_value::<AlertParams>(json).is_err());
    }
}
