use chrono::{DateTime, Utc};

/// Asset class of a denom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Native,
    Factory,
    Ibc,
    Cw20,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Native => "native",
            TokenKind::Factory => "factory",
            TokenKind::Ibc => "ibc",
            TokenKind::Cw20 => "cw20",
        }
    }

    /// Classify a denom by its shape. Factory denoms look like
    /// `factory/{creator}/{subdenom}`, IBC denoms like `ibc/{HASH}`,
    /// contract addresses are cw20.
    pub fn for_denom(denom: &str, native_denom: &str) -> Self {
        if denom == native_denom {
            TokenKind::Native
        } else if denom.starts_with("factory/") {
            TokenKind::Factory
        } else if denom.starts_with("ibc/") {
            TokenKind::Ibc
        } else if denom.starts_with("zig1") {
            TokenKind::Cw20
        } else {
            TokenKind::Native
        }
    }
}

/// Token identity and metadata (PostgreSQL `tokens`).
///
/// Created as a minimal stub on first sighting; discretionary fields are
/// filled by the metadata resolver and never destroyed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Token {
    pub id: i64,
    pub denom: String,
    pub kind: String,

    // Discretionary metadata (resolver-owned, never clobbered with null)
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub display: Option<String>,
    pub image: Option<String>,
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
    pub description: Option<String>,

    /// DISPLAY = BASE / 10^exponent. None until resolved; the native token
    /// is always 6.
    pub exponent: Option<i32>,

    // Supply in BASE units (78-digit safe, carried as decimal strings)
    pub max_supply_base: Option<String>,
    pub total_supply_base: Option<String>,

    pub updated_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Minimal stub for a denom seen for the first time.
    pub fn stub(denom: &str, native_denom: &str) -> Self {
        let kind = TokenKind::for_denom(denom, native_denom);
        let exponent = if kind == TokenKind::Native { Some(6) } else { None };
        Self {
            id: 0,
            denom: denom.to_string(),
            kind: kind.as_str().to_string(),
            name: None,
            symbol: None,
            display: None,
            image: None,
            website: None,
            twitter: None,
            telegram: None,
            description: None,
            exponent,
            max_supply_base: None,
            total_supply_base: None,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denom_classification() {
        assert_eq!(TokenKind::for_denom("uzig", "uzig"), TokenKind::Native);
        assert_eq!(
            TokenKind::for_denom("factory/zig1abc/utoken", "uzig"),
            TokenKind::Factory
        );
        assert_eq!(
            TokenKind::for_denom("ibc/27394FB092D2ECCD56123C74F36E4C1F", "uzig"),
            TokenKind::Ibc
        );
        assert_eq!(
            TokenKind::for_denom("zig1contractaddress", "uzig"),
            TokenKind::Cw20
        );
    }

    #[test]
    fn stub_defaults() {
        let native = Token::stub("uzig", "uzig");
        assert_eq!(native.exponent, Some(6));
        assert_eq!(native.kind, "native");

        let factory = Token::stub("factory/zig1abc/utoken", "uzig");
        assert_eq!(factory.exponent, None);
        assert!(factory.symbol.is_none());
    }
}
