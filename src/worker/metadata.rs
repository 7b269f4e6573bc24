//! Canonical token metadata resolution.
//!
//! Merges on-chain bank metadata, IBC denom traces, factory supply fields
//! and the static asset registry into one token row. The merge never
//! overwrites an existing non-null column with null; the registry wins for
//! curated naming, the LCD for everything else.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use log::{info, warn};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::config::Settings;
use crate::db::postgres::ops::TokenMetaPatch;
use crate::db::Database;

pub struct MetadataResolver {
    chain: ChainClient,
    db: Database,
    settings: Arc<Settings>,
    /// Lazily loaded at first use, reloaded by the registry poll loop.
    /// None when the registry is disabled or unreachable.
    registry: RwLock<Option<Arc<AssetRegistry>>>,
}

/// One curated asset-registry entry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAsset {
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

/// Static registry keyed by base denom, display, aliases and symbol.
#[derive(Debug, Default)]
pub struct AssetRegistry {
    by_key: HashMap<String, Arc<RegistryAsset>>,
}

impl AssetRegistry {
    pub fn from_json(assetlist: &Value) -> Self {
        let mut by_key: HashMap<String, Arc<RegistryAsset>> = HashMap::new();

        let assets = assetlist["assets"].as_array().cloned().unwrap_or_default();
        for asset in &assets {
            let display = asset["display"].as_str().map(str::to_string);

            // The display unit's exponent is the canonical one
            let exponent = asset["denom_units"].as_array().and_then(|units| {
                units.iter().find_map(|u| {
                    let matches_display = u["denom"].as_str() == display.as_deref()
                        || u["aliases"]
                            .as_array()
                            .map(|aliases| {
                                aliases
                                    .iter()
                                    .any(|a| a.as_str() == display.as_deref())
                            })
                            .unwrap_or(false);
                    if matches_display {
                        u["exponent"].as_i64().map(|e| e as i32)
                    } else {
                        None
                    }
                })
            });

            let entry = Arc::new(RegistryAsset {
                name: asset["name"].as_str().map(str::to_string),
                symbol: asset["symbol"].as_str().map(str::to_string),
                display: display.clone(),
                exponent,
                image: asset["logo_URIs"]["png"]
                    .as_str()
                    .or_else(|| asset["logo_URIs"]["svg"].as_str())
                    .map(str::to_string),
                website: asset["socials"]["website"].as_str().map(str::to_string),
                twitter: asset["socials"]["twitter"].as_str().map(str::to_string),
                telegram: asset["socials"]["telegram"].as_str().map(str::to_string),
                description: asset["description"].as_str().map(str::to_string),
            });

            let mut keys: Vec<String> = Vec::new();
            if let Some(base) = asset["base"].as_str() {
                keys.push(base.to_string());
            }
            if let Some(d) = &display {
                keys.push(d.clone());
            }
            if let Some(symbol) = asset["symbol"].as_str() {
                keys.push(symbol.to_string());
            }
            if let Some(units) = asset["denom_units"].as_array() {
                for unit in units {
                    if let Some(aliases) = unit["aliases"].as_array() {
                        keys.extend(aliases.iter().filter_map(|a| a.as_str().map(str::to_string)));
                    }
                }
            }

            for key in keys {
                by_key.entry(key).or_insert_with(|| entry.clone());
            }
        }

        Self { by_key }
    }

    pub fn lookup(&self, key: &str) -> Option<&RegistryAsset> {
        self.by_key.get(key).map(Arc::as_ref)
    }
}

/// Exponent of the display unit in a bank metadata entry.
pub(crate) fn exponent_from_metadata(metadata: &Value) -> Option<i32> {
    let display = metadata["display"].as_str()?;
    let units = metadata["denom_units"].as_array()?;
    units.iter().find_map(|u| {
        let matches = u["denom"].as_str() == Some(display)
            || u["aliases"]
                .as_array()
                .map(|aliases| aliases.iter().any(|a| a.as_str() == Some(display)))
                .unwrap_or(false);
        if matches {
            u["exponent"].as_i64().map(|e| e as i32)
        } else {
            None
        }
    })
}

/// Fallback for bare `u<core>` denoms without bank metadata: symbol and
/// display become the core and the exponent is 0.
pub(crate) fn ucore_fallback(denom: &str) -> Option<(String, i32)> {
    let core = denom.strip_prefix('u')?;
    if core.is_empty() || !core.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    Some((core.to_string(), 0))
}

/// Pull image/socials out of a token URI JSON document.
pub(crate) fn fields_from_uri_json(doc: &Value) -> (Option<String>, TokenMetaPatch) {
    let image = doc["icon"]
        .as_str()
        .or_else(|| doc["image"].as_str())
        .or_else(|| doc["logo"].as_str())
        .map(str::to_string);
    let patch = TokenMetaPatch {
        website: doc["website"].as_str().map(str::to_string),
        twitter: doc["twitter"].as_str().map(str::to_string),
        telegram: doc["telegram"].as_str().map(str::to_string),
        description: doc["description"].as_str().map(str::to_string),
        ..Default::default()
    };
    (image, patch)
}

impl MetadataResolver {
    pub fn new(chain: ChainClient, db: Database, settings: Arc<Settings>) -> Self {
        Self {
            chain,
            db,
            settings,
            registry: RwLock::new(None),
        }
    }

    async fn registry(&self) -> Option<Arc<AssetRegistry>> {
        if !self.settings.use_chain_registry {
            return None;
        }
        if let Some(registry) = self.registry.read().await.as_ref() {
            return Some(registry.clone());
        }
        self.reload_registry().await
    }

    async fn reload_registry(&self) -> Option<Arc<AssetRegistry>> {
        if !self.settings.use_chain_registry {
            return None;
        }
        match self.load_registry().await {
            Ok(registry) => {
                info!("Loaded asset registry ({} keys)", registry.by_key.len());
                let registry = Arc::new(registry);
                *self.registry.write().await = Some(registry.clone());
                Some(registry)
            },
            Err(e) => {
                warn!("Asset registry unavailable: {e:#}");
                self.registry.read().await.clone()
            },
        }
    }

    /// Periodic refresh loop: re-resolves the stalest tokens on the
    /// metadata interval and reloads the registry on its own cadence.
    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let refresh_interval = std::time::Duration::from_secs(self.settings.meta_refresh_sec);
        let registry_interval = std::time::Duration::from_secs(self.settings.registry_poll_sec);
        let mut last_registry_reload = std::time::Instant::now();

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(refresh_interval) => {}
            }

            if self.settings.use_chain_registry
                && last_registry_reload.elapsed() >= registry_interval
            {
                self.reload_registry().await;
                last_registry_reload = std::time::Instant::now();
            }

            let batch = match self
                .db
                .postgres
                .stalest_tokens(self.settings.registry_poll_batch)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Metadata refresh could not pick tokens: {e:#}");
                    continue;
                },
            };

            futures::stream::iter(batch)
                .for_each_concurrent(self.settings.meta_concurrency.max(1), |token| async move {
                    if let Err(e) = self.refresh(&token.denom).await {
                        warn!("Metadata refresh failed for {}: {e:#}", token.denom);
                    }
                })
                .await;
        }

        info!("Metadata refresher stopped");
        Ok(())
    }

    async fn load_registry(&self) -> anyhow::Result<AssetRegistry> {
        let response = self
            .chain
            .get_external(&self.settings.registry_url)
            .await?
            .error_for_status()
            .context("Registry fetch returned an error status")?;
        let assetlist: Value = response.json().await.context("Registry JSON decode failed")?;
        Ok(AssetRegistry::from_json(&assetlist))
    }

    /// Refresh one denom. The token row must already exist (the processor
    /// stubs tokens on first sighting).
    pub async fn refresh(&self, denom: &str) -> anyhow::Result<()> {
        let mut patch = TokenMetaPatch::default();
        let mut lookup_denom = denom.to_string();

        // 1. IBC denoms resolve through their trace first
        if let Some(hash) = denom.strip_prefix(self.settings.ibc_prefix.as_str()) {
            patch.kind = Some("ibc".to_string());
            match self.chain.ibc_denom_trace(hash).await {
                Ok(trace) => {
                    if let Some(base) = trace["denom_trace"]["base_denom"]
                        .as_str()
                        .or_else(|| trace["denom"]["base"].as_str())
                    {
                        lookup_denom = base.to_string();
                    }
                },
                Err(e) => warn!("IBC trace failed for {denom}: {e:#}"),
            }
        }

        // 2. Bank metadata: exponent from the display unit, naming, URI
        let mut uri = None;
        match self.chain.denom_metadata(&lookup_denom).await {
            Ok(response) => {
                let metadata = &response["metadata"];
                patch.exponent = exponent_from_metadata(metadata);
                patch.name = metadata["name"].as_str().map(str::to_string);
                patch.symbol = metadata["symbol"].as_str().map(str::to_string);
                patch.display = metadata["display"].as_str().map(str::to_string);
                patch.description = metadata["description"].as_str().map(str::to_string);
                uri = metadata["uri"].as_str().map(str::to_string);
            },
            Err(e) => warn!("denom metadata unavailable for {lookup_denom}: {e:#}"),
        }

        if patch.exponent.is_none() {
            if patch.kind.as_deref() == Some("ibc") {
                patch.exponent = Some(6);
            } else if let Some((core, exponent)) = ucore_fallback(&lookup_denom) {
                patch.exponent = Some(exponent);
                if patch.symbol.is_none() {
                    patch.symbol = Some(core.clone());
                }
                if patch.display.is_none() {
                    patch.display = Some(core);
                }
            }
        }

        // 3. Token URI: an image directly, or a JSON doc with socials
        if let Some(uri) = uri {
            if let Err(e) = self.apply_uri(&uri, &mut patch).await {
                warn!("Token URI fetch failed for {denom}: {e:#}");
            }
        }

        // 4. Registry fills the gaps and wins on curated naming
        if let Some(registry) = self.registry().await {
            let entry = registry
                .lookup(&lookup_denom)
                .or_else(|| patch.display.as_deref().and_then(|d| registry.lookup(d)))
                .or_else(|| patch.symbol.as_deref().and_then(|s| registry.lookup(s)));
            if let Some(entry) = entry {
                if entry.name.is_some() {
                    patch.name = entry.name.clone();
                }
                if entry.symbol.is_some() {
                    patch.symbol = entry.symbol.clone();
                }
                patch.display = patch.display.or_else(|| entry.display.clone());
                patch.exponent = patch.exponent.or(entry.exponent);
                patch.image = patch.image.or_else(|| entry.image.clone());
                patch.website = patch.website.or_else(|| entry.website.clone());
                patch.twitter = patch.twitter.or_else(|| entry.twitter.clone());
                patch.telegram = patch.telegram.or_else(|| entry.telegram.clone());
                patch.description = patch.description.or_else(|| entry.description.clone());
            }
        }

        // 5. Null patch fields leave existing columns untouched
        self.db.postgres.merge_token_metadata(denom, &patch).await?;

        // 6. Factory supply fields
        if denom.starts_with("factory/") {
            if let Ok(Some(factory)) = self.chain.factory_denom(denom).await {
                let max_supply = factory["max_supply"]
                    .as_str()
                    .or_else(|| factory["denom"]["max_supply"].as_str());
                let total_supply = factory["total_supply"]
                    .as_str()
                    .or_else(|| factory["denom"]["total_supply"].as_str());
                if max_supply.is_some() || total_supply.is_some() {
                    self.db
                        .postgres
                        .update_token_supply(denom, max_supply, total_supply)
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn apply_uri(&self, uri: &str, patch: &mut TokenMetaPatch) -> anyhow::Result<()> {
        let response = self.chain.get_external(uri).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("image/") {
            patch.image = Some(uri.to_string());
            return Ok(());
        }

        if content_type.contains("json") {
            let doc: Value = response.json().await.context("Token URI JSON decode failed")?;
            let (image, uri_patch) = fields_from_uri_json(&doc);
            patch.image = patch.image.take().or(image);
            patch.website = patch.website.take().or(uri_patch.website);
            patch.twitter = patch.twitter.take().or(uri_patch.twitter);
            patch.telegram = patch.telegram.take().or(uri_patch.telegram);
            patch.description = patch.description.take().or(uri_patch.description);
        }

        Ok(())
    }

    /// Walk tokens that never resolved a symbol, oldest first.
    pub async fn backfill(&self) -> anyhow::Result<()> {
        loop {
            let batch = self
                .db
                .postgres
                .tokens_missing_metadata(self.settings.meta_backfill_batch)
                .await?;
            if batch.is_empty() {
                break;
            }

            for token in &batch {
                if let Err(e) = self.refresh(&token.denom).await {
                    warn!("Metadata backfill failed for {}: {e:#}", token.denom);
                }
            }

            if (batch.len() as i64) < self.settings.meta_backfill_batch {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(
                self.settings.meta_backfill_sleep_ms,
            ))
            .await;
        }
        info!("Metadata backfill complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponent_follows_display_unit() {
        let metadata = serde_json::json!({
            "display": "tkn",
            "denom_units": [
                { "denom": "utkn", "exponent": 0 },
                { "denom": "tkn", "exponent": 6 }
            ]
        });
        assert_eq!(exponent_from_metadata(&metadata), Some(6));
    }

    #[test]
    fn exponent_matches_aliases() {
        let metadata = serde_json::json!({
            "display": "TKN",
            "denom_units": [
                { "denom": "utkn", "exponent": 0 },
                { "denom": "tkn", "exponent": 8, "aliases": ["TKN"] }
            ]
        });
        assert_eq!(exponent_from_metadata(&metadata), Some(8));
    }

    #[test]
    fn exponent_missing_when_no_display_match() {
        let metadata = serde_json::json!({
            "display": "tkn",
            "denom_units": [ { "denom": "utkn", "exponent": 0 } ]
        });
        assert_eq!(exponent_from_metadata(&metadata), None);
        assert_eq!(exponent_from_metadata(&serde_json::json!({})), None);
    }

    #[test]
    fn ucore_pattern_fallback() {
        assert_eq!(ucore_fallback("uatom"), Some(("atom".to_string(), 0)));
        assert_eq!(ucore_fallback("factory/zig1abc/x"), None);
        assert_eq!(ucore_fallback("u"), None);
        assert_eq!(ucore_fallback("uT0K"), None);
    }

    #[test]
    fn uri_json_fields() {
        let doc = serde_json::json!({
            "logo": "https://example.org/t.png",
            "website": "https://example.org",
            "twitter": "@tkn",
            "description": "a token"
        });
        let (image, patch) = fields_from_uri_json(&doc);
        assert_eq!(image.as_deref(), Some("https://example.org/t.png"));
        assert_eq!(patch.website.as_deref(), Some("https://example.org"));
        assert_eq!(patch.twitter.as_deref(), Some("@tkn"));
        assert_eq!(patch.telegram, None);
        assert_eq!(patch.description.as_deref(), Some("a token"));
    }

    #[test]
    fn registry_lookup_by_base_display_symbol_alias() {
        let assetlist = serde_json::json!({
            "assets": [{
                "base": "uzig",
                "display": "zig",
                "symbol": "ZIG",
                "name": "ZigChain",
                "denom_units": [
                    { "denom": "uzig", "exponent": 0, "aliases": ["microzig"] },
                    { "denom": "zig", "exponent": 6 }
                ],
                "logo_URIs": { "png": "https://example.org/zig.png" }
            }]
        });

        let registry = AssetRegistry::from_json(&assetlist);
        for key in ["uzig", "zig", "ZIG", "microzig"] {
            let entry = registry.lookup(key).unwrap();
            assert_eq!(entry.symbol.as_deref(), Some("ZIG"));
            assert_eq!(entry.exponent, Some(6));
        }
        assert!(registry.lookup("unknown").is_none());
    }
}
