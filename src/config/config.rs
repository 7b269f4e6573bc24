use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root application configuration.
///
/// Loaded from an optional `config.yaml` plus environment variables; env
/// keys map 1:1 to field names (e.g. `RPC_PRIMARY` -> `rpc_primary`).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    // Chain endpoints
    pub rpc_primary: String,
    #[serde(default)]
    pub rpc_backup: Option<String>,
    pub lcd_primary: String,
    #[serde(default)]
    pub lcd_backup: Option<String>,

    // Contract filters
    pub factory_addr: String,
    #[serde(default)]
    pub router_addr: Option<String>,

    // Chain identity
    #[serde(default = "default_native_denom")]
    pub native_denom: String,
    #[serde(default = "default_ibc_prefix")]
    pub ibc_prefix: String,

    // Database
    pub database_url: String,
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: usize,

    // Block driver
    #[serde(default = "default_block_proc_concurrency")]
    pub block_proc_concurrency: usize,
    #[serde(default = "default_block_proc_max_tasks")]
    pub block_proc_max_tasks: usize,
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
    #[serde(default = "default_poll_sleep_ms")]
    pub poll_sleep_ms: u64,
    /// <= 0 means unbounded
    #[serde(default = "default_max_blocks")]
    pub max_blocks: i64,
    /// Checkpoint heights whose processing errored (observed legacy
    /// behavior). `false` halts the pipeline on the failed height instead.
    #[serde(default = "default_checkpoint_on_error")]
    pub checkpoint_on_error: bool,

    // Batch writers
    #[serde(default = "default_trades_batch_max")]
    pub trades_batch_max: usize,
    #[serde(default = "default_batch_wait_ms")]
    pub trades_batch_wait_ms: u64,
    #[serde(default = "default_state_batch_max")]
    pub state_batch_max: usize,
    #[serde(default = "default_batch_wait_ms")]
    pub state_batch_wait_ms: u64,
    #[serde(default = "default_ohlcv_batch_max")]
    pub ohlcv_batch_max: usize,
    #[serde(default = "default_batch_wait_ms")]
    pub ohlcv_batch_wait_ms: u64,

    // Rollups
    #[serde(default = "default_matrix_rollup_sec")]
    pub matrix_rollup_sec: u64,
    #[serde(default = "default_price_scale_guard")]
    pub price_scale_guard: bool,

    // Holders sweeper
    #[serde(default = "default_holders_refresh_sec")]
    pub holders_refresh_sec: u64,
    #[serde(default = "default_holders_batch_size")]
    pub holders_batch_size: i64,
    #[serde(default = "default_max_holder_pages")]
    pub max_holder_pages_per_cycle: usize,
    #[serde(default = "default_lcd_page_concurrency")]
    pub lcd_page_concurrency: usize,

    // Price-from-reserves ticker
    #[serde(default = "default_price_sim_sec")]
    pub price_sim_sec: u64,
    #[serde(default = "default_price_job_concurrency")]
    pub price_job_concurrency: usize,

    // FX fetcher
    #[serde(default = "default_fx_sec")]
    pub fx_sec: u64,
    #[serde(default)]
    pub cmc_api_key: Option<String>,
    #[serde(default = "default_cmc_symbol")]
    pub cmc_symbol: String,
    #[serde(default = "default_cmc_convert")]
    pub cmc_convert: String,

    // Partition maintainer
    #[serde(default = "default_partitions_sec")]
    pub partitions_sec: u64,
    #[serde(default = "default_partition_months_ahead")]
    pub partition_months_ahead: u32,

    // Metadata resolver
    #[serde(default = "default_meta_refresh_sec")]
    pub meta_refresh_sec: u64,
    #[serde(default)]
    pub meta_backfill: bool,
    #[serde(default = "default_meta_backfill_batch")]
    pub meta_backfill_batch: i64,
    #[serde(default = "default_meta_backfill_sleep_ms")]
    pub meta_backfill_sleep_ms: u64,
    #[serde(default = "default_meta_concurrency")]
    pub meta_concurrency: usize,
    #[serde(default = "default_use_chain_registry")]
    pub use_chain_registry: bool,
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    #[serde(default = "default_registry_poll_sec")]
    pub registry_poll_sec: u64,
    #[serde(default = "default_registry_poll_batch")]
    pub registry_poll_batch: i64,
}

fn default_native_denom() -> String {
    "uzig".to_string()
}

fn default_ibc_prefix() -> String {
    "ibc/".to_string()
}

fn default_db_pool_size() -> usize {
    16
}

fn default_block_proc_concurrency() -> usize {
    12
}

fn default_block_proc_max_tasks() -> usize {
    5000
}

fn default_pipeline_depth() -> usize {
    3
}

fn default_poll_sleep_ms() -> u64 {
    500
}

fn default_max_blocks() -> i64 {
    0
}

fn default_checkpoint_on_error() -> bool {
    true
}

fn default_trades_batch_max() -> usize {
    800
}

fn default_state_batch_max() -> usize {
    400
}

fn default_ohlcv_batch_max() -> usize {
    600
}

fn default_batch_wait_ms() -> u64 {
    120
}

fn default_matrix_rollup_sec() -> u64 {
    60
}

fn default_price_scale_guard() -> bool {
    true
}

fn default_holders_refresh_sec() -> u64 {
    180
}

fn default_holders_batch_size() -> i64 {
    25
}

fn default_max_holder_pages() -> usize {
    40
}

fn default_lcd_page_concurrency() -> usize {
    4
}

fn default_price_sim_sec() -> u64 {
    8
}

fn default_price_job_concurrency() -> usize {
    8
}

fn default_fx_sec() -> u64 {
    36
}

fn default_cmc_symbol() -> String {
    "ZIG".to_string()
}

fn default_cmc_convert() -> String {
    "USD".to_string()
}

fn default_partitions_sec() -> u64 {
    1800
}

fn default_partition_months_ahead() -> u32 {
    3
}

fn default_meta_refresh_sec() -> u64 {
    600
}

fn default_meta_backfill_batch() -> i64 {
    50
}

fn default_meta_backfill_sleep_ms() -> u64 {
    500
}

fn default_meta_concurrency() -> usize {
    3
}

fn default_use_chain_registry() -> bool {
    true
}

fn default_registry_url() -> String {
    "https://raw.githubusercontent.com/cosmos/chain-registry/master/zigchain/assetlist.json"
        .to_string()
}

fn default_registry_poll_sec() -> u64 {
    3600
}

fn default_registry_poll_batch() -> i64 {
    100
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config").required(false))
            // Env values arrive as strings; parse them into the numeric
            // and boolean knobs
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }

    /// Endpoint list in failover order (primary first).
    pub fn rpc_endpoints(&self) -> Vec<String> {
        let mut endpoints = vec![self.rpc_primary.clone()];
        if let Some(backup) = &self.rpc_backup {
            endpoints.push(backup.clone());
        }
        endpoints
    }

    pub fn lcd_endpoints(&self) -> Vec<String> {
        let mut endpoints = vec![self.lcd_primary.clone()];
        if let Some(backup) = &self.lcd_backup {
            endpoints.push(backup.clone());
        }
        endpoints
    }
}
