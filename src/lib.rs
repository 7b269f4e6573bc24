pub mod chain;
pub mod config;
pub mod cron;
pub mod db;
pub mod pubsub;
pub mod utils;
pub mod worker;

pub use chain::ChainClient;
pub use config::Settings;
pub use cron::CronScheduler;
pub use db::Database;
pub use worker::{
    BlockProcessor, FastTrackWorker, HoldersIndexer, MetadataResolver, PipelineDriver,
    ReservesPriceTicker, SecurityScanner,
};
