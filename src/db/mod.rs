use std::sync::Arc;

use crate::config::Settings;

pub mod batch;
pub mod models;
pub mod postgres;

pub use postgres::PostgresClient;

/// Database handle shared across workers.
///
/// All relational state lives in PostgreSQL; the pool is sized from
/// configuration and migrations run before any worker starts.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(&settings.database_url, settings.db_pool_size).await?;
        postgres.migrate().await?;

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }
}
