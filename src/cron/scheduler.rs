use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::db::Database;

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    db: Database,
    settings: Arc<Settings>,
    http: reqwest::Client,
}

impl CronScheduler {
    pub fn new(db: Database, settings: Arc<Settings>, http: reqwest::Client) -> Self {
        Self {
            db,
            settings,
            http,
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_rollup_job(&scheduler).await?;
        self.register_fx_job(&scheduler).await?;
        self.register_partitions_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with 3 jobs");

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_rollup_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let settings = self.settings.clone();
        let interval = settings.matrix_rollup_sec;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let settings = settings.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::rollup_matrices::run(&db, &settings).await {
                        error!("Matrix rollup failed: {e:#}");
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered rollup_matrices job (every {interval}s)");
        Ok(())
    }

    async fn register_fx_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let settings = self.settings.clone();
        let http = self.http.clone();
        let interval = settings.fx_sec;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let settings = settings.clone();
                let http = http.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::fx_rate::run(&db, &http, &settings).await {
                        error!("FX fetch failed: {e:#}");
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered fx_rate job (every {interval}s)");
        Ok(())
    }

    async fn register_partitions_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let settings = self.settings.clone();
        let interval = settings.partitions_sec;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let settings = settings.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::partitions::run(&db, &settings).await {
                        error!("Partition maintenance failed: {e:#}");
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered partitions job (every {interval}s)");
        Ok(())
    }
}
