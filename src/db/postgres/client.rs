use std::str::FromStr;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::info;
use tokio_postgres::NoTls;

use crate::utils::is_valid_channel;

/// Break the migration file into executable statements. A semicolon only
/// terminates a statement outside `$$ ... $$` bodies, so plpgsql function
/// definitions survive intact.
fn migration_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut stmt_start = 0;
    let mut pos = 0;
    let mut in_body = false;

    // Both delimiters are single ASCII bytes, so byte offsets are always
    // valid slice boundaries.
    while pos < bytes.len() {
        match bytes[pos] {
            b'$' if bytes.get(pos + 1) == Some(&b'$') => {
                in_body = !in_body;
                pos += 2;
            },
            b';' if !in_body => {
                statements.push(&sql[stmt_start..pos]);
                pos += 1;
                stmt_start = pos;
            },
            _ => pos += 1,
        }
    }
    statements.push(&sql[stmt_start..]);

    statements.retain(|stmt| !stmt.trim().is_empty());
    statements
}

/// PostgreSQL client with connection pooling.
///
/// All relational state lives here: tokens, pools, trades, candles,
/// matrices, holders and the index checkpoint. Uses `deadpool-postgres`
/// for connection management; every session gets conservative statement
/// timeouts so a stuck query cannot wedge a worker.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
    database_url: String,
}

impl PostgresClient {
    pub async fn new(database_url: &str, pool_size: usize) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL");

        let mut pg_config = tokio_postgres::Config::from_str(database_url)
            .context("Invalid DATABASE_URL")?;
        pg_config.options("-c statement_timeout=120000 -c idle_in_transaction_session_timeout=60000");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let mut retries = 0;
        let max_retries = 3;
        loop {
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self {
                        pool,
                        database_url: database_url.to_string(),
                    });
                },
                Err(e) => {
                    retries += 1;
                    if retries >= max_retries {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to PostgreSQL after {max_retries} attempts: {e}"
                        ));
                    }
                    let delay = std::time::Duration::from_millis(100 * 2_u64.pow(retries));
                    log::warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}...",
                        retries,
                        max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        for stmt in migration_statements(&schema) {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            client
                .execute(stmt, &[])
                .await
                .with_context(|| format!("Failed to execute migration statement: {stmt}"))?;
        }

        info!("PostgreSQL schema applied successfully");
        Ok(())
    }

    /// Emit a NOTIFY on `channel` with a JSON payload.
    ///
    /// Channel names are identifiers in the NOTIFY grammar and cannot be
    /// bound as parameters, so they are validated before use; the payload
    /// goes through pg_notify and stays parameterized.
    pub async fn notify(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            is_valid_channel(channel),
            "Invalid notification channel name: {channel}"
        );
        let client = self.pool.get().await?;
        client
            .execute("SELECT pg_notify($1, $2)", &[&channel, &payload])
            .await
            .with_context(|| format!("NOTIFY {channel} failed"))?;
        Ok(())
    }

    /// Open a dedicated connection for LISTEN. The pool recycles sessions,
    /// which would silently drop subscriptions, so listeners bypass it.
    pub async fn connect_raw(
        &self,
    ) -> anyhow::Result<(tokio_postgres::Client, tokio_postgres::Connection<tokio_postgres::Socket, tokio_postgres::tls::NoTlsStream>)>
    {
        tokio_postgres::connect(&self.database_url, NoTls)
            .await
            .context("Failed to open dedicated LISTEN connection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_bodies_are_not_split() {
        let sql = "CREATE TABLE a (id int); CREATE FUNCTION f() RETURNS void AS $$ BEGIN; END $$ LANGUAGE plpgsql; SELECT 1";
        let stmts = migration_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].contains("BEGIN; END"));
    }

    #[test]
    fn trailing_and_empty_statements_are_dropped() {
        let stmts = migration_statements("SELECT 1;\n\n;  ;\nSELECT 2");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1].trim(), "SELECT 2");
        assert!(migration_statements("  \n ").is_empty());
    }
}
