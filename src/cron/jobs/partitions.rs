//! Monthly partition maintenance.
//!
//! Keeps N months of child partitions ahead of now for every
//! time-partitioned parent. Idempotent: re-running is a no-op.

use anyhow::Result;
use chrono::{Datelike, Utc};
use log::info;

use crate::config::Settings;
use crate::db::Database;

/// Fixed list of partitioned parents; never derived from input.
const PARTITIONED_TABLES: [&str; 4] =
    ["trades", "price_ticks", "ohlcv_1m", "leaderboard_traders"];

/// (year, month) shifted forward by `offset` months.
pub(crate) fn month_add(year: i32, month: u32, offset: u32) -> (i32, u32) {
    let zero_based = (month - 1) + offset;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

pub async fn run(db: &Database, settings: &Settings) -> Result<()> {
    let now = Utc::now();
    let mut created = 0usize;

    for offset in 0..=settings.partition_months_ahead {
        let (year, month) = month_add(now.year(), now.month(), offset);
        for parent in PARTITIONED_TABLES {
            db.postgres.ensure_month_partition(parent, year, month).await?;
            created += 1;
        }
    }

    info!(
        "Partition maintenance ensured {created} children ({} months ahead)",
        settings.partition_months_ahead
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_arithmetic() {
        assert_eq!(month_add(2024, 1, 0), (2024, 1));
        assert_eq!(month_add(2024, 1, 3), (2024, 4));
        assert_eq!(month_add(2024, 11, 2), (2025, 1));
        assert_eq!(month_add(2024, 12, 0), (2024, 12));
        assert_eq!(month_add(2024, 12, 13), (2026, 1));
    }
}
