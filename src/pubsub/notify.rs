use anyhow::Context;
use futures::StreamExt;
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::db::Database;

/// Channel the block processor publishes pair creations on. Must satisfy
/// the identifier grammar checked by `utils::is_valid_channel`.
pub const PAIR_CREATED_CHANNEL: &str = "pair_created";

/// Guard ensuring at most one LISTEN subscription per process. Duplicate
/// listeners would double-seed prices and candles.
static LISTENER_STARTED: OnceCell<()> = OnceCell::new();

/// Payload of a `pair_created` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairCreatedEvent {
    pub pool_id: i64,
    pub pair_contract: String,
    pub base_denom: String,
    pub quote_denom: String,
    pub base_token_id: i64,
    pub quote_token_id: i64,
    pub is_native_quote: bool,
}

impl PairCreatedEvent {
    /// Publish on the pair_created channel; best-effort for the caller.
    pub async fn publish(&self, db: &Database) -> anyhow::Result<()> {
        let payload = serde_json::to_string(self).context("Failed to serialize notification")?;
        db.postgres.notify(PAIR_CREATED_CHANNEL, &payload).await
    }
}

/// Dedicated LISTEN connection feeding decoded payloads into a channel.
pub struct PairCreatedListener {
    db: Database,
    sender: mpsc::Sender<PairCreatedEvent>,
}

impl PairCreatedListener {
    /// Errors if a listener was already started in this process.
    pub fn new(db: Database, sender: mpsc::Sender<PairCreatedEvent>) -> anyhow::Result<Self> {
        LISTENER_STARTED
            .set(())
            .map_err(|_| anyhow::anyhow!("pair_created listener already running in this process"))?;
        Ok(Self { db, sender })
    }

    pub async fn run(self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            match self.listen_once(&cancellation_token).await {
                Ok(()) => break,
                Err(e) => {
                    error!("pair_created listener connection lost: {e:#}");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                },
            }
        }

        info!("pair_created listener stopped");
        Ok(())
    }

    async fn listen_once(&self, cancellation_token: &CancellationToken) -> anyhow::Result<()> {
        let (client, mut connection) = self.db.postgres.connect_raw().await?;

        // The connection must be polled for notifications to flow.
        let mut messages =
            futures::stream::poll_fn(move |cx| connection.poll_message(cx)).boxed();

        client
            .batch_execute(&format!("LISTEN {PAIR_CREATED_CHANNEL}"))
            .await
            .context("LISTEN failed")?;
        info!("Listening on {PAIR_CREATED_CHANNEL}");

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => return Ok(()),

                message = messages.next() => {
                    match message {
                        Some(Ok(tokio_postgres::AsyncMessage::Notification(n))) => {
                            match serde_json::from_str::<PairCreatedEvent>(n.payload()) {
                                Ok(event) => {
                                    if self.sender.send(event).await.is_err() {
                                        // Receiver gone; nothing left to do.
                                        return Ok(());
                                    }
                                },
                                Err(e) => {
                                    warn!("Undecodable pair_created payload: {e}");
                                },
                            }
                        },
                        Some(Ok(_)) => {},
                        Some(Err(e)) => return Err(e.into()),
                        None => anyhow::bail!("LISTEN connection closed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let event = PairCreatedEvent {
            pool_id: 42,
            pair_contract: "zig1pair".to_string(),
            base_denom: "factory/zig1abc/utoken".to_string(),
            quote_denom: "uzig".to_string(),
            base_token_id: 7,
            quote_token_id: 1,
            is_native_quote: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: PairCreatedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn channel_name_is_a_valid_identifier() {
        assert!(crate::utils::is_valid_channel(PAIR_CREATED_CHANNEL));
    }
}
