//! Internal pub/sub over PostgreSQL NOTIFY/LISTEN.
//!
//! Pair creations are published on the `pair_created` channel when the
//! block processor commits them; the fast-track listener consumes them to
//! seed metadata, holders and the initial price/candle.

mod notify;

pub use notify::{PairCreatedEvent, PairCreatedListener, PAIR_CREATED_CHANNEL};
