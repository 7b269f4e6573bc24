pub mod alert;
pub mod candle;
pub mod checkpoint;
pub mod fx;
pub mod holder;
pub mod matrix;
pub mod pool;
pub mod price;
pub mod token;
pub mod trade;

pub use alert::AlertParams;
pub use candle::{Candle, CandleTick};
pub use checkpoint::IndexCheckpoint;
pub use fx::FxRate;
pub use holder::{Holder, HolderStats};
pub use matrix::{Bucket, PoolMatrixRow, TokenMatrixRow};
pub use pool::{PairType, Pool, PoolState};
pub use price::{PoolPrice, PriceTick};
pub use token::{Token, TokenKind};
pub use trade::{Trade, TradeAction, TradeDirection};
