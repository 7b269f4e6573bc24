pub mod client;
pub mod events;

pub use client::ChainClient;
pub use events::{EventView, ParsedAsset};
