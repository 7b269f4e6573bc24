pub mod driver;
pub mod fast_track;
pub mod holders;
pub mod metadata;
pub mod price_ticker;
pub mod processor;
pub mod reserves;
pub mod security;

pub use driver::PipelineDriver;
pub use fast_track::FastTrackWorker;
pub use holders::HoldersIndexer;
pub use metadata::MetadataResolver;
pub use price_ticker::ReservesPriceTicker;
pub use processor::BlockProcessor;
pub use reserves::{price_from_reserves, ReservesCache};
pub use security::SecurityScanner;
