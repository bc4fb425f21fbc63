pub mod feed;
pub mod tick_store;

// Re-export the core market-data types for convenient access
// (e.g. `use crate::market_data::Candle`).
pub use feed::{FeedDispatcher, RawTick};
pub use tick_store::{Candle, Tick, TickStore};
