//! # Flash-Book
//!
//! Market-by-order book reconstruction across venues.
//!
//! Every (instrument, venue) pair gets its own book, rebuilt from a
//! stream of add / cancel / modify / reset events. Books answer touch and
//! depth queries, and the touches of every venue quoting an instrument
//! combine into one aggregated best bid/offer.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One thread owns a book exclusively (no locks on the book)
//! - **Time Priority**: Orders at a price form a FIFO queue; O(1) append and removal
//! - **Cache-Optimized**: 64-byte aligned nodes, 32-bit arena indices
//! - **Exact Prices**: fixed-point integers inside, decimals at the edges
//!
//! ## Architecture
//!
//! ```text
//! [MBO Feed] --> [Market: (instrument, venue) -> Book] --> [BBO / depth / aggregated quote]
//!                        \
//!                         +--> sharded: [SPSC Ring Buffer] --> [Engine Thread] --> [BboBoard]
//! ```

pub mod arena;
pub mod engine;
pub mod error;
pub mod event;
pub mod feed;
pub mod market;
pub mod order_book;
pub mod price_level;
pub mod quote;

// Re-exports for convenience
pub use arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
pub use engine::{BboBoard, BboCell, Engine};
#[cfg(feature = "runtime")]
pub use engine::ShardedMarket;
pub use error::{BookError, EngineError, FeedError};
pub use event::{Action, MarketEvent, RecordFlags, Side, FIXED_PRICE_SCALE, UNDEF_PRICE};
pub use feed::{MboReader, MboRow};
pub use market::{aggregate_bbo, Bbo, BookKey, Market, MarketConfig, MarketStats};
pub use order_book::{ApplyOutcome, Book, Order};
pub use price_level::{price_to_decimal, BidAskPair, LevelQueue, PriceLevel};
pub use quote::Quote;
