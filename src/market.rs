//! Market - every book of the session, keyed by (instrument, venue).
//!
//! Books are created on the first event for a new pair and live for the
//! rest of the process. The market also owns cross-venue aggregation of
//! the touch.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event::MarketEvent;
use crate::order_book::{ApplyOutcome, Book};
use crate::price_level::PriceLevel;
use crate::quote::Quote;

/// Best bid and best ask of one book or of an aggregate
pub type Bbo = (Option<PriceLevel>, Option<PriceLevel>);

/// Identifies one venue's book for one instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookKey {
    pub instrument_id: u32,
    pub publisher_id: u16,
}

impl BookKey {
    pub const fn new(instrument_id: u32, publisher_id: u16) -> Self {
        Self {
            instrument_id,
            publisher_id,
        }
    }
}

impl From<&MarketEvent> for BookKey {
    fn from(event: &MarketEvent) -> Self {
        Self::new(event.instrument_id, event.publisher_id)
    }
}

/// Market behavior knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketConfig {
    /// Report cancel/modify of unknown order ids as warnings instead of
    /// tracing them quietly. They stay no-ops either way.
    pub strict: bool,

    /// Orders to pre-allocate in every new book
    pub order_capacity: usize,
}

impl MarketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable/disable warnings for unknown order ids.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the per-book order pre-allocation.
    pub fn with_order_capacity(mut self, orders: usize) -> Self {
        self.order_capacity = orders;
        self
    }
}

/// Counters for monitoring feed health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketStats {
    /// Events applied successfully
    pub events: u64,
    /// Events rejected with an error
    pub rejected: u64,
    /// Cancels/modifies of ids no book knew
    pub unknown_orders: u64,
    /// Whole-book resets
    pub resets: u64,
    /// Top-of-book side clears
    pub side_clears: u64,
    /// Trades and fills (no book change)
    pub ignored: u64,
}

/// Registry of every book in the session.
#[derive(Debug, Default)]
pub struct Market {
    /// instrument -> venue -> book
    books: FxHashMap<u32, BTreeMap<u16, Book>>,
    config: MarketConfig,
    stats: MarketStats,
}

impl Market {
    /// Create a new empty market
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MarketConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Route one event to its book, creating the book if needed.
    pub fn apply(&mut self, event: &MarketEvent) -> Result<ApplyOutcome> {
        let capacity = self.config.order_capacity;
        let book = self
            .books
            .entry(event.instrument_id)
            .or_default()
            .entry(event.publisher_id)
            .or_insert_with(|| {
                let mut book = Book::with_capacity(capacity);
                if capacity > 0 {
                    book.warm_up();
                }
                book
            });

        match book.apply(event) {
            Ok(outcome) => {
                self.record(event, outcome);
                Ok(outcome)
            }
            Err(err) => {
                self.stats.rejected += 1;
                warn!(
                    instrument_id = event.instrument_id,
                    publisher_id = event.publisher_id,
                    order_id = event.order_id,
                    ts_event = event.ts_event,
                    error = %err,
                    "rejected event"
                );
                Err(err)
            }
        }
    }

    fn record(&mut self, event: &MarketEvent, outcome: ApplyOutcome) {
        self.stats.events += 1;
        match outcome {
            ApplyOutcome::UnknownOrder => {
                self.stats.unknown_orders += 1;
                if self.config.strict {
                    warn!(
                        instrument_id = event.instrument_id,
                        publisher_id = event.publisher_id,
                        order_id = event.order_id,
                        action = ?event.action,
                        "event for unknown order ignored"
                    );
                } else {
                    trace!(order_id = event.order_id, action = ?event.action, "unknown order");
                }
            }
            ApplyOutcome::Reset => {
                self.stats.resets += 1;
                debug!(
                    instrument_id = event.instrument_id,
                    publisher_id = event.publisher_id,
                    "book reset"
                );
            }
            ApplyOutcome::SideCleared(_) => self.stats.side_clears += 1,
            ApplyOutcome::Ignored => self.stats.ignored += 1,
            ApplyOutcome::Added
            | ApplyOutcome::Reduced
            | ApplyOutcome::Removed
            | ApplyOutcome::Modified { .. } => {}
        }
    }

    /// The book of one venue for one instrument, if it has seen an event.
    pub fn book(&self, instrument_id: u32, publisher_id: u16) -> Option<&Book> {
        self.books.get(&instrument_id)?.get(&publisher_id)
    }

    /// Every venue's book for an instrument, by publisher id.
    pub fn books_for(&self, instrument_id: u32) -> impl Iterator<Item = (u16, &Book)> {
        self.books
            .get(&instrument_id)
            .into_iter()
            .flat_map(|venues| venues.iter().map(|(&publisher_id, book)| (publisher_id, book)))
    }

    /// Instruments with at least one book, ascending.
    pub fn instruments(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.books.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Total number of books
    pub fn book_count(&self) -> usize {
        self.books.values().map(BTreeMap::len).sum()
    }

    /// Total resting orders across all books
    pub fn order_count(&self) -> usize {
        self.books
            .values()
            .flat_map(BTreeMap::values)
            .map(Book::order_count)
            .sum()
    }

    /// Hash over every book in (instrument, venue) order.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for instrument_id in self.instruments() {
            for (publisher_id, book) in self.books_for(instrument_id) {
                (instrument_id, publisher_id, book.state_hash()).hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    pub fn stats(&self) -> MarketStats {
        self.stats
    }

    pub fn config(&self) -> MarketConfig {
        self.config
    }

    /// Best price across all venues for each side of an instrument.
    ///
    /// Sides are computed independently, so the result may be crossed
    /// when venues disagree.
    pub fn aggregated_best_bid_offer(&self, instrument_id: u32) -> Bbo {
        aggregate_bbo(self.books_for(instrument_id).map(|(_, book)| book.best_bid_offer()))
    }

    /// Quote derived from the aggregated touch; `None` if both sides are empty.
    pub fn quote(&self, instrument_id: u32, ts_event: u64) -> Option<Quote> {
        Quote::from_bbo(instrument_id, ts_event, self.aggregated_best_bid_offer(instrument_id))
    }
}

/// Combine per-venue touches into one.
///
/// For each side, keeps the best price (highest bid, lowest ask); levels
/// at exactly that price have their sizes and counts summed and the
/// latest timestamp kept.
pub fn aggregate_bbo<I>(venues: I) -> Bbo
where
    I: IntoIterator<Item = Bbo>,
{
    venues
        .into_iter()
        .fold((None, None), |(bid, ask), (venue_bid, venue_ask)| {
            (
                merge_best(bid, venue_bid, |a, b| a > b),
                merge_best(ask, venue_ask, |a, b| a < b),
            )
        })
}

fn merge_best(
    best: Option<PriceLevel>,
    candidate: Option<PriceLevel>,
    better: impl Fn(i64, i64) -> bool,
) -> Option<PriceLevel> {
    match (best, candidate) {
        (best, None) => best,
        (None, candidate) => candidate,
        (Some(best), Some(candidate)) if candidate.price == best.price => Some(PriceLevel {
            price: best.price,
            size: best.size + candidate.size,
            count: best.count + candidate.count,
            ts_event: best.ts_event.max(candidate.ts_event),
        }),
        (Some(best), Some(candidate)) if better(candidate.price, best.price) => Some(candidate),
        (best, Some(_)) => best,
    }
}
