//! Engine - event loop, published touches and the sharded runtime.
//!
//! Each [`Engine`] owns a [`Market`] exclusively and is the only writer
//! of its books. After every event that changes a book it publishes
//! that book's best bid/offer to a shared [`BboBoard`], so aggregated
//! queries from other threads never touch the books themselves.
//!
//! ```text
//! [Feed Thread] --route by (instrument, venue)--> [SPSC Ring Buffer] --> [Shard Thread (Pinned)]
//!                                                                               |
//!                                                                      [BboBoard cells] <-- readers
//! ```

#[cfg(feature = "runtime")]
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::event::MarketEvent;
use crate::market::{aggregate_bbo, Bbo, BookKey, Market, MarketConfig};
use crate::order_book::ApplyOutcome;

/// Latest published touch of one book.
///
/// Writes are a copy of two small values, so readers wait at most for
/// that copy.
#[derive(Debug, Default)]
pub struct BboCell(RwLock<Bbo>);

impl BboCell {
    #[inline]
    pub fn load(&self) -> Bbo {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn store(&self, bbo: Bbo) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = bbo;
    }
}

/// Registry of published touches, by instrument then venue.
///
/// The registry lock is only taken for writing when a book is seen for
/// the first time; publishing goes through the book's own cell.
#[derive(Debug, Default)]
pub struct BboBoard {
    venues: RwLock<FxHashMap<u32, Vec<(u16, Arc<BboCell>)>>>,
}

impl BboBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cell of a book, registering it on first use.
    pub fn cell(&self, key: BookKey) -> Arc<BboCell> {
        if let Some(cell) = self.find(key) {
            return cell;
        }

        let mut venues = self.venues.write().unwrap_or_else(PoisonError::into_inner);
        let cells = venues.entry(key.instrument_id).or_default();
        // Another writer may have registered it between the two locks
        if let Some((_, cell)) = cells.iter().find(|(venue, _)| *venue == key.publisher_id) {
            return Arc::clone(cell);
        }
        let cell = Arc::new(BboCell::default());
        cells.push((key.publisher_id, Arc::clone(&cell)));
        cells.sort_unstable_by_key(|(venue, _)| *venue);
        cell
    }

    fn find(&self, key: BookKey) -> Option<Arc<BboCell>> {
        let venues = self.venues.read().unwrap_or_else(PoisonError::into_inner);
        venues
            .get(&key.instrument_id)?
            .iter()
            .find(|(venue, _)| *venue == key.publisher_id)
            .map(|(_, cell)| Arc::clone(cell))
    }

    /// Publish a book's touch.
    pub fn publish(&self, key: BookKey, bbo: Bbo) {
        self.cell(key).store(bbo);
    }

    /// Last published touch of one book.
    pub fn best_bid_offer(&self, key: BookKey) -> Option<Bbo> {
        self.find(key).map(|cell| cell.load())
    }

    /// Aggregate of the last published touches of every venue.
    ///
    /// Each venue's touch is internally consistent; venues may be read at
    /// slightly different points in their streams. The registry lock is
    /// released before any cell is read.
    pub fn aggregated_best_bid_offer(&self, instrument_id: u32) -> Bbo {
        let cells: Vec<Arc<BboCell>> = {
            let venues = self.venues.read().unwrap_or_else(PoisonError::into_inner);
            match venues.get(&instrument_id) {
                Some(cells) => cells.iter().map(|(_, cell)| Arc::clone(cell)).collect(),
                None => return (None, None),
            }
        };
        aggregate_bbo(cells.iter().map(|cell| cell.load()))
    }

    /// Instruments with at least one published book, ascending.
    pub fn instruments(&self) -> Vec<u32> {
        let venues = self.venues.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<u32> = venues.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Single writer over a set of books.
pub struct Engine {
    market: Market,
    board: Arc<BboBoard>,
    /// Cells already resolved, so publishing skips the registry
    cells: FxHashMap<BookKey, Arc<BboCell>>,
}

impl Engine {
    pub fn new(config: MarketConfig, board: Arc<BboBoard>) -> Self {
        Self {
            market: Market::with_config(config),
            board,
            cells: FxHashMap::default(),
        }
    }

    /// Apply one event and publish the touched book's new touch.
    ///
    /// This is the entry point for synchronous usage (tests, benchmarks).
    #[inline]
    pub fn process_event(&mut self, event: &MarketEvent) -> Result<ApplyOutcome> {
        let outcome = self.market.apply(event)?;
        if !matches!(outcome, ApplyOutcome::Ignored | ApplyOutcome::UnknownOrder) {
            self.publish(BookKey::from(event));
        }
        Ok(outcome)
    }

    fn publish(&mut self, key: BookKey) {
        let Some(book) = self.market.book(key.instrument_id, key.publisher_id) else {
            return;
        };
        let bbo = book.best_bid_offer();
        let board = &self.board;
        self.cells
            .entry(key)
            .or_insert_with(|| board.cell(key))
            .store(bbo);
    }

    /// Drain events until the producer is gone and the queue is empty.
    ///
    /// Rejected events are logged by the market and skipped. `applied`
    /// is bumped after each event, once its touch is published.
    #[cfg(feature = "runtime")]
    pub fn run(&mut self, mut input: rtrb::Consumer<MarketEvent>, applied: &AtomicU64) {
        loop {
            match input.pop() {
                Ok(event) => {
                    let _ = self.process_event(&event);
                    applied.fetch_add(1, Ordering::Release);
                }
                Err(_) if input.is_abandoned() => {
                    // Producer may have pushed right before leaving
                    while let Ok(event) = input.pop() {
                        let _ = self.process_event(&event);
                        applied.fetch_add(1, Ordering::Release);
                    }
                    return;
                }
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn board(&self) -> &Arc<BboBoard> {
        &self.board
    }

    pub fn into_market(self) -> Market {
        self.market
    }
}

/// Pin the current thread to a core, wrapping around the available set.
///
/// Returns false when core ids cannot be read or pinning fails.
pub fn pin_to_core(index: usize) -> bool {
    match core_affinity::get_core_ids() {
        Some(core_ids) if !core_ids.is_empty() => {
            core_affinity::set_for_current(core_ids[index % core_ids.len()])
        }
        _ => false,
    }
}

#[cfg(feature = "runtime")]
pub use sharded::ShardedMarket;

#[cfg(feature = "runtime")]
mod sharded {
    use std::hash::{Hash, Hasher};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};

    use rtrb::{Producer, PushError, RingBuffer};
    use rustc_hash::FxHasher;
    use tracing::{debug, info};

    use super::{pin_to_core, BboBoard, Engine};
    use crate::error::EngineError;
    use crate::event::MarketEvent;
    use crate::market::{BookKey, Market, MarketConfig};
    use crate::quote::Quote;

    /// Books partitioned across worker threads.
    ///
    /// Every event for a given (instrument, venue) goes to the same shard,
    /// so each book sees its events in submission order.
    pub struct ShardedMarket {
        producers: Vec<Producer<MarketEvent>>,
        workers: Vec<JoinHandle<Market>>,
        board: Arc<BboBoard>,
        /// Events pushed to each shard
        submitted: Vec<u64>,
        /// Events each shard has taken off its queue and applied
        applied: Vec<Arc<AtomicU64>>,
    }

    impl ShardedMarket {
        /// Start `shards` workers, each behind a ring buffer of
        /// `queue_capacity` events.
        pub fn spawn(
            shards: usize,
            queue_capacity: usize,
            config: MarketConfig,
            pin: bool,
        ) -> Result<Self, EngineError> {
            let shards = shards.max(1);
            let board = Arc::new(BboBoard::new());
            let mut producers = Vec::with_capacity(shards);
            let mut workers = Vec::with_capacity(shards);
            let mut applied = Vec::with_capacity(shards);

            for shard in 0..shards {
                let (producer, consumer) = RingBuffer::new(queue_capacity.max(1));
                let mut engine = Engine::new(config, Arc::clone(&board));
                let progress = Arc::new(AtomicU64::new(0));
                let counter = Arc::clone(&progress);
                let worker = thread::Builder::new()
                    .name(format!("book-shard-{shard}"))
                    .spawn(move || {
                        if pin && !pin_to_core(shard) {
                            debug!(shard, "core pinning unavailable");
                        }
                        engine.run(consumer, &counter);
                        let stats = engine.market().stats();
                        info!(
                            shard,
                            events = stats.events,
                            rejected = stats.rejected,
                            books = engine.market().book_count(),
                            "shard drained"
                        );
                        engine.into_market()
                    })
                    .map_err(|err| EngineError::Spawn {
                        shard,
                        reason: err.to_string(),
                    })?;
                producers.push(producer);
                workers.push(worker);
                applied.push(progress);
            }

            info!(shards, queue_capacity, "sharded market started");
            Ok(Self {
                producers,
                workers,
                board,
                submitted: vec![0; shards],
                applied,
            })
        }

        pub fn shard_count(&self) -> usize {
            self.producers.len()
        }

        /// Shard owning a book.
        pub fn shard_for(&self, key: BookKey) -> usize {
            let mut hasher = FxHasher::default();
            key.hash(&mut hasher);
            (hasher.finish() % self.producers.len() as u64) as usize
        }

        /// Queue an event for its book's shard, waiting while the queue is full.
        ///
        /// Fails once the shard's worker has stopped, full queue or not.
        pub fn submit(&mut self, event: MarketEvent) -> Result<(), EngineError> {
            let shard = self.shard_for(BookKey::from(&event));
            let producer = &mut self.producers[shard];
            let mut pending = event;
            loop {
                if producer.is_abandoned() {
                    return Err(EngineError::ShardDisconnected(shard));
                }
                match producer.push(pending) {
                    Ok(()) => {
                        self.submitted[shard] += 1;
                        return Ok(());
                    }
                    Err(PushError::Full(event)) => {
                        pending = event;
                        thread::yield_now();
                    }
                }
            }
        }

        /// Wait until every shard has applied everything submitted so far.
        ///
        /// Afterwards the board holds the touches a sequential replay of the
        /// same stream would have.
        pub fn flush(&self) -> Result<(), EngineError> {
            for (shard, (applied, &submitted)) in self.applied.iter().zip(&self.submitted).enumerate() {
                while applied.load(Ordering::Acquire) < submitted {
                    if self.producers[shard].is_abandoned() {
                        return Err(EngineError::ShardDisconnected(shard));
                    }
                    thread::yield_now();
                }
            }
            Ok(())
        }

        /// Aggregated quote of an instrument over every submitted event.
        pub fn quote(&self, instrument_id: u32, ts_event: u64) -> Result<Option<Quote>, EngineError> {
            self.flush()?;
            let bbo = self.board.aggregated_best_bid_offer(instrument_id);
            Ok(Quote::from_bbo(instrument_id, ts_event, bbo))
        }

        /// Published touches, readable while the shards run.
        pub fn board(&self) -> Arc<BboBoard> {
            Arc::clone(&self.board)
        }

        /// Close the queues, let every shard drain, and return their markets.
        pub fn shutdown(self) -> Result<Vec<Market>, EngineError> {
            drop(self.producers);
            self.workers
                .into_iter()
                .enumerate()
                .map(|(shard, worker)| worker.join().map_err(|_| EngineError::WorkerPanicked(shard)))
                .collect()
        }
    }

}
