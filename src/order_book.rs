//! Order Book - one venue's resting orders for one instrument.
//!
//! Price levels live in ordered maps so the touch and any depth are
//! reachable without scanning; orders are looked up by id through a hash
//! index pointing into the arena.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
use crate::error::{BookError, Result};
use crate::event::{Action, MarketEvent, RecordFlags, Side};
use crate::price_level::{BidAskPair, LevelQueue, PriceLevel};

/// Mapping from order id to its arena slot
pub type OrderMap = FxHashMap<u64, ArenaIndex>;

/// Price-ordered levels for one side
pub type LevelMap = BTreeMap<i64, LevelQueue>;

/// Most orders one book can address
pub const MAX_ORDERS: u32 = NULL_INDEX - 1;

/// Pre-allocation for a requested order count, capped at `MAX_ORDERS`.
fn slot_capacity(orders: usize) -> u32 {
    u32::try_from(orders).map_or(MAX_ORDERS, |n| n.min(MAX_ORDERS))
}

/// A resting order as seen from outside the book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Order {
    pub id: u64,
    pub side: Side,
    pub price: i64,
    pub size: u32,
    pub ts_event: u64,
    pub is_tob: bool,
}

impl From<&OrderNode> for Order {
    fn from(node: &OrderNode) -> Self {
        Self {
            id: node.order_id,
            side: node.side,
            price: node.price,
            size: node.size,
            ts_event: node.ts_event,
            is_tob: node.is_tob,
        }
    }
}

/// What applying an event did to the book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new order now rests in the book
    Added,
    /// An order lost part of its size and still rests
    Reduced,
    /// An order left the book
    Removed,
    /// An order changed in place (`requeued == false`) or moved to the
    /// tail of another level
    Modified { requeued: bool },
    /// The whole book was dropped
    Reset,
    /// One side was emptied by a top-of-book record
    SideCleared(Side),
    /// The event does not change resting state (trades, fills)
    Ignored,
    /// Cancel or modify of an id the book does not know
    UnknownOrder,
}

/// Market-by-order book for a single (instrument, venue) pair.
///
/// Invariants:
/// - an order is in exactly one level queue, matching its side and
///   price, iff its id is in the index
/// - no level queue in either map is empty
pub struct Book {
    /// Bid levels, best = highest price
    bids: LevelMap,
    /// Ask levels, best = lowest price
    asks: LevelMap,
    /// Order lookup: id -> arena slot
    orders: OrderMap,
    /// Storage for every resting order
    arena: Arena,
}

impl Book {
    /// Create a new empty book
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new book with room for `orders` resting orders
    pub fn with_capacity(orders: usize) -> Self {
        let capacity = slot_capacity(orders);
        Self {
            bids: LevelMap::new(),
            asks: LevelMap::new(),
            orders: OrderMap::with_capacity_and_hasher(capacity as usize, Default::default()),
            arena: Arena::new(capacity),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Best bid and best ask
    #[inline]
    pub fn best_bid_offer(&self) -> (Option<PriceLevel>, Option<PriceLevel>) {
        (self.best_bid(), self.best_ask())
    }

    /// Highest-priced bid level
    #[inline]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.level_at(Side::Bid, 0)
    }

    /// Lowest-priced ask level
    #[inline]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.level_at(Side::Ask, 0)
    }

    /// The `depth`-th level from the touch on `side` (0 = touch).
    pub fn level_at(&self, side: Side, depth: usize) -> Option<PriceLevel> {
        let queue = match side {
            Side::Bid => self.bids.values().rev().nth(depth),
            Side::Ask => self.asks.values().nth(depth),
        }?;
        Some(PriceLevel::of(queue, &self.arena))
    }

    /// Levels of one side, best first.
    pub fn levels(&self, side: Side) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        let arena = &self.arena;
        match side {
            Side::Bid => Box::new(self.bids.values().rev().map(move |q| PriceLevel::of(q, arena))),
            Side::Ask => Box::new(self.asks.values().map(move |q| PriceLevel::of(q, arena))),
        }
    }

    /// Bid/ask pairs for depths `0..level_count`.
    pub fn depth_snapshot(&self, level_count: usize) -> Vec<BidAskPair> {
        let mut bids = self.levels(Side::Bid);
        let mut asks = self.levels(Side::Ask);
        (0..level_count)
            .map(|_| BidAskPair::new(bids.next(), asks.next()))
            .collect()
    }

    /// Look up a resting order by id.
    #[inline]
    pub fn order(&self, order_id: u64) -> Option<Order> {
        self.orders
            .get(&order_id)
            .map(|&idx| Order::from(self.arena.get(idx)))
    }

    /// Check if an order exists.
    #[inline]
    pub fn contains_order(&self, order_id: u64) -> bool {
        self.orders.contains_key(&order_id)
    }

    /// Ids of the orders at (`side`, `price`) in priority order.
    pub fn queue(&self, side: Side, price: i64) -> Vec<u64> {
        self.side_levels(side)
            .get(&price)
            .map(|q| q.iter(&self.arena).map(|(_, o)| o.order_id).collect())
            .unwrap_or_default()
    }

    /// Get the total number of orders in the book
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Get the number of bid levels
    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    /// Get the number of ask levels
    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// Check if the book is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Best ask minus best bid. Negative when the book is crossed.
    pub fn spread(&self) -> Option<i64> {
        let bid = self.bids.keys().next_back()?;
        let ask = self.asks.keys().next()?;
        Some(ask - bid)
    }

    #[inline]
    fn side_levels(&self, side: Side) -> &LevelMap {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    // ========================================================================
    // Event Application
    // ========================================================================

    /// Apply one event.
    ///
    /// Unknown ids on cancel/modify are not errors: the order may already
    /// be gone through a reset or a replay gap, so they report
    /// [`ApplyOutcome::UnknownOrder`] and leave the book untouched.
    pub fn apply(&mut self, event: &MarketEvent) -> Result<ApplyOutcome> {
        let side = match event.action {
            Action::Trade | Action::Fill => return Ok(ApplyOutcome::Ignored),
            Action::Reset => {
                self.clear();
                return Ok(ApplyOutcome::Reset);
            }
            Action::Add | Action::Cancel | Action::Modify => {
                event.side.ok_or(BookError::MissingSide {
                    action: event.action,
                    order_id: event.order_id,
                })?
            }
        };

        if event.is_side_clear() {
            self.clear_side(side);
            return Ok(ApplyOutcome::SideCleared(side));
        }

        match event.action {
            Action::Add => self.add(side, event),
            Action::Cancel => self.cancel(event),
            Action::Modify => self.modify(side, event),
            Action::Reset | Action::Trade | Action::Fill => Ok(ApplyOutcome::Ignored),
        }
    }

    fn add(&mut self, side: Side, event: &MarketEvent) -> Result<ApplyOutcome> {
        if self.orders.contains_key(&event.order_id) {
            return Err(BookError::DuplicateOrderId {
                order_id: event.order_id,
            });
        }

        let node = OrderNode::new(
            event.order_id,
            side,
            event.price,
            event.size,
            event.ts_event,
            event.flags.contains(RecordFlags::TOB),
        );
        let idx = self.arena.alloc(node);
        self.orders.insert(event.order_id, idx);
        self.insert(idx);
        Ok(ApplyOutcome::Added)
    }

    fn cancel(&mut self, event: &MarketEvent) -> Result<ApplyOutcome> {
        let Some(&idx) = self.orders.get(&event.order_id) else {
            return Ok(ApplyOutcome::UnknownOrder);
        };

        let node = self.arena.get_mut(idx);
        if event.size > node.size {
            return Err(BookError::CancelExceedsSize {
                order_id: event.order_id,
                remaining: node.size,
                requested: event.size,
            });
        }

        node.size -= event.size;
        if node.size == 0 {
            self.remove_order(idx);
            Ok(ApplyOutcome::Removed)
        } else {
            Ok(ApplyOutcome::Reduced)
        }
    }

    fn modify(&mut self, side: Side, event: &MarketEvent) -> Result<ApplyOutcome> {
        let Some(&idx) = self.orders.get(&event.order_id) else {
            return Ok(ApplyOutcome::UnknownOrder);
        };

        let node = self.arena.get(idx);
        let (recorded, price) = (node.side, node.price);
        if recorded != side {
            return Err(BookError::SideChanged {
                order_id: event.order_id,
                recorded,
                requested: side,
            });
        }

        if event.size == 0 {
            self.remove_order(idx);
            return Ok(ApplyOutcome::Removed);
        }

        if price == event.price {
            let node = self.arena.get_mut(idx);
            node.size = event.size;
            node.ts_event = event.ts_event;
            return Ok(ApplyOutcome::Modified { requeued: false });
        }

        self.remove_from_level(idx);
        let node = self.arena.get_mut(idx);
        node.price = event.price;
        node.size = event.size;
        node.ts_event = event.ts_event;
        self.insert(idx);
        Ok(ApplyOutcome::Modified { requeued: true })
    }

    // ========================================================================
    // Level Management
    // ========================================================================

    /// Append an allocated order to the tail of its (side, price) level.
    fn insert(&mut self, idx: ArenaIndex) {
        let node = self.arena.get(idx);
        let price = node.price;
        let levels = match node.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        levels
            .entry(price)
            .or_insert_with(|| LevelQueue::new(price))
            .push_back(&mut self.arena, idx);
    }

    /// Unlink an order from its level, dropping the level if it empties.
    fn remove_from_level(&mut self, idx: ArenaIndex) {
        let node = self.arena.get(idx);
        let price = node.price;
        let levels = match node.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if let Some(level) = levels.get_mut(&price) {
            if level.remove(&mut self.arena, idx) {
                levels.remove(&price);
            }
        }
    }

    /// Take an order out of the book entirely.
    fn remove_order(&mut self, idx: ArenaIndex) {
        self.remove_from_level(idx);
        let node = self.arena.free(idx);
        self.orders.remove(&node.order_id);
    }

    /// Drop every level (and its orders) on one side.
    pub fn clear_side(&mut self, side: Side) {
        let levels = match side {
            Side::Bid => std::mem::take(&mut self.bids),
            Side::Ask => std::mem::take(&mut self.asks),
        };
        let mut removed = 0usize;
        for queue in levels.values() {
            let members: Vec<ArenaIndex> = queue.iter(&self.arena).map(|(idx, _)| idx).collect();
            for idx in members {
                let node = self.arena.free(idx);
                self.orders.remove(&node.order_id);
                removed += 1;
            }
        }
        debug!(?side, levels = levels.len(), orders = removed, "cleared book side");
    }

    /// Clear all orders from the book
    pub fn clear(&mut self) {
        debug!(orders = self.orders.len(), "book reset");
        self.bids.clear();
        self.asks.clear();
        self.orders.clear();
        self.arena.clear();
    }

    /// Pre-fault the order storage.
    pub fn warm_up(&mut self) {
        self.arena.warm_up();
    }

    /// Hash of the full resting state: every level and every queue in
    /// priority order. Two books that saw the same events agree.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for (side, levels) in [(Side::Bid, &self.bids), (Side::Ask, &self.asks)] {
            side.hash(&mut hasher);
            levels.len().hash(&mut hasher);
            for queue in levels.values() {
                queue.price.hash(&mut hasher);
                for (_, node) in queue.iter(&self.arena) {
                    node.order_id.hash(&mut hasher);
                    node.size.hash(&mut hasher);
                    node.ts_event.hash(&mut hasher);
                }
            }
        }
        self.orders.len().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Book")
            .field("best_bid", &self.bids.keys().next_back())
            .field("best_ask", &self.asks.keys().next())
            .field("bid_levels", &self.bids.len())
            .field("ask_levels", &self.asks.len())
            .field("order_count", &self.orders.len())
            .finish()
    }
}

#[cfg(test)]
impl Book {
    /// Check both structural invariants against each other.
    pub(crate) fn assert_consistent(&self) {
        let mut seen = 0usize;
        for (side, levels) in [(Side::Bid, &self.bids), (Side::Ask, &self.asks)] {
            for (&price, queue) in levels {
                assert!(!queue.is_empty(), "empty level {price} left on {side:?}");
                assert_eq!(queue.price, price);
                let mut len = 0u32;
                for (idx, node) in queue.iter(&self.arena) {
                    assert_eq!(node.side, side);
                    assert_eq!(node.price, price);
                    assert_eq!(self.orders.get(&node.order_id), Some(&idx));
                    len += 1;
                }
                assert_eq!(len, queue.len);
                seen += len as usize;
            }
        }
        assert_eq!(seen, self.orders.len());
        assert_eq!(self.arena.allocated() as usize, self.orders.len());
    }
}
