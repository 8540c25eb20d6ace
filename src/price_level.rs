//! Price levels - the FIFO queue of orders at one price and its
//! derived snapshot.
//!
//! `LevelQueue` is a doubly-linked list using arena indices for O(1)
//! append and O(1) removal from any position. `PriceLevel` is what
//! callers see: a value folded from the queue's members on demand.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
use crate::event::FIXED_PRICE_SCALE;

/// Number of decimal places implied by [`FIXED_PRICE_SCALE`].
const PRICE_DECIMALS: u32 = FIXED_PRICE_SCALE.ilog10();

/// Convert a fixed-point price into an exact decimal.
#[inline]
pub fn price_to_decimal(price: i64) -> Decimal {
    Decimal::new(price, PRICE_DECIMALS)
}

/// The queue of orders resting at a specific price on one side.
///
/// Orders are kept in arrival order (time priority).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelQueue {
    /// Price shared by every member
    pub price: i64,
    /// Index of the oldest order (highest priority)
    pub head: ArenaIndex,
    /// Index of the newest order
    pub tail: ArenaIndex,
    /// Number of orders at this level
    pub len: u32,
}

impl LevelQueue {
    /// Create a new empty queue at `price`
    #[inline]
    pub const fn new(price: i64) -> Self {
        Self {
            price,
            head: NULL_INDEX,
            tail: NULL_INDEX,
            len: 0,
        }
    }

    /// Returns true if there are no orders at this level
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append an order to the tail of the queue (lowest priority).
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn push_back(&mut self, arena: &mut Arena, index: ArenaIndex) {
        debug_assert_eq!(arena.get(index).price, self.price);

        if self.tail == NULL_INDEX {
            debug_assert!(self.head == NULL_INDEX);
            self.head = index;
            self.tail = index;
            let node = arena.get_mut(index);
            node.prev = NULL_INDEX;
            node.next = NULL_INDEX;
        } else {
            arena.get_mut(self.tail).next = index;
            let node = arena.get_mut(index);
            node.prev = self.tail;
            node.next = NULL_INDEX;
            self.tail = index;
        }

        self.len += 1;
    }

    /// Unlink an order from anywhere in the queue.
    ///
    /// # Returns
    /// `true` if the level is now empty, `false` otherwise.
    /// The order is NOT freed from the arena; caller must do that.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn remove(&mut self, arena: &mut Arena, index: ArenaIndex) -> bool {
        let node = arena.get(index);
        let prev_idx = node.prev;
        let next_idx = node.next;

        if prev_idx == NULL_INDEX {
            debug_assert!(self.head == index);
            self.head = next_idx;
        } else {
            arena.get_mut(prev_idx).next = next_idx;
        }

        if next_idx == NULL_INDEX {
            debug_assert!(self.tail == index);
            self.tail = prev_idx;
        } else {
            arena.get_mut(next_idx).prev = prev_idx;
        }

        self.len -= 1;

        let node = arena.get_mut(index);
        node.prev = NULL_INDEX;
        node.next = NULL_INDEX;

        self.len == 0
    }

    /// Walk the members from highest to lowest priority.
    #[inline]
    pub fn iter<'a>(&self, arena: &'a Arena) -> LevelIter<'a> {
        LevelIter {
            arena,
            cursor: self.head,
        }
    }
}

/// Iterator over the orders of a [`LevelQueue`] in priority order.
pub struct LevelIter<'a> {
    arena: &'a Arena,
    cursor: ArenaIndex,
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = (ArenaIndex, &'a OrderNode);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NULL_INDEX {
            return None;
        }
        let index = self.cursor;
        let node = self.arena.get(index);
        self.cursor = node.next;
        Some((index, node))
    }
}

/// Aggregate view of one price level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PriceLevel {
    /// Fixed-point price
    pub price: i64,
    /// Sum of member sizes
    pub size: u64,
    /// Number of non-synthetic members
    pub count: u32,
    /// Latest timestamp among members
    pub ts_event: u64,
}

impl PriceLevel {
    /// Fold a queue's members into a snapshot.
    pub fn of(queue: &LevelQueue, arena: &Arena) -> Self {
        queue.iter(arena).fold(
            PriceLevel {
                price: queue.price,
                ..PriceLevel::default()
            },
            |mut level, (_, order)| {
                level.size += u64::from(order.size);
                level.count += u32::from(!order.is_tob);
                level.ts_event = level.ts_event.max(order.ts_event);
                level
            },
        )
    }

    /// Price as an exact decimal
    #[inline]
    pub fn price_decimal(&self) -> Decimal {
        price_to_decimal(self.price)
    }
}

impl fmt::Display for PriceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let price = self.price_decimal().round_dp(2).to_string();
        write!(
            f,
            "{:4} @ {:>6} | {:2} order(s) | ts_event: {}",
            self.size, price, self.count, self.ts_event
        )
    }
}

/// One row of a depth snapshot. Absent sides are zero-filled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct BidAskPair {
    pub bid_px: i64,
    pub ask_px: i64,
    pub bid_sz: u64,
    pub ask_sz: u64,
    pub bid_ct: u32,
    pub ask_ct: u32,
}

impl BidAskPair {
    pub fn new(bid: Option<PriceLevel>, ask: Option<PriceLevel>) -> Self {
        let mut pair = BidAskPair::default();
        if let Some(bid) = bid {
            pair.bid_px = bid.price;
            pair.bid_sz = bid.size;
            pair.bid_ct = bid.count;
        }
        if let Some(ask) = ask {
            pair.ask_px = ask.price;
            pair.ask_sz = ask.size;
            pair.ask_ct = ask.count;
        }
        pair
    }
}
