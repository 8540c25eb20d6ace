//! Market event types fed into the book.
//!
//! Events are normalized market-by-order records: one action against one
//! order on one venue's book for one instrument.

use bitflags::bitflags;
use serde::Serialize;

use crate::error::BookError;

/// Sentinel price meaning "no price" (e.g. a side that is now empty).
pub const UNDEF_PRICE: i64 = i64::MAX;

/// Fixed-point scale of event prices: 1 unit = 1e-9.
pub const FIXED_PRICE_SCALE: i64 = 1_000_000_000;

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    #[default]
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Decode an ASCII side code. `'N'` means the event carries no side.
    pub fn from_code(code: u8) -> Result<Option<Self>, BookError> {
        match code {
            b'B' => Ok(Some(Side::Bid)),
            b'A' => Ok(Some(Side::Ask)),
            b'N' => Ok(None),
            other => Err(BookError::UnknownSide(other as char)),
        }
    }

    /// ASCII code of this side
    #[inline]
    pub const fn code(self) -> char {
        match self {
            Side::Bid => 'B',
            Side::Ask => 'A',
        }
    }
}

/// What an event does to the book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Action {
    /// A new order rests in the book
    Add,
    /// Size is removed from a resting order
    Cancel,
    /// A resting order changes price and/or size
    Modify,
    /// The venue resynchronizes: the whole book is dropped
    Reset,
    /// An execution was reported (book unchanged)
    Trade,
    /// A fill was reported (book unchanged)
    Fill,
}

impl Action {
    /// ASCII code of this action
    pub const fn code(self) -> char {
        match self {
            Action::Add => 'A',
            Action::Cancel => 'C',
            Action::Modify => 'M',
            Action::Reset => 'R',
            Action::Trade => 'T',
            Action::Fill => 'F',
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = BookError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            b'A' => Ok(Action::Add),
            b'C' => Ok(Action::Cancel),
            b'M' => Ok(Action::Modify),
            b'R' => Ok(Action::Reset),
            b'T' => Ok(Action::Trade),
            b'F' => Ok(Action::Fill),
            other => Err(BookError::UnknownAction(other as char)),
        }
    }
}

bitflags! {
    /// Per-record flags set by the venue.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Last record of an event for this instrument; the book is consistent after it
        const LAST = 1 << 7;
        /// Top-of-book record: the venue only publishes its touch
        const TOB = 1 << 6;
        /// Record belongs to a snapshot replay
        const SNAPSHOT = 1 << 5;
        /// Aggregated price-level record
        const MBP = 1 << 4;
        /// Receive timestamp is unreliable
        const BAD_TS_RECV = 1 << 3;
        /// A gap was detected upstream; the book may be wrong
        const MAYBE_BAD_BOOK = 1 << 2;
    }
}

/// A single normalized market-by-order event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketEvent {
    /// Venue clock timestamp in nanoseconds
    pub ts_event: u64,
    /// What happened
    pub action: Action,
    /// Order side; `None` for resets and some trades
    pub side: Option<Side>,
    /// Venue-scoped order id
    pub order_id: u64,
    /// Fixed-point price or [`UNDEF_PRICE`]
    pub price: i64,
    /// Order size (or size removed, for cancels)
    pub size: u32,
    /// Instrument the order belongs to
    pub instrument_id: u32,
    /// Venue / publisher that emitted the event
    pub publisher_id: u16,
    /// Record flags
    pub flags: RecordFlags,
}

impl MarketEvent {
    /// Create an event on instrument 0, publisher 0, timestamp 0, no flags.
    pub fn new(action: Action, side: Option<Side>, order_id: u64, price: i64, size: u32) -> Self {
        Self {
            ts_event: 0,
            action,
            side,
            order_id,
            price,
            size,
            instrument_id: 0,
            publisher_id: 0,
            flags: RecordFlags::empty(),
        }
    }

    pub fn add(side: Side, order_id: u64, price: i64, size: u32) -> Self {
        Self::new(Action::Add, Some(side), order_id, price, size)
    }

    pub fn cancel(side: Side, order_id: u64, price: i64, size: u32) -> Self {
        Self::new(Action::Cancel, Some(side), order_id, price, size)
    }

    pub fn modify(side: Side, order_id: u64, price: i64, size: u32) -> Self {
        Self::new(Action::Modify, Some(side), order_id, price, size)
    }

    pub fn reset() -> Self {
        Self::new(Action::Reset, None, 0, UNDEF_PRICE, 0)
    }

    /// A top-of-book record announcing that `side` is now empty.
    pub fn clear_side(side: Side) -> Self {
        Self::new(Action::Add, Some(side), 0, UNDEF_PRICE, 0).with_flags(RecordFlags::TOB)
    }

    /// Set the event timestamp
    pub fn at(mut self, ts_event: u64) -> Self {
        self.ts_event = ts_event;
        self
    }

    /// Route the event to an (instrument, publisher) book
    pub fn on(mut self, instrument_id: u32, publisher_id: u16) -> Self {
        self.instrument_id = instrument_id;
        self.publisher_id = publisher_id;
        self
    }

    /// Add record flags
    pub fn with_flags(mut self, flags: RecordFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// True when this record closes a venue event and the book may be read
    #[inline]
    pub fn is_last(&self) -> bool {
        self.flags.contains(RecordFlags::LAST)
    }

    /// True when this record empties one side of a top-of-book-only venue
    #[inline]
    pub fn is_side_clear(&self) -> bool {
        self.price == UNDEF_PRICE && self.flags.contains(RecordFlags::TOB)
    }
}
