//! Error types.
//!
//! A rejected event never leaves a book half-updated: every check runs
//! before the first mutation.

use thiserror::Error;

use crate::event::{Action, Side};

/// Errors raised while applying or decoding a single event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    /// A cancel removes more size than the order has left
    #[error("cancel of {requested} exceeds remaining size {remaining} of order {order_id}")]
    CancelExceedsSize {
        order_id: u64,
        remaining: u32,
        requested: u32,
    },

    /// A modify tries to move an order to the other side
    #[error("modify of order {order_id} would change side from {recorded:?} to {requested:?}")]
    SideChanged {
        order_id: u64,
        recorded: Side,
        requested: Side,
    },

    /// An add reuses the id of an order that is still resting
    #[error("order {order_id} is already resting in the book")]
    DuplicateOrderId { order_id: u64 },

    /// A book-mutating event arrived without a side
    #[error("{action:?} event for order {order_id} carries no side")]
    MissingSide { action: Action, order_id: u64 },

    /// Action code outside the known enumeration
    #[error("unknown action code {0:?}")]
    UnknownAction(char),

    /// Side code outside the known enumeration
    #[error("unknown side code {0:?}")]
    UnknownSide(char),
}

impl BookError {
    /// True for errors that mean the feed and the book disagree about an
    /// order (as opposed to a record that could not be decoded).
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            BookError::CancelExceedsSize { .. }
                | BookError::SideChanged { .. }
                | BookError::DuplicateOrderId { .. }
                | BookError::MissingSide { .. }
        )
    }
}

/// Crate result type
pub type Result<T> = std::result::Result<T, BookError>;

/// Errors raised while reading an MBO file.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// A row parsed but does not describe a valid event
    #[error("record {record}: {source}")]
    Decode {
        record: u64,
        #[source]
        source: BookError,
    },
}

/// Errors raised by the sharded runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("shard {0} worker is no longer running")]
    ShardDisconnected(usize),

    #[error("shard {0} worker panicked")]
    WorkerPanicked(usize),

    #[error("failed to start shard {shard}: {reason}")]
    Spawn { shard: usize, reason: String },
}
