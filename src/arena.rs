//! Order Arena - slab of cache-line aligned order nodes.
//!
//! Every resting order of a book lives in exactly one arena slot. The
//! order-id index and the level queue both refer to that slot by index,
//! so there is never a second copy of an order to keep in sync.
//! Freed slots are recycled through a free list; the arena grows when
//! the free list is exhausted.

use std::fmt;

use crate::event::Side;

/// Link value meaning "no node"
pub const NULL_INDEX: u32 = u32::MAX;

/// Slot number of a node. 32 bits keep the queue links small.
pub type ArenaIndex = u32;

/// A single resting order - exactly 64 bytes (one cache line).
///
/// # Memory Layout
///
/// | Field      | Type    | Offset | Size |
/// |------------|---------|--------|------|
/// | price      | i64     | 0      | 8    |
/// | ts_event   | u64     | 8      | 8    |
/// | order_id   | u64     | 16     | 8    |
/// | size       | u32     | 24     | 4    |
/// | next       | u32     | 28     | 4    |
/// | prev       | u32     | 32     | 4    |
/// | side       | u8      | 36     | 1    |
/// | is_tob     | bool    | 37     | 1    |
/// | _reserved  | [u8;26] | 38     | 26   |
/// | **Total**  |         |        | 64   |
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct OrderNode {
    /// Fixed-point price (1e-9 units)
    pub price: i64,

    /// Timestamp of the last event that touched this order
    pub ts_event: u64,

    /// Venue-scoped order id
    pub order_id: u64,

    /// Remaining size
    pub size: u32,

    /// Next (lower priority) order at the same level
    pub next: ArenaIndex,

    /// Previous (higher priority) order at the same level
    pub prev: ArenaIndex,

    /// Immutable once the order is created
    pub side: Side,

    /// Synthetic top-of-book order (not counted in level order counts)
    pub is_tob: bool,

    pub _reserved: [u8; 26],
}

// One node per cache line
const _: () = assert!(
    std::mem::size_of::<OrderNode>() == 64,
    "OrderNode must be exactly 64 bytes (one cache line)"
);

const _: () = assert!(
    std::mem::align_of::<OrderNode>() == 64,
    "OrderNode must be 64-byte aligned"
);

impl OrderNode {
    /// Create an unlinked order node
    #[inline]
    pub fn new(order_id: u64, side: Side, price: i64, size: u32, ts_event: u64, is_tob: bool) -> Self {
        Self {
            price,
            ts_event,
            order_id,
            size,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            side,
            is_tob,
            _reserved: [0u8; 26],
        }
    }

    /// A blank free-list slot
    #[inline]
    pub const fn empty() -> Self {
        Self {
            price: 0,
            ts_event: 0,
            order_id: 0,
            size: 0,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            side: Side::Bid,
            is_tob: false,
            _reserved: [0u8; 26],
        }
    }
}

impl fmt::Debug for OrderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderNode")
            .field("order_id", &self.order_id)
            .field("side", &self.side)
            .field("price", &self.price)
            .field("size", &self.size)
            .field("ts_event", &self.ts_event)
            .field("is_tob", &self.is_tob)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Slab of order nodes.
///
/// Unused slots form a singly linked free list through `next`.
pub struct Arena {
    /// Every slot, used or not
    nodes: Vec<OrderNode>,

    /// First free slot, or `NULL_INDEX` when the slab is full
    free_head: ArenaIndex,

    /// Slots currently holding an order
    allocated_count: u32,
}

impl Arena {
    /// Create an arena with `capacity` nodes reserved up front.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity < NULL_INDEX, "Capacity must be less than NULL_INDEX");

        let mut nodes = vec![OrderNode::empty(); capacity as usize];
        Self::thread_free_list(&mut nodes);

        Self {
            nodes,
            free_head: if capacity > 0 { 0 } else { NULL_INDEX },
            allocated_count: 0,
        }
    }

    fn thread_free_list(nodes: &mut [OrderNode]) {
        let len = nodes.len();
        for (i, node) in nodes.iter_mut().enumerate() {
            *node = OrderNode::empty();
            node.next = if i + 1 < len { (i + 1) as ArenaIndex } else { NULL_INDEX };
        }
    }

    /// Store `node` in a free slot, growing the arena if none is left.
    ///
    /// # Complexity
    /// O(1) amortized
    #[inline]
    pub fn alloc(&mut self, node: OrderNode) -> ArenaIndex {
        let index = if self.free_head == NULL_INDEX {
            debug_assert!(self.nodes.len() < NULL_INDEX as usize, "Arena exhausted");
            self.nodes.push(node);
            (self.nodes.len() - 1) as ArenaIndex
        } else {
            let index = self.free_head;
            self.free_head = self.nodes[index as usize].next;
            self.nodes[index as usize] = node;
            index
        };

        let slot = &mut self.nodes[index as usize];
        slot.next = NULL_INDEX;
        slot.prev = NULL_INDEX;
        self.allocated_count += 1;
        index
    }

    /// Return a node to the free list, handing back its last contents.
    ///
    /// The caller must ensure the index is allocated and already unlinked
    /// from its level queue.
    ///
    /// # Complexity
    /// O(1) - pushes to head of free list
    #[inline]
    pub fn free(&mut self, index: ArenaIndex) -> OrderNode {
        debug_assert!((index as usize) < self.nodes.len(), "Index out of bounds");
        debug_assert!(self.allocated_count > 0, "Double free detected");

        let slot = &mut self.nodes[index as usize];
        let node = *slot;
        *slot = OrderNode::empty();
        slot.next = self.free_head;
        self.free_head = index;
        self.allocated_count -= 1;
        node
    }

    /// Free every node at once, keeping the reserved memory.
    pub fn clear(&mut self) {
        Self::thread_free_list(&mut self.nodes);
        self.free_head = if self.nodes.is_empty() { NULL_INDEX } else { 0 };
        self.allocated_count = 0;
    }

    /// Node at `index`.
    #[inline]
    pub fn get(&self, index: ArenaIndex) -> &OrderNode {
        &self.nodes[index as usize]
    }

    /// Mutable node at `index`.
    #[inline]
    pub fn get_mut(&mut self, index: ArenaIndex) -> &mut OrderNode {
        &mut self.nodes[index as usize]
    }

    /// Slots in use
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated_count
    }

    /// Returns the number of slots, allocated or free.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// True when no slot is in use
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated_count == 0
    }

    /// Touch every slot so its pages are mapped before the first event.
    pub fn warm_up(&mut self) {
        for node in &mut self.nodes {
            // Volatile so the store is not elided
            unsafe {
                std::ptr::write_volatile(&mut node._reserved[0], 0);
            }
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.nodes.len())
            .field("allocated", &self.allocated_count)
            .field("free_head", &self.free_head)
            .finish()
    }
}
