//! Stress Tests - Push the books to their limits.
//!
//! These tests verify correctness under extreme conditions:
//! - Growth far past the pre-allocated capacity
//! - High contention at single price levels
//! - Rapid order churn and repeated resets
//! - Maximum values for prices and sizes

use flash_book::{
    Action, ApplyOutcome, Book, BookError, Market, MarketConfig, MarketEvent, PriceLevel, Side,
    UNDEF_PRICE,
};

// ============================================================================
// Capacity Stress Tests
// ============================================================================

#[test]
fn test_growth_past_capacity() {
    let mut market = Market::with_config(MarketConfig::new().with_order_capacity(16));

    for i in 0..50_000u64 {
        let side = if i % 2 == 0 { Side::Bid } else { Side::Ask };
        let price = match side {
            Side::Bid => 1_000 - (i / 2 % 100) as i64,
            Side::Ask => 1_001 + (i / 2 % 100) as i64,
        };
        market.apply(&MarketEvent::add(side, i, price, 1)).unwrap();
    }

    let book = market.book(0, 0).unwrap();
    assert_eq!(book.order_count(), 50_000);
    assert_eq!(book.bid_levels(), 100);
    assert_eq!(book.ask_levels(), 100);
    assert_eq!(book.best_bid().map(|l| (l.price, l.size)), Some((1_000, 250)));
    assert_eq!(book.best_ask().map(|l| (l.price, l.size)), Some((1_001, 250)));
}

#[test]
fn test_slot_reuse_after_cancel() {
    let mut book = Book::with_capacity(8);

    for round in 0..1_000u64 {
        for i in 0..8 {
            let id = round * 8 + i;
            book.apply(&MarketEvent::add(Side::Bid, id, 100 + i as i64, 5)).unwrap();
        }
        for i in 0..8 {
            let id = round * 8 + i;
            assert_eq!(
                book.apply(&MarketEvent::cancel(Side::Bid, id, 100 + i as i64, 5)),
                Ok(ApplyOutcome::Removed)
            );
        }
        assert!(book.is_empty());
    }
}

// ============================================================================
// High Contention Tests
// ============================================================================

#[test]
fn test_single_price_level_contention() {
    let mut book = Book::new();
    const ORDERS: u64 = 10_000;

    for id in 0..ORDERS {
        book.apply(&MarketEvent::add(Side::Ask, id, 500, 3).at(id)).unwrap();
    }

    assert_eq!(book.ask_levels(), 1);
    assert_eq!(
        book.best_ask(),
        Some(PriceLevel { price: 500, size: 3 * ORDERS, count: ORDERS as u32, ts_event: ORDERS - 1 })
    );

    // Remove every other order
    for id in (0..ORDERS).step_by(2) {
        book.apply(&MarketEvent::cancel(Side::Ask, id, 500, 3)).unwrap();
    }
    let queue = book.queue(Side::Ask, 500);
    assert_eq!(queue.len(), (ORDERS / 2) as usize);
    assert!(queue.iter().all(|id| id % 2 == 1));
    assert!(queue.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_fifo_priority_under_modifies() {
    let mut book = Book::new();
    for id in 0..100 {
        book.apply(&MarketEvent::add(Side::Bid, id, 200, 10)).unwrap();
    }

    // Size-only modifies keep position; price round-trips go to the back
    for id in (0..100).filter(|id| id % 3 == 0) {
        book.apply(&MarketEvent::modify(Side::Bid, id, 200, 1)).unwrap();
    }
    for id in (0..100).filter(|id| id % 10 == 5) {
        book.apply(&MarketEvent::modify(Side::Bid, id, 199, 10)).unwrap();
        book.apply(&MarketEvent::modify(Side::Bid, id, 200, 10)).unwrap();
    }

    let queue = book.queue(Side::Bid, 200);
    let stayed: Vec<u64> = (0..100).filter(|id| id % 10 != 5).collect();
    let requeued: Vec<u64> = (0..100).filter(|id| id % 10 == 5).collect();
    assert_eq!(queue, [stayed, requeued].concat());
    assert_eq!(book.bid_levels(), 1);
}

// ============================================================================
// Rapid Churn Tests
// ============================================================================

#[test]
fn test_rapid_add_cancel_cycles() {
    let mut book = Book::new();
    book.apply(&MarketEvent::add(Side::Bid, u64::MAX, 90, 1)).unwrap();

    for id in 0..100_000u64 {
        book.apply(&MarketEvent::add(Side::Bid, id, 100, 7)).unwrap();
        book.apply(&MarketEvent::cancel(Side::Bid, id, 100, 7)).unwrap();
    }

    assert_eq!(book.order_count(), 1);
    assert_eq!(book.bid_levels(), 1);
    assert_eq!(book.best_bid().map(|l| l.price), Some(90));
}

#[test]
fn test_repeated_resets() {
    let mut market = Market::new();
    for round in 0..200u64 {
        for id in 0..50 {
            market.apply(&MarketEvent::add(Side::Ask, id, 1_000 + id as i64, 1).on(1, 1)).unwrap();
        }
        assert_eq!(market.order_count(), 50);
        market.apply(&MarketEvent::reset().at(round).on(1, 1)).unwrap();
        assert_eq!(market.order_count(), 0);
    }
    assert_eq!(market.stats().resets, 200);
    assert_eq!(market.aggregated_best_bid_offer(1), (None, None));
}

#[test]
fn test_side_clear_churn() {
    let mut book = Book::new();
    for round in 0..1_000u64 {
        let side = if round % 2 == 0 { Side::Bid } else { Side::Ask };
        book.apply(&MarketEvent::add(side, round, 100, 1)).unwrap();
        book.apply(&MarketEvent::clear_side(side)).unwrap();
        assert!(book.is_empty());
        // Same id may be reused once cleared
        book.apply(&MarketEvent::add(side, round, 100, 1)).unwrap();
        book.apply(&MarketEvent::cancel(side, round, 100, 1)).unwrap();
    }
}

// ============================================================================
// Edge Case Tests
// ============================================================================

#[test]
fn test_zero_and_negative_prices() {
    let mut book = Book::new();
    book.apply(&MarketEvent::add(Side::Bid, 1, 0, 1)).unwrap();
    book.apply(&MarketEvent::add(Side::Bid, 2, -5_000_000_000, 1)).unwrap();
    book.apply(&MarketEvent::add(Side::Ask, 3, -1_000_000_000, 1)).unwrap();

    assert_eq!(book.best_bid().map(|l| l.price), Some(0));
    assert_eq!(book.level_at(Side::Bid, 1).map(|l| l.price), Some(-5_000_000_000));
    assert_eq!(book.best_ask().map(|l| l.price), Some(-1_000_000_000));
    assert_eq!(book.spread(), Some(-1_000_000_000));
}

#[test]
fn test_max_price() {
    let mut book = Book::new();
    let price = UNDEF_PRICE - 1;
    book.apply(&MarketEvent::add(Side::Ask, 1, price, 1)).unwrap();
    assert_eq!(book.best_ask().map(|l| l.price), Some(price));
}

#[test]
fn test_max_size_sums_without_overflow() {
    let mut market = Market::new();
    for venue in 0..4u16 {
        for id in 0..4u64 {
            market
                .apply(&MarketEvent::add(Side::Bid, id, 100, u32::MAX).on(9, venue))
                .unwrap();
        }
    }
    let (bid, _) = market.aggregated_best_bid_offer(9);
    assert_eq!(bid.map(|l| l.size), Some(16 * u64::from(u32::MAX)));
    assert_eq!(bid.map(|l| l.count), Some(16));
}

#[test]
fn test_many_price_levels() {
    let mut book = Book::new();
    for i in 0..10_000i64 {
        book.apply(&MarketEvent::add(Side::Ask, i as u64, 1_000 + i, 1)).unwrap();
    }
    assert_eq!(book.ask_levels(), 10_000);
    assert_eq!(book.level_at(Side::Ask, 9_999).map(|l| l.price), Some(10_999));
    assert_eq!(book.level_at(Side::Ask, 10_000), None);

    let depth = book.depth_snapshot(5);
    assert_eq!(depth.iter().map(|p| p.ask_px).collect::<Vec<_>>(), vec![1_000, 1_001, 1_002, 1_003, 1_004]);
    assert!(depth.iter().all(|p| p.bid_px == 0 && p.bid_sz == 0));
}

// ============================================================================
// Cancel / Modify Edge Cases
// ============================================================================

#[test]
fn test_double_cancel() {
    let mut book = Book::new();
    book.apply(&MarketEvent::add(Side::Bid, 1, 100, 4)).unwrap();
    assert_eq!(book.apply(&MarketEvent::cancel(Side::Bid, 1, 100, 4)), Ok(ApplyOutcome::Removed));
    assert_eq!(book.apply(&MarketEvent::cancel(Side::Bid, 1, 100, 4)), Ok(ApplyOutcome::UnknownOrder));
    assert!(book.is_empty());
}

#[test]
fn test_rejections_leave_book_untouched() {
    let mut book = Book::new();
    book.apply(&MarketEvent::add(Side::Bid, 1, 100, 4).at(1)).unwrap();
    let before = book.state_hash();

    let rejected = [
        MarketEvent::cancel(Side::Bid, 1, 100, 5),
        MarketEvent::modify(Side::Ask, 1, 101, 4),
        MarketEvent::add(Side::Ask, 1, 102, 1),
        MarketEvent::new(Action::Modify, None, 1, 100, 1),
    ];
    for event in rejected {
        let err = book.apply(&event).unwrap_err();
        assert!(err.is_invariant_violation(), "{err}");
    }

    assert_eq!(book.state_hash(), before);
    assert_eq!(
        book.apply(&MarketEvent::cancel(Side::Bid, 1, 100, 5)),
        Err(BookError::CancelExceedsSize { order_id: 1, remaining: 4, requested: 5 })
    );
}

#[test]
fn test_cancel_uses_recorded_price() {
    let mut book = Book::new();
    book.apply(&MarketEvent::add(Side::Ask, 1, 100, 4)).unwrap();
    // The event price is wrong, but the order is found by id
    book.apply(&MarketEvent::cancel(Side::Ask, 1, 999, 4)).unwrap();
    assert!(book.is_empty());
}

// ============================================================================
// Sharded Runtime
// ============================================================================

#[cfg(feature = "runtime")]
#[test]
fn test_sharded_back_pressure() {
    use flash_book::ShardedMarket;

    // Tiny queues force the producer to wait on the workers
    let mut sharded = ShardedMarket::spawn(2, 1, MarketConfig::default(), false).unwrap();
    for id in 0..20_000u64 {
        let venue = (id % 6) as u16;
        sharded.submit(MarketEvent::add(Side::Bid, id, 100 + (id % 50) as i64, 1).on(3, venue)).unwrap();
        if id % 2 == 1 {
            sharded.submit(MarketEvent::cancel(Side::Bid, id, 0, 1).on(3, venue)).unwrap();
        }
    }
    let board = sharded.board();
    let markets = sharded.shutdown().unwrap();

    assert_eq!(markets.iter().map(Market::order_count).sum::<usize>(), 10_000);
    assert_eq!(markets.iter().map(Market::book_count).sum::<usize>(), 6);
    let (bid, ask) = board.aggregated_best_bid_offer(3);
    assert_eq!(ask, None);
    // Even ids land on prices 100, 102, ..., 148
    assert_eq!(bid.map(|l| l.price), Some(148));
    assert_eq!(bid.map(|l| l.size), Some(400));
}
