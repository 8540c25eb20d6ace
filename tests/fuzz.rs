//! Fuzz Test - Compares the books against a reference implementation.
//!
//! Uses a naive but correct reference book (vectors in ordered maps) to
//! verify the arena-backed books report identical levels, queues and
//! aggregated touches after every event, including invalid ones.

use flash_book::{
    aggregate_bbo, Action, BidAskPair, Book, Market, MarketEvent, PriceLevel, RecordFlags, Side,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};

/// (order_id, size, ts_event, is_tob)
type Resting = (u64, u32, u64, bool);

/// Simple reference implementation for verification
#[derive(Default)]
struct ReferenceBook {
    bids: BTreeMap<i64, Vec<Resting>>,
    asks: BTreeMap<i64, Vec<Resting>>,
    orders: HashMap<u64, (Side, i64)>, // order_id -> (side, price)
}

impl ReferenceBook {
    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<i64, Vec<Resting>> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn level(price: i64, orders: &[Resting]) -> PriceLevel {
        PriceLevel {
            price,
            size: orders.iter().map(|o| u64::from(o.1)).sum(),
            count: orders.iter().filter(|o| !o.3).count() as u32,
            ts_event: orders.iter().map(|o| o.2).max().unwrap_or(0),
        }
    }

    fn levels(&self, side: Side) -> Vec<PriceLevel> {
        let levels: Vec<PriceLevel> = match side {
            Side::Bid => self.bids.iter().rev().map(|(p, o)| Self::level(*p, o)).collect(),
            Side::Ask => self.asks.iter().map(|(p, o)| Self::level(*p, o)).collect(),
        };
        levels
    }

    fn bbo(&self) -> (Option<PriceLevel>, Option<PriceLevel>) {
        (
            self.levels(Side::Bid).first().copied(),
            self.levels(Side::Ask).first().copied(),
        )
    }

    fn queue(&self, side: Side, price: i64) -> Vec<u64> {
        let levels = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        levels
            .get(&price)
            .map(|orders| orders.iter().map(|o| o.0).collect())
            .unwrap_or_default()
    }

    fn take(&mut self, order_id: u64) -> Option<Resting> {
        let (side, price) = self.orders.remove(&order_id)?;
        let levels = self.side_mut(side);
        let queue = levels.get_mut(&price)?;
        let pos = queue.iter().position(|o| o.0 == order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&price);
        }
        Some(order)
    }

    fn clear_side(&mut self, side: Side) {
        let levels = std::mem::take(self.side_mut(side));
        for order in levels.values().flatten() {
            self.orders.remove(&order.0);
        }
    }

    /// Apply an event; `false` when the book should reject it.
    fn apply(&mut self, event: &MarketEvent) -> bool {
        let side = match event.action {
            Action::Trade | Action::Fill => return true,
            Action::Reset => {
                *self = ReferenceBook::default();
                return true;
            }
            _ => match event.side {
                Some(side) => side,
                None => return false,
            },
        };

        if event.is_side_clear() {
            self.clear_side(side);
            return true;
        }

        match event.action {
            Action::Add => {
                if self.orders.contains_key(&event.order_id) {
                    return false;
                }
                let tob = event.flags.contains(RecordFlags::TOB);
                self.orders.insert(event.order_id, (side, event.price));
                self.side_mut(side)
                    .entry(event.price)
                    .or_default()
                    .push((event.order_id, event.size, event.ts_event, tob));
                true
            }
            Action::Cancel => {
                let Some(&(side, price)) = self.orders.get(&event.order_id) else {
                    return true;
                };
                let queue = self.side_mut(side).get_mut(&price).expect("indexed order has a level");
                let pos = queue.iter().position(|o| o.0 == event.order_id).expect("queued");
                if event.size > queue[pos].1 {
                    return false;
                }
                queue[pos].1 -= event.size;
                if queue[pos].1 == 0 {
                    self.take(event.order_id);
                }
                true
            }
            Action::Modify => {
                let Some(&(recorded, price)) = self.orders.get(&event.order_id) else {
                    return true;
                };
                if recorded != side {
                    return false;
                }
                if event.size == 0 {
                    self.take(event.order_id);
                    return true;
                }
                if price == event.price {
                    let queue = self.side_mut(side).get_mut(&price).expect("level");
                    let order = queue.iter_mut().find(|o| o.0 == event.order_id).expect("queued");
                    order.1 = event.size;
                    order.2 = event.ts_event;
                    return true;
                }
                let Some(mut order) = self.take(event.order_id) else {
                    return true;
                };
                order.1 = event.size;
                order.2 = event.ts_event;
                self.orders.insert(event.order_id, (side, event.price));
                self.side_mut(side).entry(event.price).or_default().push(order);
                true
            }
            Action::Reset | Action::Trade | Action::Fill => true,
        }
    }
}

fn random_side(rng: &mut ChaCha8Rng) -> Side {
    if rng.gen_bool(0.5) {
        Side::Bid
    } else {
        Side::Ask
    }
}

/// Random event over a small id and price space so collisions are common.
fn random_event(rng: &mut ChaCha8Rng, ts: u64, instruments: u32, venues: u16) -> MarketEvent {
    let side = random_side(rng);
    let order_id = rng.gen_range(1..=60);
    let price = rng.gen_range(95..=105) * 1_000_000_000;
    let size = rng.gen_range(0..=20);

    let event = match rng.gen_range(0..100) {
        0..=39 => MarketEvent::add(side, order_id, price, size.max(1)),
        40..=43 => MarketEvent::add(side, order_id, price, size.max(1)).with_flags(RecordFlags::TOB),
        44..=64 => MarketEvent::cancel(side, order_id, price, size),
        65..=89 => MarketEvent::modify(side, order_id, price, size),
        90..=93 => MarketEvent::new(Action::Trade, Some(side), order_id, price, size),
        94..=95 => MarketEvent::clear_side(side),
        96 => MarketEvent::reset(),
        97 => MarketEvent::new(Action::Fill, None, order_id, price, size),
        _ => MarketEvent::new(Action::Cancel, None, order_id, price, size),
    };

    event
        .at(ts)
        .on(rng.gen_range(0..instruments), rng.gen_range(0..venues))
}

fn assert_book_matches(book: &Book, reference: &ReferenceBook, step: usize) {
    assert_eq!(book.best_bid_offer(), reference.bbo(), "step {step}: touch mismatch");
    assert_eq!(book.order_count(), reference.orders.len(), "step {step}: order count");

    let bids = reference.levels(Side::Bid);
    let asks = reference.levels(Side::Ask);
    assert_eq!(book.levels(Side::Bid).collect::<Vec<_>>(), bids, "step {step}: bid levels");
    assert_eq!(book.levels(Side::Ask).collect::<Vec<_>>(), asks, "step {step}: ask levels");

    let expected_depth: Vec<BidAskPair> = (0..3)
        .map(|i| BidAskPair::new(bids.get(i).copied(), asks.get(i).copied()))
        .collect();
    assert_eq!(book.depth_snapshot(3), expected_depth, "step {step}: depth");

    for level in bids.iter().take(2) {
        assert_eq!(book.queue(Side::Bid, level.price), reference.queue(Side::Bid, level.price));
    }
    for level in asks.iter().take(2) {
        assert_eq!(book.queue(Side::Ask, level.price), reference.queue(Side::Ask, level.price));
    }
}

fn run_fuzz(seed: u64, steps: usize, instruments: u32, venues: u16) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut market = Market::new();
    let mut reference: HashMap<(u32, u16), ReferenceBook> = HashMap::new();

    for step in 0..steps {
        let event = random_event(&mut rng, step as u64, instruments, venues);
        let key = (event.instrument_id, event.publisher_id);

        let accepted = reference.entry(key).or_default().apply(&event);
        let result = market.apply(&event);
        assert_eq!(
            result.is_ok(),
            accepted,
            "seed {seed} step {step}: {event:?} -> {result:?}"
        );

        let book = market.book(key.0, key.1).expect("book exists after any event");
        assert_book_matches(book, &reference[&key], step);

        let venues_bbo = reference
            .iter()
            .filter(|((instrument, _), _)| *instrument == event.instrument_id)
            .map(|(_, book)| book.bbo());
        assert_eq!(
            market.aggregated_best_bid_offer(event.instrument_id),
            aggregate_bbo(venues_bbo),
            "seed {seed} step {step}: aggregated touch"
        );
    }
}

#[test]
fn test_fuzz_single_book() {
    run_fuzz(42, 20_000, 1, 1);
}

#[test]
fn test_fuzz_multi_venue() {
    run_fuzz(7, 30_000, 2, 4);
}

#[test]
fn test_fuzz_many_seeds() {
    for seed in 100..110 {
        run_fuzz(seed, 3_000, 2, 3);
    }
}

#[test]
fn test_reference_aggregation_by_hand() {
    // Three venues, two sharing the best ask price
    let mut market = Market::new();
    let px = 50_100_000_000;
    market.apply(&MarketEvent::add(Side::Ask, 1, px, 3).at(10).on(1, 1)).unwrap();
    market.apply(&MarketEvent::add(Side::Ask, 9, px, 7).at(20).on(1, 2)).unwrap();
    market.apply(&MarketEvent::add(Side::Ask, 4, px + 10_000_000, 50).at(5).on(1, 3)).unwrap();
    market.apply(&MarketEvent::add(Side::Bid, 5, 50_000_000_000, 2).at(6).on(1, 3)).unwrap();

    let (bid, ask) = market.aggregated_best_bid_offer(1);
    assert_eq!(
        ask,
        Some(PriceLevel { price: px, size: 10, count: 2, ts_event: 20 })
    );
    assert_eq!(
        bid,
        Some(PriceLevel { price: 50_000_000_000, size: 2, count: 1, ts_event: 6 })
    );
}
