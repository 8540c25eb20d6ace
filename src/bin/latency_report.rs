use flash_book::{Action, Market, MarketConfig, MarketEvent, Side};
use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

const ITERATIONS: u64 = 1_000_000;
const VENUES: u16 = 4;
const LIVE_ORDERS: u64 = 10_000;

/// Deterministic event stream: adds around a mid, with cancels and
/// modifies of orders added `LIVE_ORDERS` events earlier.
struct Workload {
    state: u64,
    next_id: u64,
}

impl Workload {
    fn next_u64(&mut self) -> u64 {
        // 64-bit LCG (Knuth MMIX constants)
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 33
    }

    fn side_of(id: u64) -> Side {
        if id % 2 == 0 {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    fn price_of(id: u64, offset: u64) -> i64 {
        let ticks = (offset % 50) as i64;
        let mid = 100_000_000_000;
        match Self::side_of(id) {
            Side::Bid => mid - 10_000_000 * (ticks + 1),
            Side::Ask => mid + 10_000_000 * (ticks + 1),
        }
    }

    /// Venue an order lives on, so cancels and modifies find it.
    fn venue_of(id: u64) -> u16 {
        (id % u64::from(VENUES)) as u16
    }

    fn next_event(&mut self, ts: u64) -> MarketEvent {
        let roll = self.next_u64();
        if self.next_id < LIVE_ORDERS || roll % 3 == 0 {
            self.next_id += 1;
            let id = self.next_id;
            return MarketEvent::add(Self::side_of(id), id, Self::price_of(id, roll), 10)
                .at(ts)
                .on(1, Self::venue_of(id));
        }

        let target = self.next_id - LIVE_ORDERS + 1 + roll % LIVE_ORDERS;
        let action = if roll % 3 == 1 { Action::Cancel } else { Action::Modify };
        MarketEvent::new(action, Some(Self::side_of(target)), target, Self::price_of(target, roll >> 8), 5)
            .at(ts)
            .on(1, Self::venue_of(target))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Preparing Latency Benchmark...");

    let mut market = Market::with_config(MarketConfig::new().with_order_capacity(1 << 16));
    let mut workload = Workload {
        state: 0x5eed,
        next_id: 0,
    };

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000, 3)?;
    let mut total_duration = Duration::new(0, 0);
    let mut rejected = 0u64;

    println!("Running {} iterations...", ITERATIONS);

    for ts in 0..ITERATIONS {
        let event = workload.next_event(ts);

        let start = Instant::now();
        let result = std::hint::black_box(market.apply(&event));
        let elapsed = start.elapsed();

        rejected += u64::from(result.is_err());
        // Outliers above the histogram bound are dropped
        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total_duration += elapsed;
    }

    let touch_start = Instant::now();
    let touch = std::hint::black_box(market.aggregated_best_bid_offer(1));
    let touch_elapsed = touch_start.elapsed();

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", ITERATIONS);
    println!("Throughput: {:.2} ops/sec", ITERATIONS as f64 / total_duration.as_secs_f64());
    println!("Rejected:   {}", rejected);
    println!("No-ops:     {} unknown ids", market.stats().unknown_orders);
    println!("Resting:    {} orders in {} books", market.order_count(), market.book_count());
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");
    println!("Aggregated BBO over {} venues: {:?} ns", VENUES, touch_elapsed.as_nanos());
    if let (Some(bid), Some(ask)) = touch {
        println!("  bid {bid}");
        println!("  ask {ask}");
    }

    println!("\nDistribution:");
    for v in histogram.iter_log(100, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:6} ns: {:10} count", v.value_iterated_to(), count);
        }
    }

    Ok(())
}
