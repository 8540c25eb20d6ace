//! Replay an MBO CSV file through the books.
//!
//! Writes one aggregated quote per completed venue event (records
//! flagged LAST) to stdout as CSV. Logs and the final depth summary go
//! to stderr.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use flash_book::{
    price_to_decimal, FeedError, Market, MarketConfig, MarketEvent, MboReader, Quote, ShardedMarket,
};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Rebuild market-by-order books from an MBO CSV file")]
struct Args {
    /// MBO CSV file
    path: PathBuf,

    /// Only emit quotes for this instrument
    #[arg(long)]
    instrument: Option<u32>,

    /// Levels per side in the final depth summary
    #[arg(long, default_value_t = 5)]
    depth: usize,

    /// Warn on cancels/modifies of unknown order ids
    #[arg(long)]
    strict: bool,

    /// Worker shards; 0 applies events on this task
    #[arg(long, default_value_t = 0)]
    shards: usize,

    /// Pin shard workers to cores
    #[arg(long)]
    pin: bool,

    /// Events buffered between the reader and the books
    #[arg(long, default_value_t = 4096)]
    queue: usize,

    /// Pace the replay on event timestamps; 1.0 is real time
    #[arg(long)]
    speed: Option<f64>,
}

enum Books {
    Local(Market),
    Sharded(ShardedMarket),
}

impl Books {
    fn apply(&mut self, event: MarketEvent) -> Result<Option<Quote>, Box<dyn Error>> {
        match self {
            Books::Local(market) => {
                // Rejections are logged and counted by the market
                let _ = market.apply(&event);
                Ok(event
                    .is_last()
                    .then(|| market.quote(event.instrument_id, event.ts_event))
                    .flatten())
            }
            Books::Sharded(sharded) => {
                sharded.submit(event)?;
                if !event.is_last() {
                    return Ok(None);
                }
                // Waits for the shards to catch up with this event
                Ok(sharded.quote(event.instrument_id, event.ts_event)?)
            }
        }
    }

    fn finish(self) -> Result<Vec<Market>, Box<dyn Error>> {
        match self {
            Books::Local(market) => Ok(vec![market]),
            Books::Sharded(sharded) => Ok(sharded.shutdown()?),
        }
    }
}

fn print_depth(markets: &[Market], depth: usize) {
    for market in markets {
        for instrument_id in market.instruments() {
            for (publisher_id, book) in market.books_for(instrument_id) {
                eprintln!("instrument {instrument_id} publisher {publisher_id}: {book:?}");
                for (i, row) in book.depth_snapshot(depth).iter().enumerate() {
                    eprintln!(
                        "  {:2} | {:>6} x {:>14} | {:>14} x {:<6}",
                        i,
                        row.bid_sz,
                        price_to_decimal(row.bid_px).normalize(),
                        price_to_decimal(row.ask_px).normalize(),
                        row.ask_sz
                    );
                }
            }
        }
        let stats = market.stats();
        eprintln!(
            "applied {} rejected {} unknown ids {} resets {} side clears {}",
            stats.events, stats.rejected, stats.unknown_orders, stats.resets, stats.side_clears
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = MarketConfig::new().with_strict(args.strict);

    let mut books = if args.shards > 0 {
        Books::Sharded(ShardedMarket::spawn(args.shards, args.queue, config, args.pin)?)
    } else {
        Books::Local(Market::with_config(config))
    };

    let (tx, mut rx) = mpsc::channel::<Result<MarketEvent, FeedError>>(args.queue.max(1));
    let path = args.path.clone();
    let reader = tokio::task::spawn_blocking(move || -> Result<u64, FeedError> {
        let mut records = 0;
        for event in MboReader::from_path(path)? {
            if tx.blocking_send(event).is_err() {
                break;
            }
            records += 1;
        }
        Ok(records)
    });

    let mut quotes = csv::Writer::from_writer(std::io::stdout());
    let started = Instant::now();
    let mut first_ts = None;

    while let Some(event) = rx.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping record");
                continue;
            }
        };

        if let Some(speed) = args.speed.filter(|s| *s > 0.0) {
            let first = *first_ts.get_or_insert(event.ts_event);
            let offset = event.ts_event.saturating_sub(first) as f64 / speed;
            sleep_until(started + Duration::from_nanos(offset as u64)).await;
        }

        if let Some(quote) = books.apply(event)? {
            if args.instrument.map_or(true, |id| id == quote.instrument_id) {
                quotes.serialize(quote)?;
            }
        }
    }
    quotes.flush()?;

    let records = reader.await??;
    info!(records, elapsed_ms = started.elapsed().as_millis() as u64, "replay finished");

    let markets = books.finish()?;
    print_depth(&markets, args.depth);
    Ok(())
}
