use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use flash_book::{price_to_decimal, Market, MarketConfig, MboReader, Quote, Side};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph},
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::{io, time::Duration};

const LADDER_DEPTH: usize = 15;

/// Replay an MBO file and watch one instrument's consolidated book.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// MBO CSV file
    path: PathBuf,

    /// Instrument to display (defaults to the first one seen)
    #[arg(long)]
    instrument: Option<u32>,

    /// Events applied between screen snapshots
    #[arg(long, default_value_t = 1000)]
    batch: u64,

    /// Pause after each batch, in microseconds
    #[arg(long, default_value_t = 0)]
    pause_us: u64,
}

/// Top levels of every venue merged by price, with the quote.
#[derive(Default, Clone)]
struct LadderSnapshot {
    instrument_id: Option<u32>,
    venues: usize,
    bids: Vec<(i64, u64, u32)>, // (Price, Size, Count)
    asks: Vec<(i64, u64, u32)>,
    quote: Option<Quote>,
}

struct SharedStats {
    events: AtomicU64,
    rejected: AtomicU64,
    unknown_orders: AtomicU64,
    resting: AtomicU64,
    done: AtomicBool,
    ladder: RwLock<LadderSnapshot>,
    feed_error: RwLock<Option<String>>,
}

impl SharedStats {
    fn new() -> Self {
        Self {
            events: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            unknown_orders: AtomicU64::new(0),
            resting: AtomicU64::new(0),
            done: AtomicBool::new(false),
            ladder: RwLock::new(LadderSnapshot::default()),
            feed_error: RwLock::new(None),
        }
    }

    fn publish(&self, market: &Market, instrument_id: Option<u32>, ts_event: u64) {
        let stats = market.stats();
        self.events.store(stats.events, Ordering::Relaxed);
        self.rejected.store(stats.rejected, Ordering::Relaxed);
        self.unknown_orders.store(stats.unknown_orders, Ordering::Relaxed);
        self.resting.store(market.order_count() as u64, Ordering::Relaxed);

        let Some(instrument_id) = instrument_id.or_else(|| market.instruments().first().copied()) else {
            return;
        };
        let snapshot = LadderSnapshot {
            instrument_id: Some(instrument_id),
            venues: market.books_for(instrument_id).count(),
            bids: consolidated(market, instrument_id, Side::Bid),
            asks: consolidated(market, instrument_id, Side::Ask),
            quote: market.quote(instrument_id, ts_event),
        };
        *self.ladder.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Merge the top levels of every venue, best price first.
fn consolidated(market: &Market, instrument_id: u32, side: Side) -> Vec<(i64, u64, u32)> {
    let mut merged: BTreeMap<i64, (u64, u32)> = BTreeMap::new();
    for (_, book) in market.books_for(instrument_id) {
        for level in book.levels(side).take(LADDER_DEPTH) {
            let entry = merged.entry(level.price).or_default();
            entry.0 += level.size;
            entry.1 += level.count;
        }
    }
    let rows = merged.into_iter().map(|(price, (size, count))| (price, size, count));
    match side {
        Side::Bid => rows.rev().take(LADDER_DEPTH).collect(),
        Side::Ask => rows.take(LADDER_DEPTH).collect(),
    }
}

// Helper to generate the ASCII Bar string
fn render_level_bars(levels: &[(i64, u64, u32)]) -> String {
    let mut out = String::new();
    let max_size = levels.iter().map(|(_, s, _)| *s).max().unwrap_or(1).max(1) as f32;

    for (price, size, count) in levels {
        let price_fmt = price_to_decimal(*price).round_dp(2).to_string();
        let bar_len = ((*size as f32 / max_size) * 20.0) as usize;
        let bar = "█".repeat(bar_len);
        out.push_str(&format!("{:>10} {:<20} {:<6} ({})\n", price_fmt, bar, size, count));
    }
    out
}

fn replay(args: &Args, stats: &SharedStats) {
    let reader = match MboReader::from_path(&args.path) {
        Ok(reader) => reader,
        Err(err) => {
            *stats.feed_error.write().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
            stats.done.store(true, Ordering::Relaxed);
            return;
        }
    };

    let mut market = Market::with_config(MarketConfig::new());
    let batch = args.batch.max(1);
    let mut last_ts = 0;
    let mut applied = 0u64;

    for event in reader {
        match event {
            Ok(event) => {
                last_ts = event.ts_event;
                // Rejections are counted in the market stats
                let _ = market.apply(&event);
            }
            Err(err) => {
                *stats.feed_error.write().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
                continue;
            }
        }

        applied += 1;
        if applied % batch == 0 {
            stats.publish(&market, args.instrument, last_ts);
            if args.pause_us > 0 {
                thread::sleep(Duration::from_micros(args.pause_us));
            }
        }
    }

    stats.publish(&market, args.instrument, last_ts);
    stats.done.store(true, Ordering::Relaxed);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let stats = Arc::new(SharedStats::new());
    let stats_clone = Arc::clone(&stats);
    let title = format!("FLASH-BOOK replay: {}", args.path.display());

    thread::spawn(move || replay(&args, &stats_clone));

    // Run TUI Loop
    let mut last_events = 0;
    let mut last_time = std::time::Instant::now();
    let mut throughput = 0.0;

    loop {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    break;
                }
            }
        }

        let now = std::time::Instant::now();
        if now.duration_since(last_time).as_secs_f64() >= 1.0 {
            let current = stats.events.load(Ordering::Relaxed) + stats.rejected.load(Ordering::Relaxed);
            throughput = current.saturating_sub(last_events) as f64;
            last_events = current;
            last_time = now;
        }

        let snapshot = stats.ladder.read().unwrap_or_else(PoisonError::into_inner).clone();
        let feed_error = stats.feed_error.read().unwrap_or_else(PoisonError::into_inner).clone();

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints(
                    [
                        Constraint::Length(4),  // Header
                        Constraint::Min(10),    // Book
                        Constraint::Length(7), // Stats
                    ]
                    .as_ref(),
                )
                .split(f.size());

            // 1. Header
            let instrument = snapshot
                .instrument_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let quote_line = match snapshot.quote {
                Some(q) => format!(
                    "bid {} x {} | ask {} x {} | mid {} | wmid {}",
                    q.bid_px.round_dp(4),
                    q.bid_sz,
                    q.ask_px.round_dp(4),
                    q.ask_sz,
                    q.mid.map_or_else(|| "-".to_string(), |m| m.round_dp(4).to_string()),
                    q.weighted_mid.map_or_else(|| "-".to_string(), |m| m.round_dp(4).to_string()),
                ),
                None => "no quote".to_string(),
            };
            let header = Block::default().borders(Borders::ALL).title(title.as_str());
            let text = Paragraph::new(format!(
                "instrument {} over {} venue(s) | Press 'q' to quit\n{}",
                instrument, snapshot.venues, quote_line
            ))
            .block(header)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Cyan));
            f.render_widget(text, chunks[0]);

            // 2. Book
            let book_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(chunks[1]);

            let bids_widget = Paragraph::new(render_level_bars(&snapshot.bids)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("BIDS")
                    .style(Style::default().fg(Color::Green)),
            );
            let asks_widget = Paragraph::new(render_level_bars(&snapshot.asks)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("ASKS")
                    .style(Style::default().fg(Color::Red)),
            );
            f.render_widget(bids_widget, book_chunks[0]);
            f.render_widget(asks_widget, book_chunks[1]);

            // 3. Stats
            let state = if stats.done.load(Ordering::Relaxed) { "complete" } else { "running" };
            let stats_text = format!(
                "Replay: {}   Throughput: {:.0} events/sec\nApplied: {}   Rejected: {}   Unknown ids: {}\nResting orders: {}\n{}",
                state,
                throughput,
                stats.events.load(Ordering::Relaxed),
                stats.rejected.load(Ordering::Relaxed),
                stats.unknown_orders.load(Ordering::Relaxed),
                stats.resting.load(Ordering::Relaxed),
                feed_error.unwrap_or_default(),
            );
            let stats_block = Paragraph::new(stats_text)
                .block(Block::default().borders(Borders::ALL).title("Feed Telemetry"))
                .style(Style::default().fg(Color::Yellow));
            f.render_widget(stats_block, chunks[2]);
        })?;
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    Ok(())
}
