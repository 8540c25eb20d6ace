//! MBO CSV feed.
//!
//! Reads market-by-order records exported as CSV with a header row.
//! Columns are matched by name; unknown columns are ignored. Prices are
//! fixed-point integers (1e-9 units) and an empty price means
//! [`UNDEF_PRICE`]. Timestamps are integer nanoseconds.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{BookError, FeedError};
use crate::event::{Action, MarketEvent, RecordFlags, Side, UNDEF_PRICE};

#[derive(Debug, Clone, Deserialize)]
pub struct MboRow {
    pub ts_event: u64,
    pub publisher_id: u16,
    pub instrument_id: u32,
    pub action: String,
    pub side: String,
    pub price: Option<i64>,
    pub size: u32,
    pub order_id: u64,
    #[serde(default)]
    pub flags: u8,
}

impl MboRow {
    /// Decode the raw row into a typed event.
    pub fn to_event(&self) -> Result<MarketEvent, BookError> {
        let action = Action::try_from(single_code(&self.action))?;
        let side = Side::from_code(single_code(&self.side))?;

        Ok(MarketEvent {
            ts_event: self.ts_event,
            action,
            side,
            order_id: self.order_id,
            price: self.price.unwrap_or(UNDEF_PRICE),
            size: self.size,
            instrument_id: self.instrument_id,
            publisher_id: self.publisher_id,
            flags: RecordFlags::from_bits_retain(self.flags),
        })
    }
}

/// The one-byte code of a field, or `?` for anything else.
fn single_code(field: &str) -> u8 {
    match field.trim().as_bytes() {
        [code] => *code,
        _ => b'?',
    }
}

/// Iterator over the events of an MBO CSV stream.
pub struct MboReader<R: Read> {
    rows: csv::DeserializeRecordsIntoIter<R, MboRow>,
    record: u64,
}

impl<R: Read> MboReader<R> {
    pub fn new(reader: R) -> Self {
        let rows = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_deserialize();
        Self { rows, record: 0 }
    }
}

impl MboReader<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> Iterator for MboReader<R> {
    type Item = Result<MarketEvent, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        self.record += 1;
        let record = self.record;
        Some(
            row.map_err(FeedError::from)
                .and_then(|row| row.to_event().map_err(|source| FeedError::Decode { record, source })),
        )
    }
}
