//! Quotes derived from an aggregated touch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::market::Bbo;
use crate::price_level::price_to_decimal;

/// Touch of one instrument across venues, in decimal prices.
///
/// An absent side has price and size zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub ts_event: u64,
    pub instrument_id: u32,
    pub bid_px: Decimal,
    pub ask_px: Decimal,
    pub bid_sz: u64,
    pub ask_sz: u64,
    /// Midpoint; only when both sides are present
    pub mid: Option<Decimal>,
    /// Size-weighted midpoint over the present sides
    pub weighted_mid: Option<Decimal>,
}

impl Quote {
    /// Build a quote from a touch. `None` when both sides are empty.
    pub fn from_bbo(instrument_id: u32, ts_event: u64, (bid, ask): Bbo) -> Option<Self> {
        if bid.is_none() && ask.is_none() {
            return None;
        }

        let bid_px = bid.map_or(Decimal::ZERO, |l| price_to_decimal(l.price));
        let ask_px = ask.map_or(Decimal::ZERO, |l| price_to_decimal(l.price));
        let bid_sz = bid.map_or(0, |l| l.size);
        let ask_sz = ask.map_or(0, |l| l.size);

        let mid = match (bid, ask) {
            (Some(_), Some(_)) => Some((bid_px + ask_px) / Decimal::TWO),
            _ => None,
        };

        let total = bid_sz + ask_sz;
        let weighted_mid = (total > 0).then(|| {
            (Decimal::from(bid_sz) * bid_px + Decimal::from(ask_sz) * ask_px)
                / Decimal::from(total)
        });

        Some(Self {
            ts_event,
            instrument_id,
            bid_px,
            ask_px,
            bid_sz,
            ask_sz,
            mid,
            weighted_mid,
        })
    }

    /// Ask minus bid, when both sides are present.
    pub fn spread(&self) -> Option<Decimal> {
        self.mid.map(|_| self.ask_px - self.bid_px)
    }

    /// Event timestamp as wall-clock time
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.ts_event as i64)
    }
}
