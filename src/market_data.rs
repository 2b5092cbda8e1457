// ===============================
// src/market_data.rs
// ===============================
//
// Aggregated best-bid / best-offer cache across venues. One entry per
// (symbol, venue) per side, newest replaces prior; entries are never
// explicitly deleted, stale venues simply stop updating.
//
use ahash::AHashMap as HashMap;
use thiserror::Error;
use tracing::warn;

use crate::domain::{BboTick, Entry, Quote, Side, VenueId};

/// Sentinel substituted for the known upstream bug that produces
/// venue id 0 in market data. Kept distinct so it never collides with a
/// configured venue, but never dropped either.
pub const UNKNOWN_VENUE_ID: VenueId = 890_778;

/// Liquidation prices are 3 basis points through the opposite side.
const LIQUIDATION_SLIP: f64 = 0.0003;

#[derive(Debug, Error, PartialEq)]
pub enum BookError {
    #[error("no quotes recorded for symbol {0}")]
    NotFound(String),
    #[error("no {side:?} quote for {symbol} on venue {venue_id}")]
    NoQuote {
        symbol: String,
        venue_id: VenueId,
        side: Side,
    },
}

#[derive(Debug, Default)]
pub struct MarketDataBook {
    // symbol -> venue -> entry, bids and offers independently
    bids: HashMap<String, HashMap<VenueId, Entry>>,
    offers: HashMap<String, HashMap<VenueId, Entry>>,
}

fn store_side(
    side_map: &mut HashMap<String, HashMap<VenueId, Entry>>,
    symbol: &str,
    venue_id: VenueId,
    quote: Quote,
    timestamp: f64,
) -> bool {
    let entry = Entry {
        price: quote.price,
        size: quote.size,
        venue_id,
        symbol: symbol.to_string(),
        timestamp,
    };
    let venues = side_map.entry(symbol.to_string()).or_default();
    let changed = match venues.get(&venue_id) {
        Some(old) => !old.same_quote(&entry),
        None => true,
    };
    // idempotent overwrite: stored regardless of whether it changed
    venues.insert(venue_id, entry);
    changed
}

impl MarketDataBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one venue tick. Returns true iff either side differs from
    /// the entry already stored for that (symbol, venue).
    pub fn update(&mut self, tick: &BboTick, now: f64) -> bool {
        let venue_id = if tick.venue_id == 0 {
            warn!(symbol = %tick.symbol, "venue id 0 in market data, substituting {}", UNKNOWN_VENUE_ID);
            UNKNOWN_VENUE_ID
        } else {
            tick.venue_id
        };

        let mut changed = false;
        if let Some(bid) = tick.bid {
            changed |= store_side(&mut self.bids, &tick.symbol, venue_id, bid, now);
        }
        if let Some(ask) = tick.ask {
            changed |= store_side(&mut self.offers, &tick.symbol, venue_id, ask, now);
        }
        changed
    }

    /// All bid entries for a symbol, descending by price. Ties broken by
    /// lowest venue id.
    pub fn sorted_bids(&self, symbol: &str) -> Vec<Entry> {
        let mut out: Vec<Entry> = self
            .bids
            .get(symbol)
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| b.price.total_cmp(&a.price).then(a.venue_id.cmp(&b.venue_id)));
        out
    }

    /// All offer entries for a symbol, ascending by price. Ties broken by
    /// lowest venue id.
    pub fn sorted_offers(&self, symbol: &str) -> Vec<Entry> {
        let mut out: Vec<Entry> = self
            .offers
            .get(symbol)
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.price.total_cmp(&b.price).then(a.venue_id.cmp(&b.venue_id)));
        out
    }

    pub fn best_bid(&self, symbol: &str) -> Result<Entry, BookError> {
        self.sorted_bids(symbol)
            .into_iter()
            .next()
            .ok_or_else(|| BookError::NotFound(symbol.to_string()))
    }

    pub fn best_offer(&self, symbol: &str) -> Result<Entry, BookError> {
        self.sorted_offers(symbol)
            .into_iter()
            .next()
            .ok_or_else(|| BookError::NotFound(symbol.to_string()))
    }

    pub fn symbol_count(&self) -> usize {
        let mut n = self.bids.len();
        for s in self.offers.keys() {
            if !self.bids.contains_key(s) {
                n += 1;
            }
        }
        n
    }

    fn venue_entry(
        side_map: &HashMap<String, HashMap<VenueId, Entry>>,
        symbol: &str,
        venue_id: VenueId,
        side: Side,
    ) -> Result<Entry, BookError> {
        let venues = side_map
            .get(symbol)
            .ok_or_else(|| BookError::NotFound(symbol.to_string()))?;
        venues.get(&venue_id).cloned().ok_or(BookError::NoQuote {
            symbol: symbol.to_string(),
            venue_id,
            side,
        })
    }

    /// Price for unwinding a position on `venue`: 3bp through that
    /// venue's current opposite-side quote, rounded to 3 decimals for
    /// JPY-quoted pairs and 5 otherwise. `side` is the side of the order
    /// being placed: a Bid buys against the offer, an Offer sells into
    /// the bid.
    pub fn liquidation_price(
        &self,
        side: Side,
        symbol: &str,
        venue_id: VenueId,
    ) -> Result<f64, BookError> {
        let raw = match side {
            Side::Bid => {
                let offer = Self::venue_entry(&self.offers, symbol, venue_id, Side::Offer)?;
                offer.price * (1.0 + LIQUIDATION_SLIP)
            }
            Side::Offer => {
                let bid = Self::venue_entry(&self.bids, symbol, venue_id, Side::Bid)?;
                bid.price * (1.0 - LIQUIDATION_SLIP)
            }
        };
        let decimals = if symbol.contains("JPY") { 3 } else { 5 };
        let scale = 10f64.powi(decimals);
        Ok((raw * scale).round() / scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, venue_id: VenueId, bid: (f64, f64), ask: (f64, f64)) -> BboTick {
        BboTick {
            symbol: symbol.to_string(),
            venue_id,
            bid: Some(Quote { price: bid.0, size: bid.1 }),
            ask: Some(Quote { price: ask.0, size: ask.1 }),
        }
    }

    #[test]
    fn update_is_idempotent() {
        let mut md = MarketDataBook::new();
        let t = tick("EUR/USD", 1, (1.2010, 1e6), (1.2012, 1e6));
        assert!(md.update(&t, 1.0));
        // same quote again: stored entries unchanged, no change reported
        assert!(!md.update(&t, 2.0));
        assert_eq!(md.best_bid("EUR/USD").unwrap().price, 1.2010);
    }

    #[test]
    fn update_detects_change_on_either_side() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 1, (1.2010, 1e6), (1.2012, 1e6)), 1.0);
        // only size of the ask moved
        assert!(md.update(&tick("EUR/USD", 1, (1.2010, 1e6), (1.2012, 2e6)), 2.0));
    }

    #[test]
    fn best_bid_and_offer_across_venues() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 1, (1.2010, 1e6), (1.2015, 1e6)), 1.0);
        md.update(&tick("EUR/USD", 2, (1.2008, 2e6), (1.2012, 2e6)), 1.0);
        assert_eq!(md.best_bid("EUR/USD").unwrap().venue_id, 1);
        assert_eq!(md.best_offer("EUR/USD").unwrap().venue_id, 2);
    }

    #[test]
    fn tie_break_prefers_lowest_venue_id() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 7, (1.2010, 1e6), (1.2015, 1e6)), 1.0);
        md.update(&tick("EUR/USD", 2, (1.2010, 2e6), (1.2015, 2e6)), 1.0);
        assert_eq!(md.best_bid("EUR/USD").unwrap().venue_id, 2);
        assert_eq!(md.best_offer("EUR/USD").unwrap().venue_id, 2);
    }

    #[test]
    fn sorted_ladders() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 1, (1.2010, 1e6), (1.2015, 1e6)), 1.0);
        md.update(&tick("EUR/USD", 2, (1.2008, 1e6), (1.2012, 1e6)), 1.0);
        md.update(&tick("EUR/USD", 3, (1.2011, 1e6), (1.2018, 1e6)), 1.0);
        let bids: Vec<VenueId> = md.sorted_bids("EUR/USD").iter().map(|e| e.venue_id).collect();
        let offers: Vec<VenueId> = md.sorted_offers("EUR/USD").iter().map(|e| e.venue_id).collect();
        assert_eq!(bids, vec![3, 1, 2]);
        assert_eq!(offers, vec![2, 1, 3]);
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let md = MarketDataBook::new();
        assert_eq!(
            md.best_bid("GBP/USD").unwrap_err(),
            BookError::NotFound("GBP/USD".into())
        );
    }

    #[test]
    fn zero_venue_id_is_substituted() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 0, (1.2010, 1e6), (1.2015, 1e6)), 1.0);
        assert_eq!(md.best_bid("EUR/USD").unwrap().venue_id, UNKNOWN_VENUE_ID);
    }

    #[test]
    fn one_sided_tick_keeps_other_side() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 1, (1.2010, 1e6), (1.2015, 1e6)), 1.0);
        let one_sided = BboTick {
            symbol: "EUR/USD".into(),
            venue_id: 1,
            bid: Some(Quote { price: 1.2011, size: 1e6 }),
            ask: None,
        };
        assert!(md.update(&one_sided, 2.0));
        assert_eq!(md.best_bid("EUR/USD").unwrap().price, 1.2011);
        assert_eq!(md.best_offer("EUR/USD").unwrap().price, 1.2015);
    }

    #[test]
    fn liquidation_price_is_3bp_through() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 1, (1.2000, 1e6), (1.2010, 1e6)), 1.0);
        // buying to cover: through the offer
        let buy = md.liquidation_price(Side::Bid, "EUR/USD", 1).unwrap();
        assert!((buy - 1.20136).abs() < 1e-9);
        // selling out: through the bid
        let sell = md.liquidation_price(Side::Offer, "EUR/USD", 1).unwrap();
        assert!((sell - 1.19964).abs() < 1e-9);
    }

    #[test]
    fn liquidation_price_rounds_jpy_to_3_decimals() {
        let mut md = MarketDataBook::new();
        md.update(&tick("USD/JPY", 1, (110.00, 1e6), (110.10, 1e6)), 1.0);
        let buy = md.liquidation_price(Side::Bid, "USD/JPY", 1).unwrap();
        assert!((buy - 110.133).abs() < 1e-9);
        let sell = md.liquidation_price(Side::Offer, "USD/JPY", 1).unwrap();
        assert!((sell - 109.967).abs() < 1e-9);
    }

    #[test]
    fn liquidation_price_requires_venue_quote() {
        let mut md = MarketDataBook::new();
        md.update(&tick("EUR/USD", 1, (1.2000, 1e6), (1.2010, 1e6)), 1.0);
        assert!(matches!(
            md.liquidation_price(Side::Bid, "EUR/USD", 2),
            Err(BookError::NoQuote { venue_id: 2, .. })
        ));
    }
}
