// ===============================
// src/positions.rs
// ===============================
use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::Side;

/// Per-symbol aggregate of confirmed fills. Long and short legs are
/// accumulated independently; net position is their difference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub long_qty: f64,
    pub long_val: f64,
    pub short_qty: f64,
    pub short_val: f64,
}

impl Position {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }

    pub fn long_avg_price(&self) -> f64 {
        if self.long_qty != 0.0 {
            self.long_val / self.long_qty
        } else {
            0.0
        }
    }

    pub fn short_avg_price(&self) -> f64 {
        if self.short_qty != 0.0 {
            self.short_val / self.short_qty
        } else {
            0.0
        }
    }

    pub fn net_qty(&self) -> f64 {
        self.long_qty - self.short_qty
    }
}

/// All symbol positions, updated only on confirmed fill events.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    by_symbol: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fill. Bids accrue to the long leg, offers to the short.
    pub fn apply_fill(&mut self, symbol: &str, side: Side, qty: f64, price: f64) {
        let pos = self
            .by_symbol
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol));
        match side {
            Side::Bid => {
                pos.long_qty += qty;
                pos.long_val += qty * price;
            }
            Side::Offer => {
                pos.short_qty += qty;
                pos.short_val += qty * price;
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.by_symbol.get(symbol)
    }

    pub fn log_all(&self) {
        for pos in self.by_symbol.values() {
            info!(
                symbol = %pos.symbol,
                long_qty = pos.long_qty,
                long_avg = pos.long_avg_price(),
                short_qty = pos.short_qty,
                short_avg = pos.short_avg_price(),
                net = pos.net_qty(),
                "position"
            );
        }
    }
}
