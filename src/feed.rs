// ===============================
// src/feed.rs
// ===============================
//
// Mock market data: one random-walk BBO stream per (venue, symbol).
// Venues walk independently off a shared anchor, so their quotes
// occasionally cross each other, which is the whole point here.
//
use rand::Rng;
use tokio::{sync::mpsc, time::{sleep, Duration}};
use tracing::info;

use crate::domain::{BboTick, Quote, VenueId};
use crate::metrics::TICKS;

fn pip_size(symbol: &str) -> f64 {
    if symbol.contains("JPY") {
        0.001
    } else {
        0.00001
    }
}

fn anchor_price(symbol: &str) -> f64 {
    if symbol.contains("JPY") {
        110.0
    } else {
        1.2
    }
}

pub async fn run_mock(md_tx: mpsc::Sender<BboTick>, symbol: String, venue_id: VenueId) {
    info!(%symbol, venue_id, "mock feed up");
    let pip = pip_size(&symbol);
    let anchor = anchor_price(&symbol);
    let mut mid = anchor;

    loop {
        let (step, spread_pips, size_lots, jitter_ms) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(-3..=3) as f64,
                rng.gen_range(1..=4) as f64,
                rng.gen_range(1..=5) as f64,
                rng.gen_range(0..=10u64),
            )
        };
        mid += step * pip;
        // drift back toward the anchor so venues don't wander apart forever
        mid += (anchor - mid) * 0.01;

        let half_spread = spread_pips * pip / 2.0;
        let size = size_lots * 1e6;
        let tick = BboTick {
            symbol: symbol.clone(),
            venue_id,
            bid: Some(Quote { price: mid - half_spread, size }),
            ask: Some(Quote { price: mid + half_spread, size }),
        };
        if md_tx.send(tick).await.is_err() {
            return;
        }
        TICKS.inc();
        sleep(Duration::from_millis(20 + jitter_ms)).await;
    }
}
