// ===============================
// src/config.rs
// ===============================
//
// Env-driven runtime configuration. The venue table stands in for the
// external configuration service: in production the per-venue addresses
// and capability flags come back from a request/reply config fetch, here
// they are resolved from defaults plus env overrides.
//
use ahash::AHashMap as HashMap;
use dotenvy::dotenv;
use std::env;
use tracing::warn;
use uuid::Uuid;

use crate::domain::VenueId;

const DEFAULT_STRATEGY_ID: &str = "7c1a2b90-5d3e-4f61-9a08-2e4b6c8d0f13";

#[derive(Clone, Debug)]
pub struct Args {
    pub strategy_id: Uuid,
    pub symbols: Vec<String>,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,

    // strategy parameters
    pub min_cross_magnitude: f64,
    pub new_order_delay: f64,
    pub max_order_lifetime: f64,
    pub max_order_qty: f64,
    pub startup_wait: f64,

    // shutdown behavior: liquidate open orders instead of plain cancel
    pub liquidate_on_exit: bool,
}

/// Per-venue attributes, the part of the venue configuration the core
/// consumes. `use_synthetic_cancel_replace` flags venues without native
/// replace support.
#[derive(Clone, Debug)]
pub struct VenueCfg {
    pub venue_id: VenueId,
    pub mic_name: String,
    pub use_synthetic_cancel_replace: bool,
    // mock gateway latency until a resting order fills
    pub fill_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct VenueRegistry {
    venues: HashMap<VenueId, VenueCfg>,
}

impl VenueRegistry {
    pub fn new(venues: impl IntoIterator<Item = VenueCfg>) -> Self {
        let mut map = HashMap::new();
        for v in venues {
            map.insert(v.venue_id, v);
        }
        Self { venues: map }
    }

    /// Unknown venues default to native replace with a warning; a missing
    /// capability row must not stop an unwind.
    pub fn use_synthetic_cancel_replace(&self, venue_id: VenueId) -> bool {
        match self.venues.get(&venue_id) {
            Some(v) => v.use_synthetic_cancel_replace,
            None => {
                warn!(venue_id, "no venue config, assuming native cancel/replace");
                false
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &VenueCfg> {
        self.venues.values()
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }
}

fn default_venues() -> Vec<VenueCfg> {
    vec![
        VenueCfg {
            venue_id: 1,
            mic_name: "BAXTER".into(),
            use_synthetic_cancel_replace: false,
            fill_ms: 40,
        },
        VenueCfg {
            venue_id: 2,
            mic_name: "FASTMATCH".into(),
            use_synthetic_cancel_replace: false,
            fill_ms: 25,
        },
        VenueCfg {
            venue_id: 3,
            mic_name: "FXCM".into(),
            use_synthetic_cancel_replace: true,
            fill_ms: 60,
        },
    ]
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub fn load() -> (Args, VenueRegistry) {
    // .env is read first so RECORD_FILE, SYMBOLS etc. are picked up
    let _ = dotenv();

    let strategy_id = env::var("STRATEGY_ID")
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok())
        .unwrap_or_else(|| Uuid::parse_str(DEFAULT_STRATEGY_ID).expect("default strategy id"));

    // Multi-symbol: SYMBOLS=EUR/USD,USD/JPY,GBP/USD
    let symbols: Vec<String> = env::var("SYMBOLS")
        .ok()
        .map(|s| {
            s.split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty())
                .map(|x| x.to_ascii_uppercase())
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| vec!["EUR/USD".into(), "USD/JPY".into()]);

    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    let args = Args {
        strategy_id,
        symbols,
        record_file,
        metrics_port,
        min_cross_magnitude: env_f64("MIN_CROSS_MAGNITUDE", 50.0),
        new_order_delay: env_f64("NEW_ORDER_DELAY", 0.0),
        max_order_lifetime: env_f64("MAX_ORDER_LIFETIME", 5.0),
        max_order_qty: env_f64("MAX_ORDER_QTY", 1e6),
        startup_wait: env_f64("STARTUP_WAIT", 0.5),
        liquidate_on_exit: env::var("LIQUIDATE_ON_EXIT")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    };

    (args, VenueRegistry::new(default_venues()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_capability_lookup() {
        let reg = VenueRegistry::new(default_venues());
        assert!(!reg.use_synthetic_cancel_replace(1));
        assert!(reg.use_synthetic_cancel_replace(3));
        // unknown venue falls back to native
        assert!(!reg.use_synthetic_cancel_replace(99));
        let fastmatch = reg.iter().find(|v| v.venue_id == 2).unwrap();
        assert_eq!(fastmatch.mic_name, "FASTMATCH");
    }
}
