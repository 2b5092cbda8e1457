// ===============================
// src/risk.rs
// ===============================
use thiserror::Error;
use tracing::warn;

use crate::domain::Entry;

#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("order quantity {0} is not positive")]
    Quantity(f64),
    #[error("order price {0} is not a valid positive price")]
    Price(f64),
}

#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_order_qty: f64,
}

/// Pre-send checks for one cross leg pair. Returns the approved
/// quantity, clamped to the per-order maximum.
pub fn approve_cross_qty(
    bid_entry: &Entry,
    offer_entry: &Entry,
    qty: f64,
    limits: &RiskLimits,
) -> Result<f64, RiskError> {
    if !(qty > 0.0) || !qty.is_finite() {
        return Err(RiskError::Quantity(qty));
    }
    for price in [bid_entry.price, offer_entry.price] {
        if !(price > 0.0) || !price.is_finite() {
            return Err(RiskError::Price(price));
        }
    }
    if qty > limits.max_order_qty {
        warn!(
            qty,
            max_order_qty = limits.max_order_qty,
            "clamping cross quantity to per-order maximum"
        );
        return Ok(limits.max_order_qty);
    }
    Ok(qty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(price: f64) -> Entry {
        Entry {
            price,
            size: 1e6,
            venue_id: 1,
            symbol: "EUR/USD".into(),
            timestamp: 0.0,
        }
    }

    #[test]
    fn passes_and_clamps() {
        let limits = RiskLimits { max_order_qty: 1e6 };
        let (b, o) = (entry(1.2010), entry(1.2005));
        assert_eq!(approve_cross_qty(&b, &o, 500_000.0, &limits), Ok(500_000.0));
        assert_eq!(approve_cross_qty(&b, &o, 5e6, &limits), Ok(1e6));
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let limits = RiskLimits { max_order_qty: 1e6 };
        let (b, o) = (entry(1.2010), entry(1.2005));
        assert!(approve_cross_qty(&b, &o, 0.0, &limits).is_err());
        assert!(approve_cross_qty(&b, &o, f64::NAN, &limits).is_err());
        assert!(approve_cross_qty(&entry(0.0), &o, 1e5, &limits).is_err());
    }
}
