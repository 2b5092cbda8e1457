// ===============================
// src/strategy.rs
// ===============================
//
// The uncrosser. Watches the aggregated book for venues quoting through
// each other, sends a paired buy/sell against the crossed quotes, and
// babysits the two legs until the position is flat again. At most one
// cross is worked at a time.
//
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{BboTick, Entry, OrderId, OrderType, Side, TimeInForce};
use crate::market_data::{BookError, MarketDataBook};
use crate::metrics::{CROSSES_DETECTED, CROSSES_RESOLVED, CROSSES_SENT, REALIZED_PROFIT, RESCUES};
use crate::order_store::{OrderStore, StoreError};
use crate::risk::{approve_cross_qty, RiskLimits};

/// Fixed approximate USD/JPY conversion used to normalize cross
/// magnitudes of yen-quoted pairs against dollar-quoted ones.
const JPY_MAGNITUDE_DIVISOR: f64 = 80.0;

/// How long a rescue order may work before we flag it as stuck.
const RESCUE_TIMEOUT: f64 = 10.0;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("cross already sent")]
    DoubleSend,
    #[error("offer {offer} is not below bid {bid}; this is supposed to be an uncrosser")]
    NotCrossed { bid: f64, offer: f64 },
    #[error("cross references two symbols: {bid_symbol} vs {offer_symbol}")]
    SymbolMismatch {
        bid_symbol: String,
        offer_symbol: String,
    },
    #[error("cross invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Book(#[from] BookError),
}

impl StrategyError {
    /// Violated invariants mean the detector or lifecycle has a bug;
    /// continuing would risk an unhedged position, so the loop halts.
    pub fn is_fatal(&self) -> bool {
        match self {
            StrategyError::DoubleSend
            | StrategyError::NotCrossed { .. }
            | StrategyError::SymbolMismatch { .. }
            | StrategyError::Invariant(_) => true,
            StrategyError::Store(e) => e.is_fatal(),
            StrategyError::Book(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub min_cross_magnitude: f64,
    pub new_order_delay: f64,
    pub max_order_lifetime: f64,
    pub max_order_qty: f64,
}

/// One detected arbitrage opportunity and the state of working it out.
/// The "bid order" is our buy (sent against the book's offer), the
/// "offer order" our sell (sent into the book's bid).
#[derive(Debug, Clone)]
pub struct Cross {
    pub bid_entry: Entry,
    pub offer_entry: Entry,
    pub magnitude: f64,
    pub start_time: f64,
    pub send_time: Option<f64>,
    pub sent: bool,
    pub bid_order_id: Option<OrderId>,
    pub offer_order_id: Option<OrderId>,
    // set only while unwinding an asymmetric fill
    pub rescue_order_id: Option<OrderId>,
    pub rescue_start_time: Option<f64>,
    pub sent_bid_cancel: bool,
    pub sent_offer_cancel: bool,
}

impl Cross {
    fn new(bid_entry: Entry, offer_entry: Entry, magnitude: f64, now: f64) -> Self {
        Self {
            bid_entry,
            offer_entry,
            magnitude,
            start_time: now,
            send_time: None,
            sent: false,
            bid_order_id: None,
            offer_order_id: None,
            rescue_order_id: None,
            rescue_start_time: None,
            sent_bid_cancel: false,
            sent_offer_cancel: false,
        }
    }
}

/// Scan the symbols whose quotes changed since the last scan and return
/// the single highest-magnitude crossed pair, if it clears the
/// threshold. The dirty set is cleared unconditionally: a symbol whose
/// best cross was too small is not rechecked until its quotes move
/// again.
pub fn find_best_crossed_pair(
    book: &MarketDataBook,
    dirty_symbols: &mut HashSet<String>,
    min_cross_magnitude: f64,
    now: f64,
) -> Option<Cross> {
    if dirty_symbols.is_empty() {
        return None;
    }
    let mut best: Option<Cross> = None;
    let mut best_magnitude = 0.0;
    for symbol in dirty_symbols.iter() {
        let yen_pair = symbol.contains("JPY");
        let sorted_bids = book.sorted_bids(symbol);
        let sorted_offers = book.sorted_offers(symbol);
        for bid_entry in &sorted_bids {
            for offer_entry in &sorted_offers {
                let price_difference = bid_entry.price - offer_entry.price;
                if price_difference <= 0.0 {
                    // offers ascend: nothing further in this ladder can
                    // cross this bid (the next bid still might)
                    break;
                }
                let cross_size = bid_entry.size.min(offer_entry.size);
                let mut cross_magnitude = price_difference * cross_size;
                if yen_pair {
                    cross_magnitude /= JPY_MAGNITUDE_DIVISOR;
                }
                info!(
                    symbol = %symbol,
                    bid_venue = bid_entry.venue_id,
                    bid_price = bid_entry.price,
                    bid_size = bid_entry.size,
                    offer_venue = offer_entry.venue_id,
                    offer_price = offer_entry.price,
                    offer_size = offer_entry.size,
                    magnitude = cross_magnitude,
                    "cross found"
                );
                if cross_magnitude > best_magnitude {
                    best_magnitude = cross_magnitude;
                    best = Some(Cross::new(
                        bid_entry.clone(),
                        offer_entry.clone(),
                        cross_magnitude,
                        now,
                    ));
                }
            }
        }
    }
    if best.is_some() && best_magnitude < min_cross_magnitude {
        warn!(
            magnitude = best_magnitude,
            min_cross_magnitude, "not sending - cross too small"
        );
        best = None;
    }
    dirty_symbols.clear();
    if best.is_some() {
        CROSSES_DETECTED.inc();
    }
    best
}

/// Strategy context: the event loop's single owner of the book, the
/// order store and the (at most one) active cross.
pub struct Uncrosser {
    pub book: MarketDataBook,
    pub store: OrderStore,
    params: StrategyParams,
    limits: RiskLimits,
    dirty_symbols: HashSet<String>,
    cross: Option<Cross>,
}

impl Uncrosser {
    pub fn new(store: OrderStore, params: StrategyParams) -> Self {
        let limits = RiskLimits {
            max_order_qty: params.max_order_qty,
        };
        Self {
            book: MarketDataBook::new(),
            store,
            params,
            limits,
            dirty_symbols: HashSet::new(),
            cross: None,
        }
    }

    pub fn cross(&self) -> Option<&Cross> {
        self.cross.as_ref()
    }

    pub fn has_active_cross(&self) -> bool {
        self.cross.is_some()
    }

    /// Update the book; symbols whose quotes actually changed become
    /// candidates for the next detector scan.
    pub fn on_tick(&mut self, tick: &BboTick, now: f64) {
        if self.book.update(tick, now) {
            self.dirty_symbols.insert(tick.symbol.clone());
        }
    }

    /// One iteration of the outgoing decision logic: progress the active
    /// cross if any, then look for a new one once the slate is clean.
    pub fn poll(&mut self, now: f64) -> Result<(), StrategyError> {
        let state = self
            .cross
            .as_ref()
            .map(|c| (c.sent, now >= c.start_time + self.params.new_order_delay));
        match state {
            Some((true, _)) => self.manage_active_cross(now)?,
            Some((false, true)) => self.send_cross(now)?,
            Some((false, false)) => {
                debug!("waiting to send orders for cross");
            }
            None => {}
        }

        if self.cross.is_none() {
            if let Some(cross) = find_best_crossed_pair(
                &self.book,
                &mut self.dirty_symbols,
                self.params.min_cross_magnitude,
                now,
            ) {
                info!(
                    symbol = %cross.bid_entry.symbol,
                    magnitude = cross.magnitude,
                    "created cross object"
                );
                self.cross = Some(cross);
                if self.params.new_order_delay == 0.0 {
                    self.send_cross(now)?;
                }
            }
        }
        Ok(())
    }

    /// Send both legs: a sell into the venue quoting the crossed bid and
    /// a buy against the venue quoting the crossed offer, both for the
    /// smaller of the two displayed sizes. The leg with the smaller
    /// (presumed more transient) displayed size goes out first.
    fn send_cross(&mut self, now: f64) -> Result<(), StrategyError> {
        let Some(cross) = self.cross.as_ref() else {
            return Ok(());
        };
        if cross.sent {
            return Err(StrategyError::DoubleSend);
        }
        let bid_entry = cross.bid_entry.clone();
        let offer_entry = cross.offer_entry.clone();
        if offer_entry.price >= bid_entry.price {
            return Err(StrategyError::NotCrossed {
                bid: bid_entry.price,
                offer: offer_entry.price,
            });
        }
        if bid_entry.symbol != offer_entry.symbol {
            return Err(StrategyError::SymbolMismatch {
                bid_symbol: bid_entry.symbol,
                offer_symbol: offer_entry.symbol,
            });
        }
        let symbol = bid_entry.symbol.clone();
        let qty = bid_entry.size.min(offer_entry.size);
        let qty = match approve_cross_qty(&bid_entry, &offer_entry, qty, &self.limits) {
            Ok(q) => q,
            Err(e) => {
                warn!(%e, "risk rejected cross, discarding it");
                self.cross = None;
                return Ok(());
            }
        };

        let (bid_order_id, offer_order_id) = if bid_entry.size < offer_entry.size {
            let offer_order_id = self.store.submit_new(
                bid_entry.venue_id,
                &symbol,
                Side::Offer,
                bid_entry.price,
                qty,
                OrderType::Limit,
                TimeInForce::GoodForDay,
                now,
            );
            let bid_order_id = self.store.submit_new(
                offer_entry.venue_id,
                &symbol,
                Side::Bid,
                offer_entry.price,
                qty,
                OrderType::Limit,
                TimeInForce::GoodForDay,
                now,
            );
            (bid_order_id, offer_order_id)
        } else {
            let bid_order_id = self.store.submit_new(
                offer_entry.venue_id,
                &symbol,
                Side::Bid,
                offer_entry.price,
                qty,
                OrderType::Limit,
                TimeInForce::GoodForDay,
                now,
            );
            let offer_order_id = self.store.submit_new(
                bid_entry.venue_id,
                &symbol,
                Side::Offer,
                bid_entry.price,
                qty,
                OrderType::Limit,
                TimeInForce::GoodForDay,
                now,
            );
            (bid_order_id, offer_order_id)
        };

        info!(
            symbol = %symbol,
            bid_order = %bid_order_id,
            offer_order = %offer_order_id,
            qty,
            "sent both legs of cross"
        );
        CROSSES_SENT.inc();
        if let Some(c) = self.cross.as_mut() {
            c.bid_order_id = Some(bid_order_id);
            c.offer_order_id = Some(offer_order_id);
            c.send_time = Some(now);
            c.sent = true;
        }
        Ok(())
    }

    /// One tick of active-cross supervision: watch the rescue order if
    /// there is one, expire the cross past its lifetime, otherwise act
    /// on the liveness of the two legs.
    fn manage_active_cross(&mut self, now: f64) -> Result<(), StrategyError> {
        let Some(cross) = self.cross.as_ref() else {
            warn!("manage_active_cross called with no cross");
            return Ok(());
        };
        let rescue = cross.rescue_order_id;
        let rescue_start = cross.rescue_start_time;
        let send_time = cross.send_time;
        let bid_order_id = cross.bid_order_id;
        let offer_order_id = cross.offer_order_id;

        if let Some(rescue_id) = rescue {
            let order = self.store.get(rescue_id)?.clone();
            // a replace-style rescue lives under the original order id
            // until its ack renames it
            let rescue_pending = self.store.is_pending(rescue_id);
            let rescue_alive = self.store.is_alive(order.id) || self.store.is_alive(rescue_id);
            let rescue_expired = now - rescue_start.unwrap_or(now) >= RESCUE_TIMEOUT;
            if order.qty > 0.0 && order.cum_qty >= order.qty {
                info!(rescue_order = %rescue_id, "rescue succeeded");
                CROSSES_RESOLVED.inc();
                self.cross = None;
            } else if !rescue_pending && !rescue_alive && !rescue_expired {
                warn!(rescue_order = %rescue_id, "rescue order died, re-evaluating");
                if let Some(c) = self.cross.as_mut() {
                    c.rescue_order_id = None;
                    c.rescue_start_time = None;
                }
            } else if rescue_expired {
                // stuck: this needs an operator, not an automatic answer
                error!(
                    rescue_order = %rescue_id,
                    cum_qty = order.cum_qty,
                    qty = order.qty,
                    "RESCUE EXPIRED - cancel/replace may have failed"
                );
                for b in self.book.sorted_bids(&order.symbol) {
                    debug!(entry = ?b, "market bid");
                }
                for a in self.book.sorted_offers(&order.symbol) {
                    debug!(entry = ?a, "market offer");
                }
            } else {
                debug!(rescue_order = %rescue_id, cum_qty = order.cum_qty, "waiting on rescue");
            }
            return Ok(());
        }

        let Some(send_time) = send_time else {
            return Err(StrategyError::Invariant("managing a cross that was never sent".into()));
        };
        if now >= send_time + self.params.max_order_lifetime {
            info!("cross expired");
            return self.kill_cross(now);
        }

        let (Some(bid_order_id), Some(offer_order_id)) = (bid_order_id, offer_order_id) else {
            return Err(StrategyError::Invariant("sent cross has no order ids".into()));
        };
        let bid = self.store.get(bid_order_id)?.clone();
        let offer = self.store.get(offer_order_id)?.clone();
        // a leg is dead only once the venue neither rests it nor owes us
        // an ack for it
        let bid_active = self.store.is_alive(bid.id) || self.store.is_pending(bid.id);
        let offer_active = self.store.is_alive(offer.id) || self.store.is_pending(offer.id);

        if !bid_active && !offer_active {
            info!("both orders dead");
            self.both_dead(now)
        } else if bid_active && offer_active {
            debug!(
                bid_filled = bid.cum_qty,
                offer_filled = offer.cum_qty,
                "both legs working"
            );
            Ok(())
        } else if bid_active && offer.cum_qty > 0.0 && offer.cum_qty < offer.qty {
            info!(
                filled = offer.cum_qty,
                qty = offer.qty,
                "bid alive, offer dead with a partial fill"
            );
            self.kill_cross(now)
        } else if offer_active && bid.cum_qty > 0.0 && bid.cum_qty < bid.qty {
            info!(
                filled = bid.cum_qty,
                qty = bid.qty,
                "offer alive, bid dead with a partial fill"
            );
            self.kill_cross(now)
        } else {
            debug!(
                bid_filled = bid.cum_qty,
                offer_filled = offer.cum_qty,
                "one leg done, waiting for the other"
            );
            Ok(())
        }
    }

    /// Get out of the cross. Equal fills mean cancel both legs (once);
    /// unequal fills mean the smaller side has to be chased with a
    /// liquidation-priced rescue for the fill difference.
    fn kill_cross(&mut self, now: f64) -> Result<(), StrategyError> {
        let Some(cross) = self.cross.as_ref() else {
            return Ok(());
        };
        if !cross.sent {
            return Err(StrategyError::Invariant("can't kill a cross before sending it".into()));
        }
        let (Some(bid_order_id), Some(offer_order_id)) = (cross.bid_order_id, cross.offer_order_id)
        else {
            return Err(StrategyError::Invariant("sent cross has no order ids".into()));
        };
        let sent_bid_cancel = cross.sent_bid_cancel;
        let sent_offer_cancel = cross.sent_offer_cancel;
        let bid = self.store.get(bid_order_id)?.clone();
        let offer = self.store.get(offer_order_id)?.clone();
        info!(
            bid_order = %bid.id,
            offer_order = %offer.id,
            bid_filled = bid.cum_qty,
            offer_filled = offer.cum_qty,
            "kill_cross"
        );

        if bid.cum_qty == offer.cum_qty {
            let bid_alive = if sent_bid_cancel {
                debug!("not sending bid cancel again");
                self.store.is_alive(bid.id)
            } else {
                let alive = self.store.cancel_if_alive(bid.id);
                if alive {
                    if let Some(c) = self.cross.as_mut() {
                        c.sent_bid_cancel = true;
                    }
                }
                alive
            };
            let offer_alive = if sent_offer_cancel {
                debug!("not sending offer cancel again");
                self.store.is_alive(offer.id)
            } else {
                let alive = self.store.cancel_if_alive(offer.id);
                if alive {
                    if let Some(c) = self.cross.as_mut() {
                        c.sent_offer_cancel = true;
                    }
                }
                alive
            };
            let bid_settled = !bid_alive && !self.store.is_pending(bid.id);
            let offer_settled = !offer_alive && !self.store.is_pending(offer.id);
            if bid_settled && offer_settled {
                warn!("both orders dead - reconciling");
                self.both_dead(now)?;
            }
            Ok(())
        } else if bid.cum_qty > offer.cum_qty {
            info!(bid_qty = bid.cum_qty, offer_qty = offer.cum_qty, "closing unbalanced cross");
            self.close_unbalanced(bid.id, offer.id, now)
        } else {
            info!(bid_qty = bid.cum_qty, offer_qty = offer.cum_qty, "closing unbalanced cross");
            self.close_unbalanced(offer.id, bid.id, now)
        }
    }

    /// Two dead legs: rescue any fill imbalance, otherwise the cross is
    /// finished (profitably or without any fills at all).
    fn both_dead(&mut self, now: f64) -> Result<(), StrategyError> {
        let Some(cross) = self.cross.as_ref() else {
            return Ok(());
        };
        let (Some(bid_order_id), Some(offer_order_id)) = (cross.bid_order_id, cross.offer_order_id)
        else {
            return Err(StrategyError::Invariant("sent cross has no order ids".into()));
        };
        let bid = self.store.get(bid_order_id)?.clone();
        let offer = self.store.get(offer_order_id)?.clone();
        info!(bid_order = %bid.id, offer_order = %offer.id, "both_dead");

        if bid.cum_qty > offer.cum_qty {
            self.close_unbalanced(bid.id, offer.id, now)
        } else if bid.cum_qty < offer.cum_qty {
            self.close_unbalanced(offer.id, bid.id, now)
        } else if bid.cum_qty == 0.0 {
            info!("cross died without any fills");
            CROSSES_RESOLVED.inc();
            self.cross = None;
            Ok(())
        } else {
            let (Some(bid_avg), Some(offer_avg)) = (bid.avg_price, offer.avg_price) else {
                return Err(StrategyError::Invariant(
                    "completed cross without average fill prices".into(),
                ));
            };
            let expected_profit = bid.cum_qty * (offer.price - bid.price);
            let profit = bid.cum_qty * (offer_avg - bid_avg);
            info!(
                symbol = %bid.symbol,
                filled = bid.cum_qty,
                expected_profit,
                profit,
                "cross completed"
            );
            if let Some(pos) = self.store.position(&bid.symbol) {
                info!(symbol = %bid.symbol, net = pos.net_qty(), "post-cross position");
            }
            REALIZED_PROFIT.with_label_values(&[&bid.symbol]).add(profit);
            CROSSES_RESOLVED.inc();
            self.cross = None;
            Ok(())
        }
    }

    /// One leg filled more than the other. Cancel whatever is left of
    /// the bigger side, then chase the fill difference on the smaller
    /// side at a price that will transact: through a cancel/replace if
    /// that leg is still resting, through a brand-new order if it died.
    fn close_unbalanced(
        &mut self,
        bigger_id: OrderId,
        smaller_id: OrderId,
        now: f64,
    ) -> Result<(), StrategyError> {
        let bigger = self.store.get(bigger_id)?.clone();
        let smaller = self.store.get(smaller_id)?.clone();
        info!(bigger = %bigger.id, smaller = %smaller.id, "close unbalanced cross");

        self.store.cancel_if_alive(bigger.id);

        let qty_diff = bigger.cum_qty - smaller.cum_qty;
        if qty_diff <= 0.0 {
            return Err(StrategyError::Invariant(
                "close_unbalanced called with no fill difference".into(),
            ));
        }

        let rescue_id = if self.store.is_alive(smaller.id) {
            info!(order = %smaller.id, qty_diff, "smaller leg alive - replacing it with a rescue");
            self.store
                .liquidate_order(&self.book, smaller.id, Some(qty_diff), now)?
        } else {
            let price = self
                .book
                .liquidation_price(smaller.side, &smaller.symbol, smaller.venue)?;
            info!(
                symbol = %smaller.symbol,
                venue = smaller.venue,
                side = ?smaller.side,
                qty_diff,
                price,
                "smaller leg dead - sending a fresh rescue order"
            );
            self.store.submit_new(
                smaller.venue,
                &smaller.symbol,
                smaller.side,
                price,
                qty_diff,
                OrderType::Limit,
                TimeInForce::GoodForDay,
                now,
            )
        };
        RESCUES.inc();
        if let Some(c) = self.cross.as_mut() {
            c.rescue_order_id = Some(rescue_id);
            c.rescue_start_time = Some(now);
        }
        info!(rescue_order = %rescue_id, "rescue order recorded on cross");
        Ok(())
    }
}
