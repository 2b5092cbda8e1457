// ===============================
// src/order_store.rs
// ===============================
//
// The order state machine. One `Order` represents the whole request
// chain of a logical order; its external identifier changes when a
// cancel or replace is acknowledged, its internal handle never does.
// Liveness is granted only by a positive ack and revoked by any
// terminal status. In-flight requests are tracked in a bimap from the
// order's current id to the set of outstanding request ids, so that
// killing the order id cascades over every request chained off it.
//
use ahash::AHashMap as HashMap;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VenueRegistry;
use crate::domain::{
    CancelReject, ExecTransType, ExecType, ExecutionReport, OrderEngineMsg, OrderId, OrderRequest,
    OrderStatus, OrderType, Side, TimeInForce, VenueId,
};
use crate::market_data::{BookError, MarketDataBook};
use crate::metrics::{LIVE_ORDERS, NET_POSITION};
use crate::one_to_many::OneToMany;
use crate::positions::{Position, PositionBook};
use crate::router::OrderRouter;

type Handle = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown order id {0}")]
    NotFound(OrderId),
    #[error("order {0} is not cancelable (neither live nor pending)")]
    NotLive(OrderId),
    #[error("cancel/replace on {0} changes neither price nor qty")]
    NoChange(OrderId),
    #[error("unsupported exec_trans_type {0:?}")]
    UnsupportedTransaction(ExecTransType),
    #[error("unsupported exec_type {0:?}")]
    UnsupportedExecType(ExecType),
    #[error("execution report for unknown order: cl={cl}, orig={orig}")]
    UnknownReportTarget { cl: OrderId, orig: OrderId },
    #[error("new-order ack for id {0} that was never pending")]
    UnexpectedAck(OrderId),
    #[error("reject for id {0} that was never pending")]
    RejectNotPending(OrderId),
    #[error("cannot rename dead order {0}")]
    DeadRename(OrderId),
    #[error("cancel reject for unknown original order {0}")]
    UnknownOrder(OrderId),
    #[error(transparent)]
    Market(#[from] BookError),
}

impl StoreError {
    /// Protocol violations that indicate a counterparty extension we do
    /// not speak, or an internal logic bug. The strategy loop halts on
    /// these rather than continue with a possibly wrong position state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::UnsupportedTransaction(_)
                | StoreError::UnsupportedExecType(_)
                | StoreError::UnknownReportTarget { .. }
                | StoreError::UnexpectedAck(_)
                | StoreError::RejectNotPending(_)
                | StoreError::DeadRename(_)
                | StoreError::UnknownOrder(_)
        )
    }
}

/// One logical order across its whole request chain.
#[derive(Debug, Clone)]
pub struct Order {
    /// Current external identifier; renamed when a cancel/replace is acked.
    pub id: OrderId,
    pub venue: VenueId,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub cum_qty: f64,
    pub leaves_qty: f64,
    pub avg_price: Option<f64>,
    pub last_price: f64,
    pub last_shares: f64,
    /// Venue-reported status; None until the first report arrives.
    pub status: Option<OrderStatus>,
    pub creation_time: f64,
    pub last_update_time: f64,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: OrderId,
        venue: VenueId,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
        order_type: OrderType,
        time_in_force: TimeInForce,
        now: f64,
    ) -> Self {
        Self {
            id,
            venue,
            symbol: symbol.to_string(),
            side,
            price,
            qty,
            order_type,
            time_in_force,
            cum_qty: 0.0,
            leaves_qty: 0.0,
            avg_price: None,
            last_price: 0.0,
            last_shares: 0.0,
            status: None,
            creation_time: now,
            last_update_time: now,
        }
    }
}

pub struct OrderStore {
    strategy_id: Uuid,
    next_handle: Handle,
    orders: HashMap<Handle, Order>,
    /// Every external id ever associated with an order: current ids,
    /// superseded ids, cancel/replace request ids.
    ext_index: HashMap<OrderId, Handle>,
    live_order_ids: HashSet<OrderId>,
    pending: OneToMany<OrderId, OrderId>,
    positions: PositionBook,
    router: OrderRouter,
    venues: VenueRegistry,
}

impl OrderStore {
    pub fn new(strategy_id: Uuid, router: OrderRouter, venues: VenueRegistry) -> Self {
        info!("initializing order store");
        Self {
            strategy_id,
            next_handle: 0,
            orders: HashMap::new(),
            ext_index: HashMap::new(),
            live_order_ids: HashSet::new(),
            pending: OneToMany::new(),
            positions: PositionBook::new(),
            router,
            venues,
        }
    }

    fn alloc_handle(&mut self) -> Handle {
        self.next_handle += 1;
        self.next_handle
    }

    fn handle_of(&self, id: &OrderId) -> Option<Handle> {
        self.ext_index.get(id).copied()
    }

    pub fn get(&self, id: OrderId) -> Result<&Order, StoreError> {
        self.handle_of(&id)
            .and_then(|h| self.orders.get(&h))
            .ok_or(StoreError::NotFound(id))
    }

    pub fn is_alive(&self, id: OrderId) -> bool {
        self.live_order_ids.contains(&id)
    }

    pub fn is_pending(&self, id: OrderId) -> bool {
        self.pending.contains_value(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live_order_ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn open_orders(&self) -> Vec<&Order> {
        self.live_order_ids
            .iter()
            .filter_map(|id| self.handle_of(id).and_then(|h| self.orders.get(&h)))
            .collect()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn dbg_order_map(&self) {
        debug!("******************** <ORDER MAP> *********************");
        for id in &self.live_order_ids {
            debug!(order_id = %id, order = ?self.get(*id).ok(), "alive");
        }
        for (h, order) in &self.orders {
            debug!(handle = h, order = ?order, "order");
        }
        debug!(pending = %self.pending.dbg_string(), "pending");
        debug!("******************** </ORDER MAP> ********************");
    }

    // ------------------------------------------------------------------
    // Outbound requests
    // ------------------------------------------------------------------

    /// Create an order in pending state and dispatch the new-order
    /// request. The fresh id doubles as its own pending-request id; some
    /// venues ack under a different id, which the report handling maps
    /// back through either id.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_new(
        &mut self,
        venue: VenueId,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
        order_type: OrderType,
        time_in_force: TimeInForce,
        now: f64,
    ) -> OrderId {
        let order_id = Uuid::new_v4();
        info!(%order_id, venue, symbol, ?side, price, qty, "send new order");

        let order = Order::new(order_id, venue, symbol, side, price, qty, order_type, time_in_force, now);
        let handle = self.alloc_handle();
        self.orders.insert(handle, order);
        self.ext_index.insert(order_id, handle);
        self.pending.insert(order_id, order_id);

        self.router.dispatch(OrderRequest::New {
            request_id: order_id,
            strategy_id: self.strategy_id,
            venue_id: venue,
            symbol: symbol.to_string(),
            side,
            price,
            qty,
            order_type,
            time_in_force,
        });
        order_id
    }

    /// Cancel an order that is live, or still pending its first ack. The
    /// returned request id is what the venue will report the cancel ack
    /// under.
    pub fn submit_cancel(&mut self, order_id: OrderId) -> Result<OrderId, StoreError> {
        let handle = self.handle_of(&order_id).ok_or(StoreError::NotFound(order_id))?;
        if !self.is_alive(order_id) && !self.is_pending(order_id) {
            return Err(StoreError::NotLive(order_id));
        }
        let order = self.orders.get(&handle).ok_or(StoreError::NotFound(order_id))?;
        let (venue, symbol, side, qty, current_id) =
            (order.venue, order.symbol.clone(), order.side, order.qty, order.id);

        let request_id = Uuid::new_v4();
        info!(%order_id, %request_id, "send cancel");

        self.ext_index.insert(request_id, handle);
        self.pending.insert(current_id, request_id);

        self.router.dispatch(OrderRequest::Cancel {
            request_id,
            orig_order_id: current_id,
            strategy_id: self.strategy_id,
            venue_id: venue,
            symbol,
            side,
            qty,
        });
        Ok(request_id)
    }

    /// Native cancel/replace. Refused before any message goes out when
    /// neither price nor qty would change.
    pub fn submit_cancel_replace(
        &mut self,
        order_id: OrderId,
        price: f64,
        qty: f64,
    ) -> Result<OrderId, StoreError> {
        let handle = self.handle_of(&order_id).ok_or(StoreError::NotFound(order_id))?;
        if !self.is_alive(order_id) && !self.is_pending(order_id) {
            return Err(StoreError::NotLive(order_id));
        }
        let order = self.orders.get(&handle).ok_or(StoreError::NotFound(order_id))?;
        if order.price == price && order.qty == qty {
            return Err(StoreError::NoChange(order_id));
        }
        let (venue, symbol, side, order_type, tif, current_id) = (
            order.venue,
            order.symbol.clone(),
            order.side,
            order.order_type,
            order.time_in_force,
            order.id,
        );

        let request_id = Uuid::new_v4();
        info!(orig_id = %order_id, replace_id = %request_id, price, qty, "send cancel/replace");

        self.ext_index.insert(request_id, handle);
        self.pending.insert(current_id, request_id);

        self.router.dispatch(OrderRequest::Replace {
            request_id,
            orig_order_id: current_id,
            strategy_id: self.strategy_id,
            venue_id: venue,
            symbol,
            side,
            price,
            qty,
            order_type,
            time_in_force: tif,
        });
        Ok(request_id)
    }

    /// Emulated modify for venues without native replace: a plain cancel
    /// of the resting order plus a brand-new order at the new price/qty.
    /// Not atomic; the old order may still fill between the two messages
    /// and the caller has to tolerate that.
    pub fn submit_synthetic_cancel_replace(
        &mut self,
        order_id: OrderId,
        price: f64,
        qty: f64,
        now: f64,
    ) -> Result<OrderId, StoreError> {
        let order = self.get(order_id)?;
        if order.price == price && order.qty == qty {
            return Err(StoreError::NoChange(order_id));
        }
        let (venue, symbol, side) = (order.venue, order.symbol.clone(), order.side);

        let cancel_request_id = self.submit_cancel(order_id)?;
        let new_order_id = self.submit_new(
            venue,
            &symbol,
            side,
            price,
            qty,
            OrderType::Limit,
            TimeInForce::GoodForDay,
            now,
        );
        info!(
            orig_id = %order_id,
            cancel_id = %cancel_request_id,
            new_id = %new_order_id,
            price,
            qty,
            "sent synthetic cancel/replace"
        );
        Ok(new_order_id)
    }

    /// Cancel only when the order is actually alive; no-op otherwise.
    pub fn cancel_if_alive(&mut self, order_id: OrderId) -> bool {
        let alive = self.is_alive(order_id);
        if alive {
            debug!(%order_id, "sending cancel for live order");
            if let Err(e) = self.submit_cancel(order_id) {
                warn!(%order_id, %e, "cancel_if_alive failed to send");
            }
        }
        alive
    }

    /// Cancel every live order. The live set is snapshotted first since
    /// cancellation mutates pending bookkeeping.
    pub fn cancel_everything(&mut self) {
        let ids: Vec<OrderId> = self.live_order_ids.iter().copied().collect();
        info!(count = ids.len(), "cancelling everything");
        for id in ids {
            if let Err(e) = self.submit_cancel(id) {
                warn!(order_id = %id, %e, "cancel failed");
            }
        }
    }

    /// Replace one order with a liquidation-priced one likely to
    /// transact, using native or synthetic cancel/replace per the
    /// venue's capability flags.
    pub fn liquidate_order(
        &mut self,
        md: &MarketDataBook,
        order_id: OrderId,
        qty: Option<f64>,
        now: f64,
    ) -> Result<OrderId, StoreError> {
        let order = self.get(order_id)?;
        let qty = qty.unwrap_or(order.qty);
        let (side, symbol, venue, current_id) =
            (order.side, order.symbol.clone(), order.venue, order.id);
        let price = md.liquidation_price(side, &symbol, venue)?;
        if self.venues.use_synthetic_cancel_replace(venue) {
            self.submit_synthetic_cancel_replace(current_id, price, qty, now)
        } else {
            self.submit_cancel_replace(current_id, price, qty)
        }
    }

    /// Replace all open orders with liquidation-priced ones.
    pub fn liquidate_all_open_orders(&mut self, md: &MarketDataBook, now: f64) -> Vec<OrderId> {
        let ids: Vec<OrderId> = self.live_order_ids.iter().copied().collect();
        info!(count = ids.len(), "liquidating all open orders");
        let mut request_ids = Vec::new();
        for id in ids {
            match self.liquidate_order(md, id, None, now) {
                Ok(rid) => request_ids.push(rid),
                Err(e) => warn!(order_id = %id, %e, "liquidation failed"),
            }
        }
        request_ids
    }

    // ------------------------------------------------------------------
    // Inbound reconciliation
    // ------------------------------------------------------------------

    pub fn apply(&mut self, msg: &OrderEngineMsg, now: f64) -> Result<(), StoreError> {
        match msg {
            OrderEngineMsg::Exec(er) => self.apply_execution_report(er, now),
            OrderEngineMsg::CancelReject(cr) => self.apply_cancel_reject(cr),
        }
    }

    fn update_order_fields(order: &mut Order, er: &ExecutionReport, now: f64) {
        let mut changed = false;
        if order.price != er.price {
            order.price = er.price;
            changed = true;
        }
        if order.qty != er.order_qty {
            order.qty = er.order_qty;
            changed = true;
        }
        if order.cum_qty != er.cum_qty {
            order.cum_qty = er.cum_qty;
            changed = true;
        }
        if order.leaves_qty != er.leaves_qty {
            order.leaves_qty = er.leaves_qty;
            changed = true;
        }
        if let Some(avg) = er.avg_price {
            if avg > 0.0 && order.avg_price != Some(avg) {
                order.avg_price = Some(avg);
                changed = true;
            }
        }
        if order.last_price != er.last_price {
            order.last_price = er.last_price;
            changed = true;
        }
        if order.last_shares != er.last_shares {
            order.last_shares = er.last_shares;
            changed = true;
        }
        order.status = Some(er.order_status);
        if changed {
            order.last_update_time = now;
        }
    }

    fn rename(&mut self, handle: Handle, new_id: OrderId) {
        if let Some(order) = self.orders.get_mut(&handle) {
            debug!(old_id = %order.id, %new_id, "renaming order");
            order.id = new_id;
        }
        self.ext_index.insert(new_id, handle);
    }

    fn apply_fill(&mut self, handle: Handle) {
        if let Some(order) = self.orders.get(&handle) {
            self.positions
                .apply_fill(&order.symbol, order.side, order.last_shares, order.last_price);
            if let Some(pos) = self.positions.get(&order.symbol) {
                NET_POSITION
                    .with_label_values(&[&pos.symbol])
                    .set(pos.net_qty());
            }
            self.positions.log_all();
        }
    }

    /// Central reconciliation of one execution report. Unordered,
    /// duplicated and unsolicited reports are the norm, not the
    /// exception; anything genuinely outside the protocol we speak is a
    /// fatal error instead of a silent skip.
    pub fn apply_execution_report(
        &mut self,
        er: &ExecutionReport,
        now: f64,
    ) -> Result<(), StoreError> {
        let cl = er.cl_order_id;
        let orig = match er.orig_cl_order_id {
            Some(o) => o,
            None => {
                // some engines leave orig unset on plain new-order acks
                debug!(%cl, "orig_cl_order_id not set, using cl_order_id");
                cl
            }
        };

        info!(
            venue_id = er.venue_id,
            cl_order_id = %cl,
            orig_cl_order_id = %orig,
            trans = ?er.exec_trans_type,
            exec = ?er.exec_type,
            status = ?er.order_status,
            symbol = %er.symbol,
            side = ?er.side,
            price = er.price,
            qty = er.order_qty,
            cum_qty = er.cum_qty,
            leaves_qty = er.leaves_qty,
            last_shares = er.last_shares,
            "execution report"
        );

        // Protocol paths never implemented: CORRECT transactions modify a
        // previous execution via exec_ref_id, and the bust/suspend exec
        // types have no recovery story here.
        if er.exec_trans_type == ExecTransType::Correct {
            return Err(StoreError::UnsupportedTransaction(er.exec_trans_type));
        }
        if matches!(
            er.exec_type,
            ExecType::Stopped | ExecType::Suspended | ExecType::Restated | ExecType::Calculated
        ) {
            return Err(StoreError::UnsupportedExecType(er.exec_type));
        }

        let handle = self
            .handle_of(&orig)
            .or_else(|| self.handle_of(&cl))
            .ok_or(StoreError::UnknownReportTarget { cl, orig })?;

        if let Some(order) = self.orders.get_mut(&handle) {
            Self::update_order_fields(order, er, now);
        }

        let mut removed_in_branch = false;

        match er.exec_trans_type {
            ExecTransType::New => match er.exec_type {
                ExecType::New => {
                    // ack may arrive under the request id or a venue-assigned one
                    let ack_id = if self.pending.contains_value(&cl) {
                        cl
                    } else if self.pending.contains_value(&orig) {
                        orig
                    } else {
                        return Err(StoreError::UnexpectedAck(cl));
                    };
                    self.pending.remove_value(&ack_id);
                    if self.orders.get(&handle).map(|o| o.id) != Some(cl) {
                        self.rename(handle, cl);
                    }
                    self.live_order_ids.insert(cl);
                }
                ExecType::Cancelled | ExecType::Replace => {
                    if !self.pending.contains_value(&cl) {
                        // ECNs occasionally confirm cancels nobody asked for
                        warn!(%cl, %orig, exec = ?er.exec_type, "unsolicited cancel/replace confirmation");
                    } else {
                        if !self.ext_index.contains_key(&orig) {
                            return Err(StoreError::UnknownReportTarget { cl, orig });
                        }
                        if !self.live_order_ids.contains(&orig) {
                            return Err(StoreError::DeadRename(orig));
                        }
                        self.rename(handle, cl);
                        self.live_order_ids.remove(&orig);
                        self.live_order_ids.insert(cl);
                        self.pending.remove_value(&cl);
                        // dropping the old id's key cascades over any other
                        // request still chained off the now-dead id
                        self.pending.remove_key(&orig);
                    }
                }
                ExecType::Fill | ExecType::PartialFill => {
                    self.apply_fill(handle);
                    // some venues report partials with exec_type FILL; only
                    // the order status distinguishes a full fill
                    if er.order_status == OrderStatus::Fill {
                        self.live_order_ids.remove(&cl);
                        removed_in_branch = true;
                    }
                }
                ExecType::Rejected => {
                    if !self.pending.contains_value(&cl) {
                        return Err(StoreError::RejectNotPending(cl));
                    }
                    self.pending.remove_value(&cl);
                    // cascading: a cancel already chained on the rejected id
                    // will never be acked under that chain, drop it too
                    if let Some(chained) = self.pending.values_of(&cl) {
                        debug!(count = chained.len(), %cl, "dropping requests chained off rejected id");
                    }
                    self.pending.remove_key(&cl);
                }
                ExecType::PendingCancel => {
                    info!(%cl, %orig, "pending cancel");
                }
                other => {
                    debug!(%cl, exec = ?other, "execution type carries no bookkeeping");
                }
            },
            ExecTransType::Cancel => {
                warn!(%cl, "unsolicited CANCEL (busted exec) transaction");
                self.dbg_order_map();
            }
            ExecTransType::Status => {
                debug!(%cl, "status transaction, no new information");
            }
            ExecTransType::Correct => unreachable!("rejected above"),
        }

        if er.order_status.is_terminal() {
            if self.live_order_ids.remove(&cl) {
                debug!(%cl, status = ?er.order_status, "removed from live order ids");
            } else if er.exec_trans_type == ExecTransType::New && !removed_in_branch {
                warn!(%cl, status = ?er.order_status, "terminal status for id that was not live");
            }
        }

        LIVE_ORDERS.set(self.live_order_ids.len() as i64);
        Ok(())
    }

    /// A cancel (or replace) request bounced. The request id is dropped
    /// from pending; an unknown request id usually means the chain was
    /// already torn down by a reject on the original order.
    pub fn apply_cancel_reject(&mut self, cr: &CancelReject) -> Result<(), StoreError> {
        warn!(
            cl_order_id = %cr.cl_order_id,
            orig_cl_order_id = %cr.orig_cl_order_id,
            reason = %cr.reason,
            "cancel reject"
        );
        if !self.ext_index.contains_key(&cr.orig_cl_order_id) {
            return Err(StoreError::UnknownOrder(cr.orig_cl_order_id));
        }
        if self.live_order_ids.remove(&cr.cl_order_id) {
            debug!(cl_order_id = %cr.cl_order_id, "cancel request removed from live ids");
        }
        match self.pending.key_of(&cr.cl_order_id).cloned() {
            Some(target) => {
                info!(
                    order_id = %target,
                    request_id = %cr.cl_order_id,
                    "pending request rejected"
                );
                self.pending.remove_value(&cr.cl_order_id);
            }
            None => {
                warn!(
                    cl_order_id = %cr.cl_order_id,
                    "unexpected cancel reject - NEW/REPLACE rejected earlier or order already cancelled?"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VenueCfg, VenueRegistry};
    use crate::domain::Quote;
    use tokio::sync::mpsc;

    fn venue(id: VenueId, synth: bool) -> VenueCfg {
        VenueCfg {
            venue_id: id,
            mic_name: format!("V{id}"),
            use_synthetic_cancel_replace: synth,
            fill_ms: 10,
        }
    }

    fn store_with_venues(
        specs: &[(VenueId, bool)],
    ) -> (OrderStore, Vec<(VenueId, mpsc::Receiver<OrderRequest>)>) {
        let mut router = OrderRouter::new();
        let mut rxs = Vec::new();
        for &(id, _) in specs {
            let (tx, rx) = mpsc::channel(64);
            router.add_gateway(id, tx);
            rxs.push((id, rx));
        }
        let registry = VenueRegistry::new(specs.iter().map(|&(id, synth)| venue(id, synth)));
        let store = OrderStore::new(Uuid::new_v4(), router, registry);
        (store, rxs)
    }

    fn single_venue_store() -> (OrderStore, mpsc::Receiver<OrderRequest>) {
        let (store, mut rxs) = store_with_venues(&[(1, false)]);
        (store, rxs.remove(0).1)
    }

    fn drain(rx: &mut mpsc::Receiver<OrderRequest>) -> Vec<OrderRequest> {
        let mut out = Vec::new();
        while let Ok(req) = rx.try_recv() {
            out.push(req);
        }
        out
    }

    fn report(
        store: &OrderStore,
        cl: OrderId,
        orig: OrderId,
        exec_type: ExecType,
        status: OrderStatus,
    ) -> ExecutionReport {
        let order = store.get(orig).or_else(|_| store.get(cl)).unwrap();
        ExecutionReport {
            cl_order_id: cl,
            orig_cl_order_id: Some(orig),
            exec_trans_type: ExecTransType::New,
            exec_type,
            order_status: status,
            symbol: order.symbol.clone(),
            side: order.side,
            venue_id: order.venue,
            price: order.price,
            order_qty: order.qty,
            cum_qty: order.cum_qty,
            leaves_qty: order.qty - order.cum_qty,
            avg_price: order.avg_price,
            last_price: order.last_price,
            last_shares: 0.0,
        }
    }

    fn ack(store: &OrderStore, id: OrderId) -> ExecutionReport {
        report(store, id, id, ExecType::New, OrderStatus::New)
    }

    fn fill(store: &OrderStore, id: OrderId, shares: f64, price: f64) -> ExecutionReport {
        let order = store.get(id).unwrap();
        let cum = order.cum_qty + shares;
        let full = cum >= order.qty;
        let mut er = report(
            store,
            id,
            id,
            if full { ExecType::Fill } else { ExecType::PartialFill },
            if full { OrderStatus::Fill } else { OrderStatus::PartialFill },
        );
        er.cum_qty = cum;
        er.leaves_qty = order.qty - cum;
        er.last_shares = shares;
        er.last_price = price;
        er.avg_price = Some(price);
        er
    }

    fn submit(store: &mut OrderStore, side: Side, price: f64, qty: f64) -> OrderId {
        store.submit_new(
            1,
            "EUR/USD",
            side,
            price,
            qty,
            OrderType::Limit,
            TimeInForce::GoodForDay,
            0.0,
        )
    }

    fn assert_invariants(store: &OrderStore) {
        for id in &store.live_order_ids {
            assert!(store.get(*id).is_ok(), "live id {id} has no order");
        }
        for order in store.orders.values() {
            if order.status.is_some() {
                assert!(
                    (order.cum_qty + order.leaves_qty - order.qty).abs() < 1e-9,
                    "cum+leaves != qty for {}",
                    order.id
                );
            }
        }
    }

    #[test]
    fn new_order_is_pending_until_acked() {
        let (mut store, mut rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        assert!(store.is_pending(id));
        assert!(!store.is_alive(id));

        let reqs = drain(&mut rx);
        assert_eq!(reqs.len(), 1);
        match &reqs[0] {
            OrderRequest::New { request_id, price, qty, .. } => {
                assert_eq!(*request_id, id);
                assert_eq!(*price, 1.2005);
                assert_eq!(*qty, 1e6);
            }
            other => panic!("expected New, got {other:?}"),
        }

        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();
        assert!(!store.is_pending(id));
        assert!(store.is_alive(id));
        assert_invariants(&store);
    }

    #[test]
    fn ack_under_venue_assigned_id_renames() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);

        let venue_id = Uuid::new_v4();
        let er = report(&store, venue_id, id, ExecType::New, OrderStatus::New);
        store.apply_execution_report(&er, 1.0).unwrap();

        assert!(store.is_alive(venue_id));
        assert!(!store.is_alive(id));
        assert!(!store.is_pending(id));
        // the old id still resolves to the same logical order
        assert_eq!(store.get(id).unwrap().id, venue_id);
        assert_invariants(&store);
    }

    #[test]
    fn partial_then_full_fill() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();

        store
            .apply_execution_report(&fill(&store, id, 400_000.0, 1.2005), 2.0)
            .unwrap();
        assert!(store.is_alive(id));
        assert_eq!(store.get(id).unwrap().cum_qty, 400_000.0);
        assert_eq!(store.position("EUR/USD").unwrap().long_qty, 400_000.0);
        assert_invariants(&store);

        store
            .apply_execution_report(&fill(&store, id, 600_000.0, 1.2006), 3.0)
            .unwrap();
        assert!(!store.is_alive(id));
        assert_eq!(store.get(id).unwrap().cum_qty, 1e6);
        assert_eq!(store.position("EUR/USD").unwrap().long_qty, 1e6);
        assert_invariants(&store);
    }

    #[test]
    fn offer_fills_accrue_short() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Offer, 1.2010, 500_000.0);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();
        store
            .apply_execution_report(&fill(&store, id, 500_000.0, 1.2010), 2.0)
            .unwrap();
        let pos = store.position("EUR/USD").unwrap();
        assert_eq!(pos.short_qty, 500_000.0);
        assert_eq!(pos.net_qty(), -500_000.0);
    }

    #[test]
    fn cancel_ack_renames_and_terminates() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();

        let req = store.submit_cancel(id).unwrap();
        assert!(store.is_pending(req));

        let er = report(&store, req, id, ExecType::Cancelled, OrderStatus::Cancelled);
        store.apply_execution_report(&er, 2.0).unwrap();

        assert!(!store.is_alive(id));
        assert!(!store.is_alive(req));
        assert!(!store.is_pending(req));
        assert!(!store.is_pending(id));
        assert_eq!(store.get(req).unwrap().status, Some(OrderStatus::Cancelled));
        assert_eq!(store.live_count(), 0);
        assert_invariants(&store);
    }

    #[test]
    fn replace_ack_renames_and_stays_live() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();

        let req = store.submit_cancel_replace(id, 1.2001, 1e6).unwrap();
        let mut er = report(&store, req, id, ExecType::Replace, OrderStatus::Replace);
        er.price = 1.2001;
        store.apply_execution_report(&er, 2.0).unwrap();

        assert!(store.is_alive(req));
        assert!(!store.is_alive(id));
        assert!(!store.is_pending(req));
        assert_eq!(store.get(req).unwrap().price, 1.2001);
        // old id still resolves to the renamed order
        assert_eq!(store.get(id).unwrap().id, req);
        assert_invariants(&store);
    }

    #[test]
    fn replace_without_change_is_refused() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();
        let err = store.submit_cancel_replace(id, 1.2005, 1e6).unwrap_err();
        assert!(matches!(err, StoreError::NoChange(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn cancel_of_dead_order_is_refused() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();
        store
            .apply_execution_report(&fill(&store, id, 1e6, 1.2005), 2.0)
            .unwrap();
        assert!(matches!(store.submit_cancel(id), Err(StoreError::NotLive(_))));
    }

    #[test]
    fn reject_cascades_over_chained_cancel() {
        // new order rejected while a cancel on it is already in flight:
        // both pending entries vanish, and the late cancel-reject is a
        // recoverable curiosity rather than an error
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        let cancel_req = store.submit_cancel(id).unwrap();
        assert!(store.is_pending(cancel_req));

        let er = report(&store, id, id, ExecType::Rejected, OrderStatus::Rejected);
        store.apply_execution_report(&er, 1.0).unwrap();

        assert!(!store.is_pending(id));
        assert!(!store.is_pending(cancel_req));
        assert_eq!(store.pending_count(), 0);

        let cr = CancelReject {
            cl_order_id: cancel_req,
            orig_cl_order_id: id,
            reason: "unknown order".into(),
        };
        store.apply_cancel_reject(&cr).unwrap();
        assert_invariants(&store);
    }

    #[test]
    fn cancel_reject_resolves_pending_request() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();
        let req = store.submit_cancel(id).unwrap();

        let cr = CancelReject {
            cl_order_id: req,
            orig_cl_order_id: id,
            reason: "too late".into(),
        };
        store.apply_cancel_reject(&cr).unwrap();
        assert!(!store.is_pending(req));
        // the order itself stays live
        assert!(store.is_alive(id));
    }

    #[test]
    fn cancel_reject_for_unknown_order_is_fatal() {
        let (mut store, _rx) = single_venue_store();
        let cr = CancelReject {
            cl_order_id: Uuid::new_v4(),
            orig_cl_order_id: Uuid::new_v4(),
            reason: "?".into(),
        };
        let err = store.apply_cancel_reject(&cr).unwrap_err();
        assert!(matches!(err, StoreError::UnknownOrder(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn correct_transaction_is_fatal() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        let mut er = ack(&store, id);
        er.exec_trans_type = ExecTransType::Correct;
        let err = store.apply_execution_report(&er, 1.0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn busted_exec_types_are_fatal() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        for et in [ExecType::Stopped, ExecType::Suspended, ExecType::Restated, ExecType::Calculated] {
            let mut er = ack(&store, id);
            er.exec_type = et;
            let err = store.apply_execution_report(&er, 1.0).unwrap_err();
            assert!(err.is_fatal(), "{et:?} should be fatal");
        }
    }

    #[test]
    fn unsolicited_cancel_confirmation_is_tolerated() {
        let (mut store, _rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();

        // a cancel confirmation nobody asked for, under a fresh id
        let er = report(&store, Uuid::new_v4(), id, ExecType::Cancelled, OrderStatus::Cancelled);
        store.apply_execution_report(&er, 2.0).unwrap();
        // no rename happened; the order is still resting under its id
        assert!(store.is_alive(id));
    }

    #[test]
    fn report_for_unknown_order_is_fatal() {
        let (mut store, _rx) = single_venue_store();
        let ghost = Uuid::new_v4();
        let er = ExecutionReport {
            cl_order_id: ghost,
            orig_cl_order_id: None,
            exec_trans_type: ExecTransType::New,
            exec_type: ExecType::New,
            order_status: OrderStatus::New,
            symbol: "EUR/USD".into(),
            side: Side::Bid,
            venue_id: 1,
            price: 1.2,
            order_qty: 1e6,
            cum_qty: 0.0,
            leaves_qty: 1e6,
            avg_price: None,
            last_price: 0.0,
            last_shares: 0.0,
        };
        let err = store.apply_execution_report(&er, 1.0).unwrap_err();
        assert!(matches!(err, StoreError::UnknownReportTarget { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn synthetic_cancel_replace_sends_cancel_plus_new() {
        let (mut store, mut rxs) = store_with_venues(&[(3, true)]);
        let id = store.submit_new(
            3,
            "EUR/USD",
            Side::Offer,
            1.2010,
            1e6,
            OrderType::Limit,
            TimeInForce::GoodForDay,
            0.0,
        );
        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();

        let new_id = store
            .submit_synthetic_cancel_replace(id, 1.2004, 600_000.0, 2.0)
            .unwrap();
        assert_ne!(new_id, id);
        assert!(store.is_pending(new_id));

        let reqs = drain(&mut rxs[0].1);
        // original new, then cancel, then replacement new
        assert_eq!(reqs.len(), 3);
        assert!(matches!(reqs[1], OrderRequest::Cancel { orig_order_id, .. } if orig_order_id == id));
        match &reqs[2] {
            OrderRequest::New { request_id, price, qty, .. } => {
                assert_eq!(*request_id, new_id);
                assert_eq!(*price, 1.2004);
                assert_eq!(*qty, 600_000.0);
            }
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[test]
    fn liquidate_order_uses_venue_capability() {
        let (mut store, mut rxs) = store_with_venues(&[(1, false), (3, true)]);
        let mut md = MarketDataBook::new();
        md.update(
            &crate::domain::BboTick {
                symbol: "EUR/USD".into(),
                venue_id: 1,
                bid: Some(Quote { price: 1.2000, size: 1e6 }),
                ask: Some(Quote { price: 1.2010, size: 1e6 }),
            },
            0.0,
        );
        md.update(
            &crate::domain::BboTick {
                symbol: "EUR/USD".into(),
                venue_id: 3,
                bid: Some(Quote { price: 1.1999, size: 1e6 }),
                ask: Some(Quote { price: 1.2011, size: 1e6 }),
            },
            0.0,
        );

        // native venue: liquidation goes out as a Replace
        let a = submit(&mut store, Side::Bid, 1.1995, 1e6);
        store.apply_execution_report(&ack(&store, a), 1.0).unwrap();
        store.liquidate_order(&md, a, Some(400_000.0), 2.0).unwrap();
        let reqs = drain(&mut rxs[0].1);
        match reqs.last().unwrap() {
            OrderRequest::Replace { price, qty, .. } => {
                assert!((price - 1.20136).abs() < 1e-9);
                assert_eq!(*qty, 400_000.0);
            }
            other => panic!("expected Replace, got {other:?}"),
        }

        // synthetic venue: cancel plus new
        let b = store.submit_new(
            3,
            "EUR/USD",
            Side::Offer,
            1.2015,
            1e6,
            OrderType::Limit,
            TimeInForce::GoodForDay,
            0.0,
        );
        store.apply_execution_report(&ack(&store, b), 1.0).unwrap();
        store.liquidate_order(&md, b, None, 2.0).unwrap();
        let reqs = drain(&mut rxs[1].1);
        assert!(matches!(reqs[reqs.len() - 2], OrderRequest::Cancel { .. }));
        match reqs.last().unwrap() {
            OrderRequest::New { price, .. } => {
                // selling out through venue 3's bid
                assert!((price - 1.19954).abs() < 1e-9);
            }
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[test]
    fn cancel_everything_snapshots_live_set() {
        let (mut store, mut rx) = single_venue_store();
        let a = submit(&mut store, Side::Bid, 1.2005, 1e6);
        let b = submit(&mut store, Side::Offer, 1.2010, 1e6);
        store.apply_execution_report(&ack(&store, a), 1.0).unwrap();
        store.apply_execution_report(&ack(&store, b), 1.0).unwrap();
        drain(&mut rx);

        store.cancel_everything();
        let reqs = drain(&mut rx);
        assert_eq!(reqs.len(), 2);
        assert!(reqs.iter().all(|r| matches!(r, OrderRequest::Cancel { .. })));
    }

    #[test]
    fn cancel_if_alive_is_a_noop_on_dead_orders() {
        let (mut store, mut rx) = single_venue_store();
        let id = submit(&mut store, Side::Bid, 1.2005, 1e6);
        drain(&mut rx);
        // pending, not live
        assert!(!store.cancel_if_alive(id));
        assert!(drain(&mut rx).is_empty());

        store.apply_execution_report(&ack(&store, id), 1.0).unwrap();
        assert!(store.cancel_if_alive(id));
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
