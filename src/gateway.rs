// ===============================
// src/gateway.rs (per-venue mock)
// ===============================
//
// Stand-in for a real order engine connection. Accepts order requests
// for one venue and plays the counterparty: acks new orders, rests them
// for a while, fills them (sometimes partially first), honors cancels
// and replaces, and bounces requests that target nothing.
//
use ahash::AHashMap as HashMap;
use rand::Rng;
use tokio::{
    sync::mpsc,
    time::{interval, Duration, Instant},
};
use tracing::{debug, info};

use crate::config::VenueCfg;
use crate::domain::{
    CancelReject, ExecTransType, ExecType, ExecutionReport, OrderEngineMsg, OrderId, OrderRequest,
    OrderStatus, Side,
};
use crate::metrics::EXECS;

struct RestingOrder {
    id: OrderId,
    symbol: String,
    side: Side,
    price: f64,
    qty: f64,
    cum_qty: f64,
    due: Instant,
}

fn base_report(venue_id: i64, o: &RestingOrder, cl: OrderId, orig: OrderId) -> ExecutionReport {
    ExecutionReport {
        cl_order_id: cl,
        orig_cl_order_id: Some(orig),
        exec_trans_type: ExecTransType::New,
        exec_type: ExecType::New,
        order_status: OrderStatus::New,
        symbol: o.symbol.clone(),
        side: o.side,
        venue_id,
        price: o.price,
        order_qty: o.qty,
        cum_qty: o.cum_qty,
        leaves_qty: o.qty - o.cum_qty,
        avg_price: if o.cum_qty > 0.0 { Some(o.price) } else { None },
        last_price: 0.0,
        last_shares: 0.0,
    }
}

pub async fn run_venue(
    mut rx: mpsc::Receiver<OrderRequest>,
    engine_tx: mpsc::Sender<OrderEngineMsg>,
    cfg: VenueCfg,
) {
    info!(venue = %cfg.mic_name, venue_id = cfg.venue_id, "mock venue gateway up");
    let venue_id = cfg.venue_id;
    let venue_label = venue_id.to_string();
    let mut resting: HashMap<OrderId, RestingOrder> = HashMap::new();
    let mut sweep = interval(Duration::from_millis(5));

    loop {
        tokio::select! {
            maybe_req = rx.recv() => {
                let Some(req) = maybe_req else { break };
                match req {
                    OrderRequest::New { request_id, symbol, side, price, qty, .. } => {
                        let order = RestingOrder {
                            id: request_id,
                            symbol,
                            side,
                            price,
                            qty,
                            cum_qty: 0.0,
                            due: Instant::now() + Duration::from_millis(cfg.fill_ms),
                        };
                        if qty <= 0.0 || price <= 0.0 {
                            let mut er = base_report(venue_id, &order, request_id, request_id);
                            er.exec_type = ExecType::Rejected;
                            er.order_status = OrderStatus::Rejected;
                            EXECS.with_label_values(&["rejected", &venue_label]).inc();
                            let _ = engine_tx.send(OrderEngineMsg::Exec(er)).await;
                            continue;
                        }
                        let ack = base_report(venue_id, &order, request_id, request_id);
                        resting.insert(request_id, order);
                        EXECS.with_label_values(&["ack", &venue_label]).inc();
                        let _ = engine_tx.send(OrderEngineMsg::Exec(ack)).await;
                    }
                    OrderRequest::Cancel { request_id, orig_order_id, .. } => {
                        match resting.remove(&orig_order_id) {
                            Some(order) => {
                                let mut er = base_report(venue_id, &order, request_id, orig_order_id);
                                er.exec_type = ExecType::Cancelled;
                                er.order_status = OrderStatus::Cancelled;
                                EXECS.with_label_values(&["cancelled", &venue_label]).inc();
                                let _ = engine_tx.send(OrderEngineMsg::Exec(er)).await;
                            }
                            None => {
                                let cr = CancelReject {
                                    cl_order_id: request_id,
                                    orig_cl_order_id: orig_order_id,
                                    reason: "unknown or already done".into(),
                                };
                                EXECS.with_label_values(&["cancel_reject", &venue_label]).inc();
                                let _ = engine_tx.send(OrderEngineMsg::CancelReject(cr)).await;
                            }
                        }
                    }
                    OrderRequest::Replace { request_id, orig_order_id, price, qty, .. } => {
                        match resting.remove(&orig_order_id) {
                            Some(mut order) => {
                                order.id = request_id;
                                order.price = price;
                                order.qty = qty;
                                order.due = Instant::now() + Duration::from_millis(cfg.fill_ms);
                                let mut er = base_report(venue_id, &order, request_id, orig_order_id);
                                er.exec_type = ExecType::Replace;
                                er.order_status = OrderStatus::Replace;
                                resting.insert(request_id, order);
                                EXECS.with_label_values(&["replace", &venue_label]).inc();
                                let _ = engine_tx.send(OrderEngineMsg::Exec(er)).await;
                            }
                            None => {
                                let cr = CancelReject {
                                    cl_order_id: request_id,
                                    orig_cl_order_id: orig_order_id,
                                    reason: "nothing to replace".into(),
                                };
                                EXECS.with_label_values(&["cancel_reject", &venue_label]).inc();
                                let _ = engine_tx.send(OrderEngineMsg::CancelReject(cr)).await;
                            }
                        }
                    }
                }
            }
            _ = sweep.tick() => {
                let now = Instant::now();
                let due_ids: Vec<OrderId> = resting
                    .iter()
                    .filter(|(_, o)| o.due <= now)
                    .map(|(id, _)| *id)
                    .collect();
                for id in due_ids {
                    // about a quarter of first touches are partial fills
                    let go_partial = {
                        let o = &resting[&id];
                        o.cum_qty == 0.0 && o.qty > 1.0 && rand::thread_rng().gen_bool(0.25)
                    };
                    if go_partial {
                        let o = resting.get_mut(&id).expect("due order");
                        let shares = (o.qty / 2.0).floor().max(1.0);
                        o.cum_qty += shares;
                        o.due = now + Duration::from_millis(cfg.fill_ms);
                        let mut er = base_report(venue_id, o, o.id, o.id);
                        er.exec_type = ExecType::PartialFill;
                        er.order_status = OrderStatus::PartialFill;
                        er.last_shares = shares;
                        er.last_price = o.price;
                        er.avg_price = Some(o.price);
                        debug!(order = %id, shares, "mock partial fill");
                        EXECS.with_label_values(&["partial_fill", &venue_label]).inc();
                        let _ = engine_tx.send(OrderEngineMsg::Exec(er)).await;
                    } else {
                        let o = resting.remove(&id).expect("due order");
                        let shares = o.qty - o.cum_qty;
                        let mut er = base_report(venue_id, &o, o.id, o.id);
                        er.exec_type = ExecType::Fill;
                        er.order_status = OrderStatus::Fill;
                        er.cum_qty = o.qty;
                        er.leaves_qty = 0.0;
                        er.last_shares = shares;
                        er.last_price = o.price;
                        er.avg_price = Some(o.price);
                        debug!(order = %id, shares, "mock full fill");
                        EXECS.with_label_values(&["fill", &venue_label]).inc();
                        let _ = engine_tx.send(OrderEngineMsg::Exec(er)).await;
                    }
                }
            }
        }
    }
}
