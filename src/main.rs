// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : uncross_bot_rust — FX market uncrosser in Rust
Version : 0.3.0

Summary : Aggregates best bid/offer across multiple ECN venues, detects
          crossed quotes above a magnitude threshold, sends a paired
          buy/sell against the crossed venues, reconciles acks, fills,
          cancels, replaces and rejects into a consistent order/position
          state, and unwinds asymmetric fills with liquidation-priced
          rescue orders. Exposes Prometheus metrics and records JSONL
          events.
=============================================================================
*/
mod config;
mod domain;
mod feed;
mod gateway; // mock venue gateway (ack -> fill after delay)
mod market_data;
mod metrics;
mod one_to_many;
mod order_store;
mod positions;
mod posttrade;
mod recorder;
mod risk;
mod router;
mod strategy;

use std::time::{Duration as StdDuration, Instant};
use tokio::{
    select,
    sync::mpsc,
    time::{interval, sleep, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::domain::{now_ts, BboTick, Event, OrderEngineMsg, OrderRequest};
use crate::order_store::OrderStore;
use crate::router::OrderRouter;
use crate::strategy::{StrategyParams, Uncrosser};

enum LoopAction {
    Continue,
    Fatal(String),
    Shutdown,
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    // ---- Load config & venue table ----
    let (args, venues) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        strategy_id = %args.strategy_id,
        symbols = ?args.symbols,
        venues = venues.len(),
        min_cross_magnitude = args.min_cross_magnitude,
        new_order_delay = args.new_order_delay,
        max_order_lifetime = args.max_order_lifetime,
        max_order_qty = args.max_order_qty,
        startup_wait = args.startup_wait,
        "startup config"
    );

    // ---- Buses ----
    let (md_tx, mut md_rx) = mpsc::channel::<BboTick>(4096);
    let (exec_central_tx, exec_central_rx) = mpsc::channel::<OrderEngineMsg>(4096);

    // Fan-out order engine messages: gateways -> central -> (engine, posttrade)
    let (exec_to_engine_tx, mut exec_to_engine_rx) = mpsc::channel::<OrderEngineMsg>(4096);
    let (exec_to_post_tx, exec_to_post_rx) = mpsc::channel::<OrderEngineMsg>(4096);
    tokio::spawn(async move {
        let mut rx = exec_central_rx;
        while let Some(msg) = rx.recv().await {
            let _ = exec_to_post_tx.send(msg.clone()).await;
            let _ = exec_to_engine_tx.send(msg).await;
        }
    });

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
    }

    // ---- Venue gateways + feeds ----
    let mut order_router = OrderRouter::new();
    order_router.set_recorder(rec_tx.clone());
    for venue_cfg in venues.iter() {
        let (gw_tx, gw_rx) = mpsc::channel::<OrderRequest>(1024);
        order_router.add_gateway(venue_cfg.venue_id, gw_tx);
        tokio::spawn(gateway::run_venue(
            gw_rx,
            exec_central_tx.clone(),
            venue_cfg.clone(),
        ));
        for symbol in args.symbols.iter().cloned() {
            tokio::spawn(feed::run_mock(md_tx.clone(), symbol, venue_cfg.venue_id));
        }
    }

    // ---- Post-trade logging tap ----
    tokio::spawn(posttrade::run(exec_to_post_rx));

    // ---- Strategy context (single owner of book/store/cross) ----
    let store = OrderStore::new(args.strategy_id, order_router, venues.clone());
    let params = StrategyParams {
        min_cross_magnitude: args.min_cross_magnitude,
        new_order_delay: args.new_order_delay,
        max_order_lifetime: args.max_order_lifetime,
        max_order_qty: args.max_order_qty,
    };
    let mut uncrosser = Uncrosser::new(store, params);

    // ---- Warm-up: absorb market data only, no trading decisions ----
    info!(seconds = args.startup_wait, "synchronizing market data");
    let warmup_deadline = Instant::now() + StdDuration::from_secs_f64(args.startup_wait);
    loop {
        let remaining = warmup_deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, md_rx.recv()).await {
            Ok(Some(tick)) => {
                uncrosser.on_tick(&tick, now_ts());
                let _ = rec_tx.try_send(Event::Md(tick));
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    info!("warm-up complete, entering main loop");

    // ---- Main loop ----
    let mut heartbeat = interval(Duration::from_secs(1));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick_count: u64 = 0;

    loop {
        let action = select! {
            maybe_tick = md_rx.recv() => {
                match maybe_tick {
                    Some(tick) => {
                        tick_count += 1;
                        uncrosser.on_tick(&tick, now_ts());
                        let _ = rec_tx.try_send(Event::Md(tick));
                        LoopAction::Continue
                    }
                    None => LoopAction::Fatal("market data channel closed".into()),
                }
            }
            maybe_msg = exec_to_engine_rx.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        match &msg {
                            OrderEngineMsg::Exec(er) => {
                                let _ = rec_tx.try_send(Event::Exec(er.clone()));
                            }
                            OrderEngineMsg::CancelReject(cr) => {
                                let _ = rec_tx.try_send(Event::CancelRej(cr.clone()));
                            }
                        }
                        match uncrosser.store.apply(&msg, now_ts()) {
                            Ok(()) => LoopAction::Continue,
                            Err(e) if e.is_fatal() => {
                                LoopAction::Fatal(format!("order engine protocol violation: {e}"))
                            }
                            Err(e) => {
                                warn!(%e, "recoverable order engine anomaly");
                                LoopAction::Continue
                            }
                        }
                    }
                    None => LoopAction::Fatal("order engine channel closed".into()),
                }
            }
            _ = heartbeat.tick() => {
                info!(
                    ticks = tick_count,
                    live_orders = uncrosser.store.live_count(),
                    pending = uncrosser.store.pending_count(),
                    symbols = uncrosser.book.symbol_count(),
                    active_cross = uncrosser.has_active_cross(),
                    "heartbeat"
                );
                for symbol in &args.symbols {
                    if let (Ok(bid), Ok(offer)) = (
                        uncrosser.book.best_bid(symbol),
                        uncrosser.book.best_offer(symbol),
                    ) {
                        debug!(%symbol, bid = bid.price, offer = offer.price, "bbo");
                    }
                }
                if let Some(cross) = uncrosser.cross() {
                    debug!(
                        symbol = %cross.bid_entry.symbol,
                        sent = cross.sent,
                        rescue = ?cross.rescue_order_id,
                        "active cross"
                    );
                }
                tick_count = 0;
                LoopAction::Continue
            }
            _ = tokio::signal::ctrl_c() => LoopAction::Shutdown,
        };

        match action {
            LoopAction::Continue => {}
            LoopAction::Shutdown => {
                info!("shutdown requested");
                let _ = rec_tx.try_send(Event::Note("shutdown requested".into()));
                for order in uncrosser.store.open_orders() {
                    info!(order_id = %order.id, venue = order.venue, cum_qty = order.cum_qty, "open at shutdown");
                }
                uncrosser.store.positions().log_all();
                if args.liquidate_on_exit {
                    uncrosser
                        .store
                        .liquidate_all_open_orders(&uncrosser.book, now_ts());
                } else {
                    uncrosser.store.cancel_everything();
                }
                // give the cancels a moment to drain before exiting
                sleep(Duration::from_millis(200)).await;
                break;
            }
            LoopAction::Fatal(msg) => {
                error!(%msg, "halting strategy");
                let _ = rec_tx.try_send(Event::Note(format!("fatal: {msg}")));
                uncrosser.store.cancel_everything();
                sleep(Duration::from_millis(200)).await;
                std::process::exit(1);
            }
        }

        // One iteration of the outgoing decision logic after every event.
        if let Err(e) = uncrosser.poll(now_ts()) {
            if e.is_fatal() {
                error!(%e, "fatal strategy error, halting");
                let _ = rec_tx.try_send(Event::Note(format!("fatal: {e}")));
                uncrosser.store.cancel_everything();
                sleep(Duration::from_millis(200)).await;
                std::process::exit(1);
            } else {
                warn!(%e, "strategy poll could not complete");
            }
        }
    }

    info!("stopped");
}
