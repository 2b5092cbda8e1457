// ===============================
// src/posttrade.rs
// ===============================
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{ExecType, OrderEngineMsg};

pub async fn run(mut rx: mpsc::Receiver<OrderEngineMsg>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OrderEngineMsg::Exec(er) => match er.exec_type {
                ExecType::New => info!(cl_id = %er.cl_order_id, venue = er.venue_id, "ACK"),
                ExecType::Fill => info!(cl_id = %er.cl_order_id, qty = er.last_shares, px = er.last_price, "FILL"),
                ExecType::PartialFill => info!(cl_id = %er.cl_order_id, qty = er.last_shares, px = er.last_price, "PARTIAL"),
                ExecType::Cancelled => info!(cl_id = %er.cl_order_id, "CANCELLED"),
                ExecType::Replace => info!(cl_id = %er.cl_order_id, px = er.price, qty = er.order_qty, "REPLACED"),
                ExecType::Rejected => warn!(cl_id = %er.cl_order_id, "REJECT"),
                other => info!(cl_id = %er.cl_order_id, exec = ?other, "EXEC"),
            },
            OrderEngineMsg::CancelReject(cr) => {
                warn!(cl_id = %cr.cl_order_id, reason = %cr.reason, "CANCEL REJECT")
            }
        }
    }
}
