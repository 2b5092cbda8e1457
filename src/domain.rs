// ===============================
// src/domain.rs
// ===============================
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type VenueId = i64;
pub type OrderId = Uuid;

/// Wall-clock seconds since the unix epoch, as used for all strategy timers.
pub fn now_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Offer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GoodForDay,
    GoodTilCancel,
    ImmediateOrCancel,
    FillOrKill,
}

/// Execution report transaction type (FIX tag 20).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecTransType {
    New,
    Cancel,
    Correct,
    Status,
}

/// Execution report type (FIX tag 150). Often, but not always, the same
/// as order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecType {
    New,
    PartialFill,
    Fill,
    DoneForDay,
    Cancelled,
    Replace,
    PendingCancel,
    Stopped,
    Rejected,
    Suspended,
    PendingNew,
    Calculated,
    Expired,
    Restated,
    PendingReplace,
}

/// Order status (FIX tag 39).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartialFill,
    Fill,
    DoneForDay,
    Cancelled,
    Replace,
    PendingCancel,
    Stopped,
    Rejected,
    Suspended,
    PendingNew,
    Calculated,
    Expired,
    Restated,
    PendingReplace,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Fill | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// One side of a venue's quote. Absent sides (no meaningful market) are
/// represented by `Option<Quote>` on the tick, never by magic prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub size: f64,
}

/// Inbound best-bid/offer tick from one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BboTick {
    pub symbol: String,
    pub venue_id: VenueId,
    pub bid: Option<Quote>,
    pub ask: Option<Quote>,
}

/// Immutable snapshot of one venue's quote on one side of the book.
/// Superseded, never mutated, on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub price: f64,
    pub size: f64,
    pub venue_id: VenueId,
    pub symbol: String,
    pub timestamp: f64,
}

impl Entry {
    /// Change detection compares the quote itself, not the timestamp.
    pub fn same_quote(&self, other: &Entry) -> bool {
        self.price == other.price && self.size == other.size
    }
}

/// Inbound execution report from an order engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub cl_order_id: OrderId,
    pub orig_cl_order_id: Option<OrderId>,
    pub exec_trans_type: ExecTransType,
    pub exec_type: ExecType,
    pub order_status: OrderStatus,
    pub symbol: String,
    pub side: Side,
    pub venue_id: VenueId,
    pub price: f64,
    pub order_qty: f64,
    pub cum_qty: f64,
    pub leaves_qty: f64,
    pub avg_price: Option<f64>,
    pub last_price: f64,
    pub last_shares: f64,
}

/// Inbound cancel-reject from an order engine. `cl_order_id` is the id
/// of the cancel request itself, `orig_cl_order_id` the order it targeted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelReject {
    pub cl_order_id: OrderId,
    pub orig_cl_order_id: OrderId,
    pub reason: String,
}

/// Messages flowing back from venue gateways into the strategy loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEngineMsg {
    Exec(ExecutionReport),
    CancelReject(CancelReject),
}

/// Outbound order request, dispatched to the gateway channel of its venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderRequest {
    New {
        request_id: OrderId,
        strategy_id: Uuid,
        venue_id: VenueId,
        symbol: String,
        side: Side,
        price: f64,
        qty: f64,
        order_type: OrderType,
        time_in_force: TimeInForce,
    },
    Cancel {
        request_id: OrderId,
        orig_order_id: OrderId,
        strategy_id: Uuid,
        venue_id: VenueId,
        symbol: String,
        side: Side,
        qty: f64,
    },
    Replace {
        request_id: OrderId,
        orig_order_id: OrderId,
        strategy_id: Uuid,
        venue_id: VenueId,
        symbol: String,
        side: Side,
        price: f64,
        qty: f64,
        order_type: OrderType,
        time_in_force: TimeInForce,
    },
}

impl OrderRequest {
    pub fn venue_id(&self) -> VenueId {
        match self {
            OrderRequest::New { venue_id, .. }
            | OrderRequest::Cancel { venue_id, .. }
            | OrderRequest::Replace { venue_id, .. } => *venue_id,
        }
    }

    pub fn request_id(&self) -> OrderId {
        match self {
            OrderRequest::New { request_id, .. }
            | OrderRequest::Cancel { request_id, .. }
            | OrderRequest::Replace { request_id, .. } => *request_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OrderRequest::New { .. } => "new",
            OrderRequest::Cancel { .. } => "cancel",
            OrderRequest::Replace { .. } => "replace",
        }
    }
}

/// Recorded event stream (JSONL recorder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Md(BboTick),
    Req(OrderRequest),
    Exec(ExecutionReport),
    CancelRej(CancelReject),
    Note(String),
}
