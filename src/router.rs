// ===============================
// src/router.rs
// ===============================
//
// Outbound dispatch: every venue has its own gateway channel, keyed by
// venue id. The strategy loop is the only sender; requests it emits are
// fire-and-forget at this layer, reconciliation happens when execution
// reports come back.
//
use ahash::AHashMap as HashMap;
use tokio::sync::mpsc;
use tracing::error;

use crate::domain::{Event, OrderRequest, VenueId};
use crate::metrics::ORDER_REQUESTS;

#[derive(Debug, Default)]
pub struct OrderRouter {
    gateways: HashMap<VenueId, mpsc::Sender<OrderRequest>>,
    rec_tx: Option<mpsc::Sender<Event>>,
}

impl OrderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gateway(&mut self, venue_id: VenueId, tx: mpsc::Sender<OrderRequest>) {
        self.gateways.insert(venue_id, tx);
    }

    pub fn set_recorder(&mut self, tx: mpsc::Sender<Event>) {
        self.rec_tx = Some(tx);
    }

    pub fn dispatch(&self, req: OrderRequest) {
        let venue_id = req.venue_id();
        ORDER_REQUESTS
            .with_label_values(&[req.kind(), &venue_id.to_string()])
            .inc();
        if let Some(rec) = &self.rec_tx {
            let _ = rec.try_send(Event::Req(req.clone()));
        }
        match self.gateways.get(&venue_id) {
            Some(tx) => {
                if let Err(e) = tx.try_send(req) {
                    error!(venue_id, ?e, "order request dropped, gateway channel unavailable");
                }
            }
            None => {
                error!(venue_id, request_id = %req.request_id(), "no gateway for venue, dropping request");
            }
        }
    }
}
