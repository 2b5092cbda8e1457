// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Market data --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("md_ticks_total", "market data ticks").unwrap());

// -------- Cross lifecycle --------
pub static CROSSES_DETECTED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("crosses_detected_total", "crossed pairs above threshold").unwrap());

pub static CROSSES_SENT: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("crosses_sent_total", "crosses with both legs dispatched").unwrap());

pub static CROSSES_RESOLVED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("crosses_resolved_total", "crosses fully reconciled").unwrap());

pub static RESCUES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("rescue_orders_total", "rescue orders sent during unwind").unwrap());

pub static REALIZED_PROFIT: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("realized_profit", "cumulative realized cross profit"),
        &["symbol"],
    )
    .unwrap()
});

// -------- Orders --------
pub static ORDER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("order_requests_total", "outbound order requests"),
        &["kind", "venue"],
    )
    .unwrap()
});

pub static EXECS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exec_reports_total", "execution reports"),
        &["exec", "venue"],
    )
    .unwrap()
});

pub static LIVE_ORDERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("live_orders", "orders currently resting in the market").unwrap());

pub static NET_POSITION: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("net_position", "net position per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(CROSSES_DETECTED.clone())),
        REGISTRY.register(Box::new(CROSSES_SENT.clone())),
        REGISTRY.register(Box::new(CROSSES_RESOLVED.clone())),
        REGISTRY.register(Box::new(RESCUES.clone())),
        REGISTRY.register(Box::new(REALIZED_PROFIT.clone())),
        REGISTRY.register(Box::new(ORDER_REQUESTS.clone())),
        REGISTRY.register(Box::new(EXECS.clone())),
        REGISTRY.register(Box::new(LIVE_ORDERS.clone())),
        REGISTRY.register(Box::new(NET_POSITION.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps the Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
