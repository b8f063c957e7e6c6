//! Metrics collection and exposition.
//!
//! # Metrics
//! - `presale_purchases_total` (counter): purchases by rail and outcome
//! - `presale_approvals_total` (counter): approval transactions by outcome
//! - `presale_network_switches_total` (counter): target-chain enforcement by result
//! - `presale_settlement_wait_seconds` (histogram): fiat settlement polling duration
//! - `presale_ledger_healthy` (gauge): 1 when the RPC endpoint answers, else 0
//!
//! Without an installed recorder every call is a no-op, so library code
//! records unconditionally.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_purchase(rail: &'static str, outcome: &'static str) {
    counter!("presale_purchases_total", "rail" => rail, "outcome" => outcome).increment(1);
}

pub fn record_approval(outcome: &'static str) {
    counter!("presale_approvals_total", "outcome" => outcome).increment(1);
}

pub fn record_network_switch(result: &'static str) {
    counter!("presale_network_switches_total", "result" => result).increment(1);
}

pub fn record_settlement_wait(elapsed: Duration, settled: bool) {
    let label = if settled { "settled" } else { "timed_out" };
    histogram!("presale_settlement_wait_seconds", "result" => label).record(elapsed.as_secs_f64());
}

pub fn record_ledger_health(healthy: bool) {
    gauge!("presale_ledger_healthy").set(if healthy { 1.0 } else { 0.0 });
}
