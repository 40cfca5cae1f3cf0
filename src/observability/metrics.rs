//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, outcome
//! - `proxy_request_duration_seconds` (histogram): handling latency
//! - `proxy_cache_lookups_total` (counter): hit / miss
//! - `proxy_blacklist_rejections_total` (counter)
//! - `proxy_tunnels_total` (counter): tunnels by result
//! - `proxy_tunnel_bytes_total` (counter): relayed bytes by direction
//! - `proxy_active_connections` (gauge): current connection count
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade; without an installed recorder
//!   they cost nothing
//! - The Prometheus exporter is only installed when enabled in config

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one handled request.
pub fn record_request(method: &str, status: u16, outcome: &'static str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_blacklisted() {
    counter!("proxy_blacklist_rejections_total").increment(1);
}

/// `result` is one of `established`, `rejected`, `bad_request`, `dial_failed`.
pub fn record_tunnel(result: &'static str) {
    counter!("proxy_tunnels_total", "result" => result).increment(1);
}

pub fn record_tunnel_bytes(client_to_origin: u64, origin_to_client: u64) {
    counter!("proxy_tunnel_bytes_total", "direction" => "client_to_origin").increment(client_to_origin);
    counter!("proxy_tunnel_bytes_total", "direction" => "origin_to_client").increment(origin_to_client);
}

pub fn record_active_connections(active: u64) {
    gauge!("proxy_active_connections").set(active as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_metrics_are_labelled() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_request("GET", 200, "hit", Instant::now());
            record_cache_lookup(true);
            record_tunnel("established");
        });

        let rendered = handle.render();
        assert!(rendered.contains("proxy_requests_total{"));
        assert!(rendered.contains("outcome=\"hit\""));
        assert!(rendered.contains("proxy_cache_lookups_total{result=\"hit\"} 1"));
        assert!(rendered.contains("proxy_tunnels_total{result=\"established\"} 1"));
    }
}
