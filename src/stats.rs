//! Aggregate request counters exposed on the metrics port

use crate::dispatch::ProxyResult;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by all request handlers
#[derive(Debug, Default)]
pub struct GatewayStats {
    requests: AtomicU64,
    redirected: AtomicU64,
    denied: AtomicU64,
    not_found: AtomicU64,
    forwarded: AtomicU64,
    upstream_errors: AtomicU64,
    /// Requests waiting on backend response headers
    in_flight: AtomicU64,
    /// Forwarded responses per backend (`service:port`)
    per_target: DashMap<String, u64>,
}

/// Point-in-time copy of [`GatewayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub redirected: u64,
    pub denied: u64,
    pub not_found: u64,
    pub forwarded: u64,
    pub upstream_errors: u64,
    pub in_flight: u64,
    pub per_target: BTreeMap<String, u64>,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redirect(&self) {
        self.redirected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the routing/dispatch outcome of an authorized request
    pub fn record(&self, result: &ProxyResult, target: Option<&str>) {
        match result {
            ProxyResult::Forwarded(_) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                if let Some(target) = target {
                    *self.per_target.entry(target.to_string()).or_insert(0) += 1;
                }
            }
            ProxyResult::NotFound => {
                self.not_found.fetch_add(1, Ordering::Relaxed);
            }
            ProxyResult::UpstreamError(_) => {
                self.upstream_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count a request as in flight until the returned guard is dropped
    pub fn track_in_flight(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard(&self.in_flight)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            per_target: self
                .per_target
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

/// Decrements the in-flight gauge on drop, including when the request future
/// is cancelled
pub struct InFlightGuard<'a>(&'a AtomicU64);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use std::sync::Arc;

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(GatewayStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_record_outcomes() {
        let stats = GatewayStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_redirect();
        stats.record_denied();
        stats.record(&ProxyResult::Forwarded(StatusCode::OK), Some("web:80"));
        stats.record(&ProxyResult::Forwarded(StatusCode::NOT_FOUND), Some("web:80"));
        stats.record(&ProxyResult::NotFound, None);
        stats.record(&ProxyResult::UpstreamError("refused".to_string()), Some("db:5432"));

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.redirected, 1);
        assert_eq!(snap.denied, 1);
        assert_eq!(snap.forwarded, 2);
        assert_eq!(snap.not_found, 1);
        assert_eq!(snap.upstream_errors, 1);
        assert_eq!(snap.per_target.get("web:80"), Some(&2));
        assert_eq!(snap.per_target.get("db:5432"), None);
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(GatewayStats::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    let target = format!("svc-{}:80", i % 2);
                    for _ in 0..1000 {
                        stats.record(&ProxyResult::Forwarded(StatusCode::OK), Some(&target));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.forwarded, 8000);
        assert_eq!(snap.per_target.get("svc-0:80"), Some(&4000));
        assert_eq!(snap.per_target.get("svc-1:80"), Some(&4000));
    }

    #[test]
    fn test_in_flight_gauge() {
        let stats = GatewayStats::new();
        {
            let _a = stats.track_in_flight();
            let _b = stats.track_in_flight();
            assert_eq!(stats.snapshot().in_flight, 2);
        }
        assert_eq!(stats.snapshot().in_flight, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = GatewayStats::new();
        stats.record(&ProxyResult::Forwarded(StatusCode::OK), Some("web:80"));
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"forwarded\":1"));
        assert!(json.contains("\"web:80\":1"));
    }
}
