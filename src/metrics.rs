//! # Bridge Metrics
//!
//! Lock-free counters updated from actors and pipeline tasks, plus per-route
//! HTTP statistics recorded by `middleware::metrics`. Exposed on the health
//! endpoints as a point-in-time snapshot.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::delivery::DeliveryOutcome;

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    rejected_joins: AtomicU64,
    utterances_flushed: AtomicU64,
    busy_drops: AtomicU64,
    pipeline_runs: AtomicU64,
    recognition_failures: AtomicU64,
    pipeline_failures: AtomicU64,
    pipeline_timeouts: AtomicU64,
    deliveries: AtomicU64,
    undelivered: AtomicU64,
    endpoints: RwLock<HashMap<String, EndpointMetric>>,
}

/// Request statistics for one route pattern (e.g. `GET /ws/call/{room_id}/{user_id}`).
#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub error_count: u64,
    pub total_duration_ms: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub rejected_joins: u64,
    pub utterances_flushed: u64,
    pub busy_drops: u64,
    pub pipeline_runs: u64,
    pub recognition_failures: u64,
    pub pipeline_failures: u64,
    pub pipeline_timeouts: u64,
    pub deliveries: u64,
    pub undelivered: u64,
    pub http_requests: u64,
    pub http_errors: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl BridgeMetrics {
    pub fn session_opened(&self) {
        bump(&self.sessions_opened);
    }

    pub fn session_closed(&self) {
        bump(&self.sessions_closed);
    }

    pub fn join_rejected(&self) {
        bump(&self.rejected_joins);
    }

    pub fn utterance_flushed(&self) {
        bump(&self.utterances_flushed);
    }

    pub fn busy_drop(&self) {
        bump(&self.busy_drops);
    }

    pub fn pipeline_started(&self) {
        bump(&self.pipeline_runs);
    }

    pub fn recognition_failed(&self) {
        bump(&self.recognition_failures);
    }

    pub fn pipeline_failed(&self) {
        bump(&self.pipeline_failures);
    }

    pub fn pipeline_timed_out(&self) {
        bump(&self.pipeline_timeouts);
    }

    pub fn record_delivery(&self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => bump(&self.deliveries),
            DeliveryOutcome::NothingToDeliver => {}
            DeliveryOutcome::NoPeer
            | DeliveryOutcome::LanguageMismatch
            | DeliveryOutcome::PeerGone => bump(&self.undelivered),
        }
    }

    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut endpoints = self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let metric = endpoints.entry(endpoint.to_string()).or_default();
        metric.request_count += 1;
        metric.total_duration_ms += duration_ms;
        if is_error {
            metric.error_count += 1;
        }
    }

    pub fn endpoints(&self) -> HashMap<String, EndpointMetric> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let (http_requests, http_errors) = self
            .endpoints()
            .values()
            .fold((0, 0), |(requests, errors), metric| {
                (requests + metric.request_count, errors + metric.error_count)
            });

        MetricsSnapshot {
            sessions_opened: load(&self.sessions_opened),
            sessions_closed: load(&self.sessions_closed),
            rejected_joins: load(&self.rejected_joins),
            utterances_flushed: load(&self.utterances_flushed),
            busy_drops: load(&self.busy_drops),
            pipeline_runs: load(&self.pipeline_runs),
            recognition_failures: load(&self.recognition_failures),
            pipeline_failures: load(&self.pipeline_failures),
            pipeline_timeouts: load(&self.pipeline_timeouts),
            deliveries: load(&self.deliveries),
            undelivered: load(&self.undelivered),
            http_requests,
            http_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_delivery_outcomes() {
        let metrics = BridgeMetrics::default();
        metrics.utterance_flushed();
        metrics.record_delivery(DeliveryOutcome::Delivered);
        metrics.record_delivery(DeliveryOutcome::NoPeer);
        metrics.record_delivery(DeliveryOutcome::NothingToDeliver);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.utterances_flushed, 1);
        assert_eq!(snapshot.deliveries, 1);
        assert_eq!(snapshot.undelivered, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let metrics = BridgeMetrics::default();
        metrics.record_request("GET /health", 10, false);
        metrics.record_request("GET /health", 30, true);

        let endpoint = metrics.endpoints()["GET /health"].clone();
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.error_count, 1);
        assert_eq!(endpoint.average_duration_ms(), 20.0);

        let snapshot = metrics.snapshot();
        assert_eq!((snapshot.http_requests, snapshot.http_errors), (2, 1));
    }
}
