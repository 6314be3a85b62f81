// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::routing::get;
use axum::Router;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

const CHAIN_CALL_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 8.0, 12.0, 20.0, 30.0, 60.0, 120.0,
];

#[derive(Clone, Debug)]
pub struct ResolutionMetrics {
    pub(crate) transitions: IntCounterVec,
    pub(crate) invalid_transitions: IntCounterVec,
    pub(crate) state_divergence_alarms: IntCounter,

    pub(crate) jobs_enqueued: IntCounterVec,
    pub(crate) jobs_completed: IntCounterVec,
    pub(crate) jobs_retried: IntCounterVec,
    pub(crate) jobs_failed: IntCounterVec,
    pub(crate) liveness_jobs_cancelled: IntCounter,

    pub(crate) chain_tx_submitted: IntCounterVec,
    pub(crate) chain_tx_failed: IntCounterVec,
    pub(crate) chain_call_latency: HistogramVec,

    pub(crate) last_indexed_block: IntGauge,
    pub(crate) indexer_events: IntCounterVec,
    pub(crate) indexer_tick_failures: IntCounter,

    pub(crate) peer_http_errors: IntCounterVec,
}

impl ResolutionMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            transitions: register_int_counter_vec_with_registry!(
                "resolution_transitions_total",
                "State transitions applied, by from/to state",
                &["from", "to"],
                registry,
            )
            .unwrap(),
            invalid_transitions: register_int_counter_vec_with_registry!(
                "resolution_invalid_transitions_total",
                "Transition requests rejected by the transition table",
                &["from", "to"],
                registry,
            )
            .unwrap(),
            state_divergence_alarms: register_int_counter_with_registry!(
                "resolution_state_divergence_alarms_total",
                "Chain-observed state could not be reconciled with the event record",
                registry,
            )
            .unwrap(),
            jobs_enqueued: register_int_counter_vec_with_registry!(
                "resolution_jobs_enqueued_total",
                "Jobs enqueued, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_completed: register_int_counter_vec_with_registry!(
                "resolution_jobs_completed_total",
                "Jobs completed successfully, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_retried: register_int_counter_vec_with_registry!(
                "resolution_jobs_retried_total",
                "Job attempts re-delayed after a retryable failure, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_failed: register_int_counter_vec_with_registry!(
                "resolution_jobs_failed_total",
                "Jobs that exhausted their attempts or hit a non-retryable error, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            liveness_jobs_cancelled: register_int_counter_with_registry!(
                "resolution_liveness_jobs_cancelled_total",
                "Liveness jobs removed by dispute handling",
                registry,
            )
            .unwrap(),
            chain_tx_submitted: register_int_counter_vec_with_registry!(
                "resolution_chain_tx_submitted_total",
                "Transactions submitted and confirmed, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            chain_tx_failed: register_int_counter_vec_with_registry!(
                "resolution_chain_tx_failed_total",
                "Transaction submissions that failed, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            chain_call_latency: register_histogram_vec_with_registry!(
                "resolution_chain_call_latency_seconds",
                "Latency of chain adapter calls, by method",
                &["method"],
                CHAIN_CALL_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            last_indexed_block: register_int_gauge_with_registry!(
                "resolution_last_indexed_block",
                "Highest block the indexer has fully processed",
                registry,
            )
            .unwrap(),
            indexer_events: register_int_counter_vec_with_registry!(
                "resolution_indexer_events_total",
                "Contract events extracted by the indexer, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            indexer_tick_failures: register_int_counter_with_registry!(
                "resolution_indexer_tick_failures_total",
                "Indexer ticks that failed and left the cursor unadvanced",
                registry,
            )
            .unwrap(),
            peer_http_errors: register_int_counter_vec_with_registry!(
                "resolution_peer_http_errors_total",
                "HTTP peer call failures, by peer",
                &["peer"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}

/// Serve `/metrics` and `/health` on the given address.
pub fn start_metrics_server(addr: SocketAddr, registry: Registry) -> JoinHandle<()> {
    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let encoder = TextEncoder::new();
                    encoder
                        .encode_to_string(&registry.gather())
                        .unwrap_or_else(|e| format!("# encode error: {}", e))
                }
            }),
        )
        .route("/health", get(|| async { "ok" }));

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("Failed to bind metrics server on {}: {}", addr, e);
                return;
            }
        };
        tracing::info!("Metrics server listening on {}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server exited with error: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_cleanly() {
        let registry = Registry::new();
        let metrics = ResolutionMetrics::new(&registry);
        metrics
            .transitions
            .with_label_values(&["LIVENESS", "RESOLVED"])
            .inc();
        metrics.last_indexed_block.set(1234);

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "resolution_transitions_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "resolution_last_indexed_block"));
    }
}
