// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, Encoder, HistogramVec, IntCounterVec, IntGaugeVec,
    Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ITERATION_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10., 20., 30., 60., 120., 300.,
];

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    pub(crate) last_mirrored_block: IntGaugeVec,
    pub(crate) latest_network_block: IntGaugeVec,
    pub(crate) processed_events: IntCounterVec,
    pub(crate) skipped_events: IntCounterVec,
    pub(crate) reorgs: IntCounterVec,
    pub(crate) rebuilt_domains: IntCounterVec,
    pub(crate) iterations: IntCounterVec,
    pub(crate) errors: IntCounterVec,
    pub(crate) iteration_latency: HistogramVec,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            last_mirrored_block: register_int_gauge_vec_with_registry!(
                "resolution_last_mirrored_block",
                "Last block committed by the chain worker",
                &["chain"],
                registry,
            )
            .unwrap(),
            latest_network_block: register_int_gauge_vec_with_registry!(
                "resolution_latest_network_block",
                "Latest confirmed network block seen by the chain worker",
                &["chain"],
                registry,
            )
            .unwrap(),
            processed_events: register_int_counter_vec_with_registry!(
                "resolution_processed_events",
                "Registry events applied to the domain tables",
                &["chain"],
                registry,
            )
            .unwrap(),
            skipped_events: register_int_counter_vec_with_registry!(
                "resolution_skipped_events",
                "Registry events rejected and skipped",
                &["chain"],
                registry,
            )
            .unwrap(),
            reorgs: register_int_counter_vec_with_registry!(
                "resolution_reorgs",
                "Chain reorganizations repaired",
                &["chain"],
                registry,
            )
            .unwrap(),
            rebuilt_domains: register_int_counter_vec_with_registry!(
                "resolution_rebuilt_domains",
                "Domains rebuilt from the event log after a reorg or resync",
                &["chain"],
                registry,
            )
            .unwrap(),
            iterations: register_int_counter_vec_with_registry!(
                "resolution_worker_iterations",
                "Worker iterations by outcome",
                &["chain", "outcome"],
                registry,
            )
            .unwrap(),
            errors: register_int_counter_vec_with_registry!(
                "resolution_worker_errors",
                "Failed worker iterations by error type",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
            iteration_latency: register_histogram_vec_with_registry!(
                "resolution_worker_iteration_latency",
                "Latency of one worker iteration in seconds",
                &["chain"],
                ITERATION_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
        })
    }

    pub fn new_for_testing() -> Arc<Self> {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

/// Serves the registry on `/metrics` until `cancel` fires.
pub async fn start_metrics_server(
    address: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!("Metrics server listening on {}", address);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            tracing::error!("Metrics server error: {:?}", e);
        }
    }))
}

async fn metrics_handler(State(registry): State<Registry>) -> (StatusCode, String) {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            String::from_utf8_lossy(&buffer).into_owned(),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
