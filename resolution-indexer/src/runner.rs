// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Schedules the chain workers.
//!
//! Every worker runs on its own task and interval. A failed iteration is logged and retried
//! on the next tick, so one chain going down never stalls the others.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::IndexerError;
use crate::worker::BaseWorker;

pub struct WorkerRunner {
    workers: Vec<Arc<BaseWorker>>,
    cancel: CancellationToken,
}

impl WorkerRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            workers: vec![],
            cancel,
        }
    }

    pub fn add_worker(&mut self, worker: BaseWorker) {
        self.workers.push(Arc::new(worker));
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Spawns one task per worker. The tasks stop when the cancellation token fires.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.workers
            .into_iter()
            .map(|worker| {
                let cancel = self.cancel.clone();
                tokio::spawn(run_worker(worker, cancel))
            })
            .collect()
    }
}

async fn run_worker(worker: Arc<BaseWorker>, cancel: CancellationToken) {
    let chain = worker.blockchain();
    let config = worker.config();
    info!(
        "[{}] Worker started: network {}, fetch interval {}ms",
        chain, config.network_id, config.fetch_interval_ms
    );

    if let Some(block) = config.resync_from {
        if let Err(e) = worker.resync_once(block).await {
            error!("[{}] Startup resync to block {} failed: {}", chain, block, e);
        }
    }

    let mut interval = tokio::time::interval(config.fetch_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[{}] Worker cancelled", chain);
                break;
            }
            _ = interval.tick() => {}
        }

        match worker.run().await {
            Ok(_) | Err(IndexerError::WorkerLocked(_)) => {}
            Err(IndexerError::ReorgTooDeep { block, max_reorg_size }) => {
                error!(
                    "[{}] Reorg at block {} exceeds max_reorg_size {}, manual resync required",
                    chain, block, max_reorg_size
                );
            }
            // Already logged by the worker.
            Err(_) => {}
        }
    }
}
