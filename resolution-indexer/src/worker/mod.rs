// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain agnostic sync loop.
//!
//! One iteration locks the chain's worker status, repairs a reorg if the stored cursor is
//! no longer canonical, then mirrors `[cursor + 1, latest confirmed block]` in slices of at
//! most `block_fetch_limit` blocks. Everything happens inside one transaction that is
//! committed at the end or rolled back on the first error.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chain::ChainError;
use crate::config::ChainConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::metrics::IndexerMetrics;
use crate::repository::{WorkerStore, WorkerTransaction};
use crate::strategy::ChainStrategy;
use crate::types::{Blockchain, EventType, RegistryEvent, SyncRange, SyncSummary, WorkerStatus};

mod reorg;


pub use reorg::search_fork_point;

pub struct BaseWorker {
    strategy: ChainStrategy,
    store: Arc<dyn WorkerStore>,
    metrics: Option<Arc<IndexerMetrics>>,
}

impl BaseWorker {
    pub fn new(
        strategy: ChainStrategy,
        store: Arc<dyn WorkerStore>,
        metrics: Option<Arc<IndexerMetrics>>,
    ) -> Self {
        Self {
            strategy,
            store,
            metrics,
        }
    }

    pub fn blockchain(&self) -> Blockchain {
        self.strategy.blockchain()
    }

    pub fn config(&self) -> &ChainConfig {
        self.strategy.config()
    }

    fn chain_label(&self) -> &'static str {
        match self.blockchain() {
            Blockchain::ETH => "ETH",
            Blockchain::MATIC => "MATIC",
            Blockchain::ZIL => "ZIL",
        }
    }

    /// Runs one sync iteration.
    pub async fn run(&self) -> IndexerResult<SyncSummary> {
        let chain = self.chain_label();
        let _timer = self.metrics.as_ref().map(|m| {
            m.iteration_latency
                .with_label_values(&[chain])
                .start_timer()
        });

        let mut tx = self
            .store
            .begin(self.blockchain(), self.strategy.network_id())
            .await?;
        let result = self.sync(tx.as_mut()).await;
        let result = self.finish(tx, result).await;

        match &result {
            Ok(summary) => {
                if summary.slices > 0 || summary.rewound_to.is_some() {
                    info!(
                        "[{}] Mirrored blocks {}-{}: {} events, {} processed, {} skipped",
                        chain,
                        summary.from_block,
                        summary.to_block,
                        summary.events,
                        summary.processed.processed,
                        summary.processed.skipped
                    );
                }
                if let Some(m) = &self.metrics {
                    m.iterations.with_label_values(&[chain, "success"]).inc();
                    m.processed_events
                        .with_label_values(&[chain])
                        .inc_by(summary.processed.processed as u64);
                    m.skipped_events
                        .with_label_values(&[chain])
                        .inc_by(summary.processed.skipped as u64);
                }
            }
            Err(IndexerError::WorkerLocked(location)) => {
                info!("[{}] Worker status {} is locked, skipping", chain, location);
                if let Some(m) = &self.metrics {
                    m.iterations.with_label_values(&[chain, "locked"]).inc();
                }
            }
            Err(e) => {
                error!("[{}] Sync iteration failed and was rolled back: {}", chain, e);
                if let Some(m) = &self.metrics {
                    m.iterations.with_label_values(&[chain, "failure"]).inc();
                    m.errors
                        .with_label_values(&[chain, e.error_type()])
                        .inc();
                }
            }
        }
        result
    }

    /// Deletes the events above `target`, moves the cursor there and rebuilds the domains the
    /// deleted events touched.
    pub async fn resync(&self, target: u64) -> IndexerResult<SyncSummary> {
        let chain = self.chain_label();
        let mut tx = self
            .store
            .begin(self.blockchain(), self.strategy.network_id())
            .await?;
        let result = self.resync_in(tx.as_mut(), target).await;
        let result = self.finish(tx, result).await;
        match &result {
            Ok(summary) => info!(
                "[{}] Resynced to block {}, rebuilt {} domains",
                chain, target, summary.rebuilt_domains
            ),
            Err(e) => error!("[{}] Resync to block {} failed: {}", chain, target, e),
        }
        result
    }

    /// Applies a configured resync target unless this target was applied before. Returns
    /// `None` when there was nothing to do.
    pub async fn resync_once(&self, target: u64) -> IndexerResult<Option<SyncSummary>> {
        let mut tx = self
            .store
            .begin(self.blockchain(), self.strategy.network_id())
            .await?;
        let status = match tx.lock_worker_status().await {
            Ok(status) => status,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };
        if status.last_resync_block == Some(target) {
            tx.rollback().await?;
            debug!(
                "[{}] Resync to block {} was already applied",
                self.chain_label(),
                target
            );
            return Ok(None);
        }

        let result = match self.resync_in(tx.as_mut(), target).await {
            Ok(summary) => tx.save_resync_block(target).await.map(|_| summary),
            Err(e) => Err(e),
        };
        let summary = self.finish(tx, result).await?;
        info!(
            "[{}] Applied configured resync to block {}, rebuilt {} domains",
            self.chain_label(),
            target,
            summary.rebuilt_domains
        );
        Ok(Some(summary))
    }

    async fn finish(
        &self,
        mut tx: Box<dyn WorkerTransaction>,
        result: IndexerResult<SyncSummary>,
    ) -> IndexerResult<SyncSummary> {
        match result {
            Ok(summary) => {
                tx.commit().await?;
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(
                        "[{}] Rollback failed: {}",
                        self.chain_label(),
                        rollback_error
                    );
                }
                Err(e)
            }
        }
    }

    async fn sync(&self, tx: &mut dyn WorkerTransaction) -> IndexerResult<SyncSummary> {
        let chain = self.chain_label();
        let config = self.config();
        let status = tx.lock_worker_status().await?;
        let latest = self.strategy.get_latest_network_block().await?;
        if let Some(m) = &self.metrics {
            m.latest_network_block
                .with_label_values(&[chain])
                .set(latest.number as i64);
        }

        let mut summary = SyncSummary::default();
        let mut cursor = status.last_mirrored_block_number;
        let mut cursor_atxuid = status.last_atxuid;
        if cursor == 0 {
            cursor = config.starting_block.saturating_sub(1);
            info!("[{}] First run, starting from block {}", chain, cursor + 1);
        } else if self.strategy.supports_reorgs() && self.is_reorged(&status, latest.number).await?
        {
            let (fork, rebuilt) = self.handle_reorg(tx, &status).await?;
            cursor = fork;
            cursor_atxuid = None;
            summary.rewound_to = Some(fork);
            summary.rebuilt_domains = rebuilt;
        }

        summary.from_block = cursor + 1;
        summary.to_block = cursor;
        while cursor < latest.number {
            let range = SyncRange {
                from_block: cursor + 1,
                to_block: std::cmp::min(cursor + config.block_fetch_limit, latest.number),
                after_atxuid: cursor_atxuid,
            };
            // Read before the logs: a reorg in between leaves a stale hash that the next
            // iteration detects, never a fresh hash over stale logs.
            let hash = if self.strategy.supports_reorgs() {
                self.strategy.get_block(range.to_block).await?.hash
            } else {
                None
            };
            let events = self.strategy.get_events(&range).await.map_err(|e| {
                warn!(
                    "[{}] Failed to fetch events of blocks {}-{}: {}",
                    chain, range.from_block, range.to_block, e
                );
                e
            })?;
            check_slice_end(&range, hash.as_deref(), &events)?;
            tx.save_events(&events).await?;
            summary.processed += self.strategy.process_events(tx, &events).await?;
            summary.events += events.len();

            if let Some(atxuid) = events.iter().filter_map(|e| e.atxuid).max() {
                cursor_atxuid = Some(atxuid);
            }
            tx.save_last_mirrored_block(range.to_block, hash.as_deref(), cursor_atxuid)
                .await?;
            debug!(
                "[{}] Slice {}-{} mirrored with {} events",
                chain,
                range.from_block,
                range.to_block,
                events.len()
            );

            cursor = range.to_block;
            summary.to_block = cursor;
            summary.slices += 1;
            if let Some(m) = &self.metrics {
                m.last_mirrored_block
                    .with_label_values(&[chain])
                    .set(cursor as i64);
            }
        }
        Ok(summary)
    }

    // The stored cursor is no longer canonical when the head receded below it or the
    // network hash of the cursor block changed.
    async fn is_reorged(&self, status: &WorkerStatus, latest: u64) -> IndexerResult<bool> {
        let cursor = status.last_mirrored_block_number;
        if latest < cursor {
            warn!(
                "[{}] Network head {} is below the mirrored block {}",
                self.chain_label(),
                latest,
                cursor
            );
            return Ok(true);
        }
        let Some(stored) = status.last_mirrored_block_hash.as_deref() else {
            return Ok(false);
        };
        let network = self.strategy.get_block(cursor).await?;
        Ok(network.hash.as_deref() != Some(stored))
    }

    async fn resync_in(
        &self,
        tx: &mut dyn WorkerTransaction,
        target: u64,
    ) -> IndexerResult<SyncSummary> {
        tx.lock_worker_status().await?;
        let cleanup = tx.clean_up_events(target).await?;
        let hash = if self.strategy.supports_reorgs() {
            self.strategy.get_block(target).await?.hash
        } else {
            None
        };
        tx.save_last_mirrored_block(target, hash.as_deref(), cleanup.remaining_atxuid)
            .await?;
        let rebuilt = self.rebuild_all(tx, &cleanup.affected_nodes).await?;
        Ok(SyncSummary {
            from_block: target,
            to_block: target,
            rewound_to: Some(target),
            rebuilt_domains: rebuilt,
            ..Default::default()
        })
    }

    async fn rebuild_all(
        &self,
        tx: &mut dyn WorkerTransaction,
        nodes: &BTreeSet<String>,
    ) -> IndexerResult<usize> {
        for node in nodes {
            self.rebuild(tx, node).await?;
        }
        if let Some(m) = &self.metrics {
            m.rebuilt_domains
                .with_label_values(&[self.chain_label()])
                .inc_by(nodes.len() as u64);
        }
        Ok(nodes.len())
    }

    /// Recomputes this chain's state of `node` by replaying its remaining event history.
    pub(crate) async fn rebuild(
        &self,
        tx: &mut dyn WorkerTransaction,
        node: &str,
    ) -> IndexerResult<()> {
        tx.clear_domain_state(node).await?;
        let events = tx.find_events_for_domain(node).await?;
        if events.is_empty() {
            if tx.delete_domain_if_orphaned(node).await? {
                debug!("[{}] Removed orphaned domain {}", self.chain_label(), node);
            }
            return Ok(());
        }
        self.strategy
            .process_events(tx, &replayable_events(node, events))
            .await?;
        Ok(())
    }
}

/// Logs of the slice end block must come from the fork whose hash is stored with the cursor.
fn check_slice_end(
    range: &SyncRange,
    hash: Option<&str>,
    events: &[RegistryEvent],
) -> IndexerResult<()> {
    let Some(hash) = hash else {
        return Ok(());
    };
    match events.iter().find(|e| {
        e.block_number == range.to_block
            && e.block_hash.as_deref().is_some_and(|h| !h.eq_ignore_ascii_case(hash))
    }) {
        Some(event) => Err(ChainError::InvalidResponse(format!(
            "Log of block {} has hash {:?}, the block has {}",
            range.to_block, event.block_hash, hash
        ))
        .into()),
        None => Ok(()),
    }
}

/// The events of `node` in its history. Reverse events of other domains are not replayed,
/// they only drop this domain's earlier claims on the same address.
fn replayable_events(node: &str, history: Vec<RegistryEvent>) -> Vec<RegistryEvent> {
    let (own, foreign): (Vec<_>, Vec<_>) = history
        .into_iter()
        .partition(|e| e.node.as_deref() == Some(node));
    own.into_iter()
        .filter(|event| {
            let Some(address) = reverse_address(event) else {
                return true;
            };
            !foreign.iter().any(|other| {
                other.position() > event.position()
                    && reverse_address(other).is_some_and(|a| a.eq_ignore_ascii_case(address))
            })
        })
        .collect()
}

fn reverse_address(event: &RegistryEvent) -> Option<&str> {
    match event.event_type {
        EventType::SetReverse | EventType::RemoveReverse => event.value("addr"),
        _ => None,
    }
}
