// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reorg repair.
//!
//! The fork point is searched among the most recent distinct event blocks. Blocks that
//! still match the network form a prefix of that window, so a binary search finds the last
//! matching one in a logarithmic number of block lookups.

use std::future::Future;
use tracing::{info, warn};

use super::BaseWorker;
use crate::error::{IndexerError, IndexerResult};
use crate::repository::WorkerTransaction;
use crate::types::{Block, WorkerStatus};

/// Index of the last block of `blocks` that still matches the network, given that the first
/// block matches and the last one does not. Returns the index and the number of lookups.
pub async fn search_fork_point<F, Fut>(
    blocks: &[Block],
    mut matches: F,
) -> IndexerResult<(usize, usize)>
where
    F: FnMut(Block) -> Fut,
    Fut: Future<Output = IndexerResult<bool>>,
{
    let (mut low, mut high) = (0, blocks.len().saturating_sub(1));
    let mut lookups = 0;
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        lookups += 1;
        if matches(blocks[mid].clone()).await? {
            low = mid;
        } else {
            high = mid;
        }
    }
    Ok((low, lookups))
}

impl BaseWorker {
    async fn block_matches(&self, block: Block) -> IndexerResult<bool> {
        let Some(stored) = block.hash else {
            return Ok(true);
        };
        let network = self.strategy.get_block(block.number).await?;
        Ok(network.hash.as_deref() == Some(stored.as_str()))
    }

    /// Rewinds the cursor to the fork block, deletes the events above it and rebuilds the
    /// domains they touched. Returns the fork block and the number of rebuilt domains.
    pub(super) async fn handle_reorg(
        &self,
        tx: &mut dyn WorkerTransaction,
        status: &WorkerStatus,
    ) -> IndexerResult<(u64, usize)> {
        let chain = self.chain_label();
        let max_reorg_size = self.config().max_reorg_size;
        warn!(
            "[{}] Reorg detected at mirrored block {}",
            chain, status.last_mirrored_block_number
        );

        let blocks = tx.latest_event_blocks(max_reorg_size as usize).await?;
        let fork = match (blocks.first(), blocks.last()) {
            (Some(oldest), Some(newest)) => {
                if !self.block_matches(oldest.clone()).await? {
                    return Err(IndexerError::ReorgTooDeep {
                        block: oldest.number,
                        max_reorg_size,
                    });
                }
                if self.block_matches(newest.clone()).await? {
                    newest.number
                } else {
                    let (index, lookups) =
                        search_fork_point(&blocks, |block| self.block_matches(block)).await?;
                    info!(
                        "[{}] Fork point found at block {} after {} lookups",
                        chain, blocks[index].number, lookups
                    );
                    blocks[index].number
                }
            }
            _ => status
                .last_mirrored_block_number
                .saturating_sub(max_reorg_size),
        };

        let cleanup = tx.clean_up_events(fork).await?;
        let hash = self.strategy.get_block(fork).await?.hash;
        tx.save_last_mirrored_block(fork, hash.as_deref(), None)
            .await?;
        let rebuilt = self.rebuild_all(tx, &cleanup.affected_nodes).await?;
        info!(
            "[{}] Rewound to block {}: deleted {} events, rebuilt {} domains",
            chain, fork, cleanup.deleted, rebuilt
        );
        if let Some(m) = &self.metrics {
            m.reorgs.with_label_values(&[chain]).inc();
        }
        Ok((fork, rebuilt))
    }
}
