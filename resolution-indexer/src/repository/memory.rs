// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory [WorkerStore] with the same semantics as the postgres store.
//!
//! A transaction takes the global state lock for its whole lifetime and keeps a copy of
//! the state to restore on rollback. Worker status rows are locked with `try_lock`, so a
//! second transaction on the same chain fails fast like `FOR UPDATE NOWAIT`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    group_zns_events, location, reverse_addresses, validate_domain, validate_evm_events,
    LogPosition, WorkerStore, WorkerTransaction,
};
use crate::error::{IndexerError, IndexerResult};
use crate::types::{
    Block, Blockchain, CleanupResult, Domain, EventType, RegistryEvent, Resolution,
    ResolutionUpdate, ReverseResolution, WorkerStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZnsTransaction {
    pub atxuid: u64,
    pub hash: String,
    pub block_number: u64,
    pub events: Vec<RegistryEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    pub domains: BTreeMap<String, Domain>,
    pub resolutions: BTreeMap<(String, Blockchain, i32), Resolution>,
    pub reverse_resolutions: BTreeMap<(Blockchain, i32, String), String>,
    pub events: Vec<RegistryEvent>,
    pub zns_transactions: Vec<ZnsTransaction>,
    pub worker_status: BTreeMap<String, WorkerStatus>,
}

impl MemoryState {
    /// Resolutions of one chain keyed by node.
    pub fn chain_resolutions(
        &self,
        blockchain: Blockchain,
        network_id: i32,
    ) -> BTreeMap<String, Resolution> {
        self.resolutions
            .iter()
            .filter(|((_, chain, network), _)| *chain == blockchain && *network == network_id)
            .map(|((node, _, _), resolution)| (node.clone(), resolution.clone()))
            .collect()
    }

    pub fn resolution(
        &self,
        node: &str,
        blockchain: Blockchain,
        network_id: i32,
    ) -> Option<&Resolution> {
        self.resolutions
            .get(&(node.to_string(), blockchain, network_id))
    }

    fn chain_events(
        &self,
        blockchain: Blockchain,
        network_id: i32,
    ) -> impl Iterator<Item = &RegistryEvent> {
        self.events
            .iter()
            .filter(move |e| e.blockchain == blockchain && e.network_id == network_id)
    }
}

type WorkerLocks = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

#[derive(Clone, Default)]
pub struct InMemoryWorkerStore {
    state: Arc<Mutex<MemoryState>>,
    worker_locks: WorkerLocks,
}

impl InMemoryWorkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state. Waits for the running transaction, if any.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl WorkerStore for InMemoryWorkerStore {
    async fn begin(
        &self,
        blockchain: Blockchain,
        network_id: i32,
    ) -> IndexerResult<Box<dyn WorkerTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            blockchain,
            network_id,
            state: self.state.clone(),
            worker_locks: self.worker_locks.clone(),
            worker_guard: None,
            guard: None,
            backup: None,
            finished: false,
        }))
    }
}

pub struct InMemoryTransaction {
    blockchain: Blockchain,
    network_id: i32,
    state: Arc<Mutex<MemoryState>>,
    worker_locks: WorkerLocks,
    worker_guard: Option<OwnedMutexGuard<()>>,
    guard: Option<OwnedMutexGuard<MemoryState>>,
    backup: Option<MemoryState>,
    finished: bool,
}

impl InMemoryTransaction {
    async fn state(&mut self) -> IndexerResult<&mut MemoryState> {
        if self.finished {
            return Err(IndexerError::Storage("Transaction already finished".into()));
        }
        if self.guard.is_none() {
            let guard = self.state.clone().lock_owned().await;
            self.backup = Some(guard.clone());
            self.guard = Some(guard);
        }
        self.guard
            .as_deref_mut()
            .ok_or_else(|| IndexerError::Storage("Transaction state is not available".into()))
    }

    fn release(&mut self) {
        self.backup = None;
        self.guard = None;
        self.worker_guard = None;
        self.finished = true;
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        // An abandoned transaction behaves like a rollback.
        if let (Some(guard), Some(backup)) = (self.guard.as_mut(), self.backup.take()) {
            **guard = backup;
        }
    }
}

#[async_trait]
impl WorkerTransaction for InMemoryTransaction {
    fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    fn network_id(&self) -> i32 {
        self.network_id
    }

    async fn lock_worker_status(&mut self) -> IndexerResult<WorkerStatus> {
        let location = location(self.blockchain);
        if self.worker_guard.is_none() {
            let lock = {
                let mut locks = self
                    .worker_locks
                    .lock()
                    .map_err(|e| IndexerError::Storage(e.to_string()))?;
                locks.entry(location.clone()).or_default().clone()
            };
            let guard = lock
                .try_lock_owned()
                .map_err(|_| IndexerError::WorkerLocked(location.clone()))?;
            self.worker_guard = Some(guard);
        }
        let state = self.state().await?;
        Ok(state
            .worker_status
            .entry(location.clone())
            .or_insert_with(|| WorkerStatus::new(location))
            .clone())
    }

    async fn save_last_mirrored_block(
        &mut self,
        number: u64,
        hash: Option<&str>,
        atxuid: Option<u64>,
    ) -> IndexerResult<()> {
        let location = location(self.blockchain);
        let state = self.state().await?;
        let status = state
            .worker_status
            .entry(location.clone())
            .or_insert_with(|| WorkerStatus::new(location));
        status.last_mirrored_block_number = number;
        status.last_mirrored_block_hash = hash.map(str::to_string);
        status.last_atxuid = atxuid;
        Ok(())
    }

    async fn save_resync_block(&mut self, block: u64) -> IndexerResult<()> {
        let location = location(self.blockchain);
        let state = self.state().await?;
        state
            .worker_status
            .entry(location.clone())
            .or_insert_with(|| WorkerStatus::new(location))
            .last_resync_block = Some(block);
        Ok(())
    }

    async fn find_domain(&mut self, node: &str) -> IndexerResult<Option<Domain>> {
        let state = self.state().await?;
        Ok(state.domains.get(node).cloned())
    }

    async fn save_domains(&mut self, domains: &[Domain]) -> IndexerResult<usize> {
        let state = self.state().await?;
        let mut changed = 0;
        for domain in domains {
            validate_domain(domain)?;
            let existing = state.domains.get(&domain.node);
            let name = domain
                .name
                .clone()
                .or_else(|| existing.and_then(|d| d.name.clone()));
            let mut updated = Domain {
                node: domain.node.clone(),
                name,
                parent_node: None,
            };
            updated.parent_node = updated.parent_name().and_then(|parent| {
                state
                    .domains
                    .values()
                    .find(|d| d.name.as_deref() == Some(parent))
                    .map(|d| d.node.clone())
            });
            if existing == Some(&updated) {
                continue;
            }
            state.domains.insert(updated.node.clone(), updated);
            changed += 1;
        }
        Ok(changed)
    }

    async fn find_resolution(&mut self, node: &str) -> IndexerResult<Option<Resolution>> {
        let key = (node.to_string(), self.blockchain, self.network_id);
        let state = self.state().await?;
        Ok(state.resolutions.get(&key).cloned())
    }

    async fn save_resolutions(&mut self, updates: &[ResolutionUpdate]) -> IndexerResult<usize> {
        let (blockchain, network_id) = (self.blockchain, self.network_id);
        let state = self.state().await?;
        let mut changed = 0;
        for update in updates {
            if !state.domains.contains_key(&update.node) {
                continue;
            }
            let key = (update.node.clone(), blockchain, network_id);
            let existing = state.resolutions.get(&key).cloned();
            let is_new = existing.is_none();
            let mut resolution = existing
                .unwrap_or_else(|| Resolution::empty(update.node.clone(), blockchain, network_id));
            if resolution.apply(update) || is_new {
                state.resolutions.insert(key, resolution);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_reverse_resolution(&mut self, address: &str) -> IndexerResult<Option<String>> {
        let key = (self.blockchain, self.network_id, address.to_lowercase());
        let state = self.state().await?;
        Ok(state.reverse_resolutions.get(&key).cloned())
    }

    async fn save_reverse_resolutions(
        &mut self,
        reverses: &[ReverseResolution],
    ) -> IndexerResult<()> {
        let state = self.state().await?;
        for reverse in reverses {
            if !state.domains.contains_key(&reverse.node) {
                continue;
            }
            state.reverse_resolutions.retain(|(chain, network, _), node| {
                !(*chain == reverse.blockchain
                    && *network == reverse.network_id
                    && *node == reverse.node)
            });
            state.reverse_resolutions.insert(
                (
                    reverse.blockchain,
                    reverse.network_id,
                    reverse.reverse_address.to_lowercase(),
                ),
                reverse.node.clone(),
            );
        }
        Ok(())
    }

    async fn remove_reverse_resolutions(&mut self, addresses: &[String]) -> IndexerResult<usize> {
        let (blockchain, network_id) = (self.blockchain, self.network_id);
        let state = self.state().await?;
        Ok(addresses
            .iter()
            .filter_map(|address| {
                state
                    .reverse_resolutions
                    .remove(&(blockchain, network_id, address.to_lowercase()))
            })
            .count())
    }

    async fn save_events(&mut self, events: &[RegistryEvent]) -> IndexerResult<()> {
        let (blockchain, network_id) = (self.blockchain, self.network_id);
        let state = self.state().await?;

        if blockchain.is_evm() {
            let last = state
                .chain_events(blockchain, network_id)
                .last()
                .and_then(|e| {
                    e.log_index.map(|log_index| LogPosition {
                        block_number: e.block_number,
                        log_index,
                    })
                });
            validate_evm_events(last, events)?;
            for event in events {
                let Some(hash) = event.transaction_hash.as_deref() else {
                    continue;
                };
                if let Some(stored) = state
                    .chain_events(blockchain, network_id)
                    .find(|e| {
                        e.transaction_hash.as_deref() == Some(hash)
                            && e.block_number != event.block_number
                    })
                {
                    return Err(IndexerError::InvariantViolation(format!(
                        "Transaction {hash} already stored at block {}, got block {}",
                        stored.block_number, event.block_number
                    )));
                }
            }
            state.events.extend(events.iter().cloned());
        } else {
            let last = state.zns_transactions.last().map(|tx| tx.atxuid);
            let batches = group_zns_events(last, events)?;
            state
                .zns_transactions
                .extend(batches.into_iter().map(|batch| ZnsTransaction {
                    atxuid: batch.atxuid,
                    hash: batch.hash,
                    block_number: batch.block_number,
                    events: batch.events.into_iter().cloned().collect(),
                }));
        }
        Ok(())
    }

    async fn latest_event_blocks(&mut self, count: usize) -> IndexerResult<Vec<Block>> {
        let (blockchain, network_id) = (self.blockchain, self.network_id);
        let state = self.state().await?;
        let all: Vec<Block> = if blockchain.is_evm() {
            state
                .chain_events(blockchain, network_id)
                .map(|e| Block {
                    number: e.block_number,
                    hash: e.block_hash.clone(),
                })
                .collect()
        } else {
            state
                .zns_transactions
                .iter()
                .map(|tx| Block::without_hash(tx.block_number))
                .collect()
        };

        let mut blocks: Vec<Block> = vec![];
        for block in all.into_iter().rev() {
            if blocks.last().map(|b| b.number) == Some(block.number) {
                continue;
            }
            if blocks.len() == count {
                break;
            }
            blocks.push(block);
        }
        blocks.reverse();
        Ok(blocks)
    }

    async fn clean_up_events(&mut self, after_block: u64) -> IndexerResult<CleanupResult> {
        let (blockchain, network_id) = (self.blockchain, self.network_id);
        let state = self.state().await?;
        let mut result = CleanupResult::default();

        if blockchain.is_evm() {
            let (removed, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.events).into_iter().partition(|e| {
                    e.blockchain == blockchain
                        && e.network_id == network_id
                        && e.block_number > after_block
                });
            state.events = kept;
            result.deleted = removed.len();

            for event in &removed {
                if let Some(node) = &event.node {
                    result.affected_nodes.insert(node.clone());
                }
                // The domain that lost its reverse resolution to this event gets it back.
                if event.event_type == EventType::RemoveReverse {
                    let Some(address) = event.value("addr") else {
                        continue;
                    };
                    if let Some(node) = state
                        .chain_events(blockchain, network_id)
                        .filter(|e| {
                            e.event_type == EventType::SetReverse
                                && e.value("addr")
                                    .is_some_and(|a| a.eq_ignore_ascii_case(address))
                        })
                        .last()
                        .and_then(|e| e.node.clone())
                    {
                        result.affected_nodes.insert(node);
                    }
                }
            }
        } else {
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.zns_transactions)
                .into_iter()
                .partition(|tx| tx.block_number > after_block);
            state.zns_transactions = kept;
            for tx in &removed {
                result.deleted += tx.events.len();
                result
                    .affected_nodes
                    .extend(tx.events.iter().filter_map(|e| e.node.clone()));
            }
            result.remaining_atxuid = state.zns_transactions.last().map(|tx| tx.atxuid);
        }
        Ok(result)
    }

    async fn find_events_for_domain(&mut self, node: &str) -> IndexerResult<Vec<RegistryEvent>> {
        let (blockchain, network_id) = (self.blockchain, self.network_id);
        let state = self.state().await?;

        if !blockchain.is_evm() {
            return Ok(state
                .zns_transactions
                .iter()
                .flat_map(|tx| tx.events.iter())
                .filter(|e| e.node.as_deref() == Some(node))
                .cloned()
                .collect());
        }

        let own: Vec<RegistryEvent> = state
            .chain_events(blockchain, network_id)
            .filter(|e| e.node.as_deref() == Some(node))
            .cloned()
            .collect();
        let addresses = reverse_addresses(&own);
        if addresses.is_empty() {
            return Ok(own);
        }
        Ok(state
            .chain_events(blockchain, network_id)
            .filter(|e| {
                e.node.as_deref() == Some(node)
                    || (matches!(
                        e.event_type,
                        EventType::SetReverse | EventType::RemoveReverse
                    ) && e
                        .value("addr")
                        .is_some_and(|a| addresses.contains(&a.to_lowercase())))
            })
            .cloned()
            .collect())
    }

    async fn clear_domain_state(&mut self, node: &str) -> IndexerResult<()> {
        let (blockchain, network_id) = (self.blockchain, self.network_id);
        let state = self.state().await?;
        state
            .resolutions
            .remove(&(node.to_string(), blockchain, network_id));
        state.reverse_resolutions.retain(|(chain, network, _), owner| {
            !(*chain == blockchain && *network == network_id && owner == node)
        });
        Ok(())
    }

    async fn delete_domain_if_orphaned(&mut self, node: &str) -> IndexerResult<bool> {
        let state = self.state().await?;
        let referenced = state.resolutions.keys().any(|(n, _, _)| n == node)
            || state.reverse_resolutions.values().any(|n| n == node);
        if referenced || state.domains.remove(node).is_none() {
            return Ok(false);
        }
        for domain in state.domains.values_mut() {
            if domain.parent_node.as_deref() == Some(node) {
                domain.parent_node = None;
            }
        }
        Ok(true)
    }

    async fn commit(&mut self) -> IndexerResult<()> {
        self.state().await?;
        self.release();
        Ok(())
    }

    async fn rollback(&mut self) -> IndexerResult<()> {
        if let (Some(guard), Some(backup)) = (self.guard.as_mut(), self.backup.take()) {
            **guard = backup;
        }
        self.release();
        Ok(())
    }
}
