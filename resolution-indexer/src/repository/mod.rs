// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transactional persistence gateway of the chain workers.
//!
//! A worker opens one [WorkerTransaction] per iteration through [WorkerStore::begin] and
//! passes it explicitly to every call that reads or mutates state. Nothing is visible to
//! other workers before [WorkerTransaction::commit].

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{IndexerError, IndexerResult};
use crate::namehash::is_valid_node;
use crate::types::{
    Blockchain, Block, CleanupResult, Domain, RegistryEvent, Resolution, ResolutionUpdate,
    ReverseResolution, WorkerStatus,
};

pub mod memory;
pub mod pg;

pub use memory::InMemoryWorkerStore;
pub use pg::PgWorkerStore;

#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Opens a `REPEATABLE READ` transaction scoped to one chain.
    async fn begin(
        &self,
        blockchain: Blockchain,
        network_id: i32,
    ) -> IndexerResult<Box<dyn WorkerTransaction>>;
}

#[async_trait]
pub trait WorkerTransaction: Send {
    fn blockchain(&self) -> Blockchain;

    fn network_id(&self) -> i32;

    /// Creates the worker status row if needed and locks it without waiting. A lock held by
    /// another transaction fails with [IndexerError::WorkerLocked].
    async fn lock_worker_status(&mut self) -> IndexerResult<WorkerStatus>;

    async fn save_last_mirrored_block(
        &mut self,
        number: u64,
        hash: Option<&str>,
        atxuid: Option<u64>,
    ) -> IndexerResult<()>;

    async fn save_resync_block(&mut self, block: u64) -> IndexerResult<()>;

    async fn find_domain(&mut self, node: &str) -> IndexerResult<Option<Domain>>;

    /// Upserts domains by node. Returns the number of rows that changed.
    async fn save_domains(&mut self, domains: &[Domain]) -> IndexerResult<usize>;

    /// This chain's resolution of `node`.
    async fn find_resolution(&mut self, node: &str) -> IndexerResult<Option<Resolution>>;

    /// Merge-upserts resolutions. Updates of unknown domains are ignored.
    async fn save_resolutions(&mut self, updates: &[ResolutionUpdate]) -> IndexerResult<usize>;

    async fn find_reverse_resolution(&mut self, address: &str) -> IndexerResult<Option<String>>;

    async fn save_reverse_resolutions(
        &mut self,
        reverses: &[ReverseResolution],
    ) -> IndexerResult<()>;

    async fn remove_reverse_resolutions(&mut self, addresses: &[String]) -> IndexerResult<usize>;

    /// Appends to the chain's event log after checking the ordering invariants.
    async fn save_events(&mut self, events: &[RegistryEvent]) -> IndexerResult<()>;

    /// The most recent `count` distinct event blocks, oldest first.
    async fn latest_event_blocks(&mut self, count: usize) -> IndexerResult<Vec<Block>>;

    /// Deletes every event above `after_block`.
    async fn clean_up_events(&mut self, after_block: u64) -> IndexerResult<CleanupResult>;

    /// Ordered history of one domain plus the reverse events of the addresses it
    /// reverse-resolved.
    async fn find_events_for_domain(&mut self, node: &str) -> IndexerResult<Vec<RegistryEvent>>;

    /// Removes this chain's resolution and reverse resolutions of `node`.
    async fn clear_domain_state(&mut self, node: &str) -> IndexerResult<()>;

    /// Deletes the domain row when no chain holds a resolution or reverse resolution for it.
    async fn delete_domain_if_orphaned(&mut self, node: &str) -> IndexerResult<bool>;

    async fn commit(&mut self) -> IndexerResult<()>;

    async fn rollback(&mut self) -> IndexerResult<()>;
}

pub(crate) fn location(blockchain: Blockchain) -> String {
    blockchain.as_ref().to_string()
}

/// Position of the last stored EVM event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogPosition {
    pub block_number: u64,
    pub log_index: u32,
}

/// Checks the ordering invariants of a batch of EVM events against the tail of the log:
/// block numbers never decrease, log indexes strictly increase within a block and a
/// transaction hash never spans two blocks.
pub(crate) fn validate_evm_events(
    last_stored: Option<LogPosition>,
    events: &[RegistryEvent],
) -> IndexerResult<()> {
    let mut previous = last_stored;
    let mut tx_blocks: HashMap<&str, u64> = HashMap::new();
    for event in events {
        let log_index = event.log_index.ok_or_else(|| {
            IndexerError::InvariantViolation(format!(
                "{} event at block {} has no log index",
                event.event_type, event.block_number
            ))
        })?;
        if let Some(prev) = previous {
            if event.block_number < prev.block_number {
                return Err(IndexerError::InvariantViolation(format!(
                    "Event block {} is below the last stored block {}",
                    event.block_number, prev.block_number
                )));
            }
            if event.block_number == prev.block_number && log_index <= prev.log_index {
                return Err(IndexerError::InvariantViolation(format!(
                    "Duplicate or unordered log index {} in block {} (previous {})",
                    log_index, event.block_number, prev.log_index
                )));
            }
        }
        if let Some(hash) = event.transaction_hash.as_deref() {
            if let Some(block) = tx_blocks.insert(hash, event.block_number) {
                if block != event.block_number {
                    return Err(IndexerError::InvariantViolation(format!(
                        "Transaction {hash} appears in blocks {block} and {}",
                        event.block_number
                    )));
                }
            }
        }
        previous = Some(LogPosition {
            block_number: event.block_number,
            log_index,
        });
    }
    Ok(())
}

/// A batch of Zilliqa events grouped by transaction.
pub(crate) struct ZnsTransactionBatch<'a> {
    pub atxuid: u64,
    pub hash: String,
    pub block_number: u64,
    pub events: Vec<&'a RegistryEvent>,
}

/// Groups Zilliqa events by transaction, checking that atxuids strictly increase across
/// transactions and past `last_atxuid`.
pub(crate) fn group_zns_events(
    last_atxuid: Option<u64>,
    events: &[RegistryEvent],
) -> IndexerResult<Vec<ZnsTransactionBatch<'_>>> {
    let mut batches: Vec<ZnsTransactionBatch<'_>> = vec![];
    for event in events {
        let atxuid = event.atxuid.ok_or_else(|| {
            IndexerError::InvariantViolation(format!(
                "Zilliqa event {} at block {} has no atxuid",
                event.event_type, event.block_number
            ))
        })?;
        if let Some(current) = batches.last_mut() {
            if current.atxuid == atxuid {
                current.events.push(event);
                continue;
            }
            if atxuid < current.atxuid {
                return Err(IndexerError::InvariantViolation(format!(
                    "atxuid {atxuid} follows {}",
                    current.atxuid
                )));
            }
        } else if let Some(last) = last_atxuid {
            if atxuid <= last {
                return Err(IndexerError::InvariantViolation(format!(
                    "atxuid {atxuid} is not above the last stored atxuid {last}"
                )));
            }
        }
        batches.push(ZnsTransactionBatch {
            atxuid,
            hash: event.transaction_hash.clone().unwrap_or_default(),
            block_number: event.block_number,
            events: vec![event],
        });
    }
    Ok(batches)
}

/// Rejects named domains whose node is not a hash of the name.
pub(crate) fn validate_domain(domain: &Domain) -> IndexerResult<()> {
    if let Some(name) = domain.name.as_deref() {
        if !is_valid_node(name, &domain.node) {
            return Err(IndexerError::InvariantViolation(format!(
                "Node {} is not a hash of {name}",
                domain.node
            )));
        }
    }
    Ok(())
}

/// Reverse addresses the domain set through `SetReverse` events.
pub(crate) fn reverse_addresses(events: &[RegistryEvent]) -> Vec<String> {
    let mut addresses: Vec<String> = events
        .iter()
        .filter(|e| e.event_type == crate::types::EventType::SetReverse)
        .filter_map(|e| e.value("addr").map(str::to_lowercase))
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use std::collections::BTreeMap;

    fn event(block: u64, log_index: u32, tx: &str) -> RegistryEvent {
        RegistryEvent {
            event_type: EventType::Set,
            blockchain: Blockchain::ETH,
            network_id: 1,
            block_number: block,
            block_hash: Some(format!("0x{block:x}")),
            log_index: Some(log_index),
            transaction_hash: Some(tx.to_string()),
            contract_address: "0x01".into(),
            node: None,
            return_values: BTreeMap::new(),
            atxuid: None,
        }
    }

    fn zil_event(atxuid: u64) -> RegistryEvent {
        RegistryEvent {
            blockchain: Blockchain::ZIL,
            atxuid: Some(atxuid),
            ..event(atxuid, 0, &format!("0xzil{atxuid}"))
        }
    }

    #[test]
    fn test_ordered_batch_is_accepted() {
        let events = vec![event(1, 0, "a"), event(1, 1, "a"), event(3, 0, "b")];
        validate_evm_events(None, &events).unwrap();
        validate_evm_events(
            Some(LogPosition {
                block_number: 1,
                log_index: 0,
            }),
            &events[1..],
        )
        .unwrap();
    }

    #[test]
    fn test_duplicate_log_index_is_fatal() {
        let events = vec![event(1, 2, "a"), event(1, 2, "a")];
        assert!(matches!(
            validate_evm_events(None, &events),
            Err(IndexerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_block_below_stored_tail_is_fatal() {
        let stored = LogPosition {
            block_number: 10,
            log_index: 0,
        };
        assert!(validate_evm_events(Some(stored), &[event(9, 5, "a")]).is_err());
        assert!(validate_evm_events(Some(stored), &[event(10, 0, "a")]).is_err());
        validate_evm_events(Some(stored), &[event(10, 1, "a")]).unwrap();
    }

    #[test]
    fn test_transaction_in_two_blocks_is_fatal() {
        let events = vec![event(1, 0, "a"), event(2, 0, "a")];
        assert!(validate_evm_events(None, &events).is_err());
    }

    #[test]
    fn test_zns_events_are_grouped_by_transaction() {
        let events = vec![zil_event(4), zil_event(4), zil_event(6)];
        let batches = group_zns_events(Some(3), &events).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].events.len(), 2);
        assert_eq!(batches[1].atxuid, 6);

        assert!(group_zns_events(Some(4), &events).is_err());
        assert!(group_zns_events(None, &[zil_event(5), zil_event(2)]).is_err());
    }

    #[test]
    fn test_domain_validation() {
        let node = crate::namehash::eip137_namehash("brad.crypto");
        validate_domain(&Domain::named(node.clone(), "brad.crypto")).unwrap();
        validate_domain(&Domain::placeholder(node.clone())).unwrap();
        assert!(validate_domain(&Domain::named(node, "other.crypto")).is_err());
    }
}
