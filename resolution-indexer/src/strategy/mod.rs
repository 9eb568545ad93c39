// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain specific fetching and event processing.
//!
//! A strategy is selected once per configured chain. It turns a block range into an ordered
//! list of [RegistryEvent]s and applies those events to the domain tables through the
//! transaction handle it is given.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::{ChainError, EthersEvmClient, ViewBlockZilClient};
use crate::config::ChainConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::repository::WorkerTransaction;
use crate::types::{Block, Blockchain, ProcessSummary, RegistryEvent, SyncRange, NULL_ADDRESS};

pub mod evm;
pub mod zil;

pub use evm::EvmStrategy;
pub use zil::ZilStrategy;

pub enum ChainStrategy {
    Evm(EvmStrategy),
    Zil(ZilStrategy),
}

impl ChainStrategy {
    /// Builds the strategy of `config` with its production chain client.
    pub fn from_config(config: &ChainConfig) -> IndexerResult<Self> {
        if config.blockchain.is_evm() {
            let contracts: Vec<String> =
                config.contracts.iter().map(|c| c.address.clone()).collect();
            let client = EthersEvmClient::new(&config.rpc_url, &contracts)?;
            Ok(ChainStrategy::Evm(EvmStrategy::new(
                config.clone(),
                Arc::new(client),
            )))
        } else {
            let registry = config.registry_address().ok_or_else(|| {
                IndexerError::Config(format!("[{}] missing zns_registry", config.blockchain))
            })?;
            let api_url = config.transaction_api_url.clone().ok_or_else(|| {
                IndexerError::Config(format!("[{}] missing transaction_api_url", config.blockchain))
            })?;
            let client = ViewBlockZilClient::new(
                config.rpc_url.clone(),
                api_url,
                config.transaction_api_key.clone(),
                config.transaction_api_network.clone(),
                registry,
            )?;
            Ok(ChainStrategy::Zil(ZilStrategy::new(
                config.clone(),
                Arc::new(client),
            )))
        }
    }

    pub fn config(&self) -> &ChainConfig {
        match self {
            ChainStrategy::Evm(s) => s.config(),
            ChainStrategy::Zil(s) => s.config(),
        }
    }

    pub fn blockchain(&self) -> Blockchain {
        self.config().blockchain
    }

    pub fn network_id(&self) -> i32 {
        self.config().network_id
    }

    /// Only EVM chains reorganize. The Zilliqa log is final.
    pub fn supports_reorgs(&self) -> bool {
        matches!(self, ChainStrategy::Evm(_))
    }

    /// Network head minus the confirmation margin.
    pub async fn get_latest_network_block(&self) -> IndexerResult<Block> {
        match self {
            ChainStrategy::Evm(s) => s.get_latest_network_block().await,
            ChainStrategy::Zil(s) => s.get_latest_network_block().await,
        }
    }

    pub async fn get_block(&self, number: u64) -> IndexerResult<Block> {
        match self {
            ChainStrategy::Evm(s) => s.get_block(number).await,
            ChainStrategy::Zil(_) => Ok(Block::without_hash(number)),
        }
    }

    /// Events of `range`, sorted by position.
    pub async fn get_events(&self, range: &SyncRange) -> IndexerResult<Vec<RegistryEvent>> {
        let mut events = match self {
            ChainStrategy::Evm(s) => s.get_events(range).await?,
            ChainStrategy::Zil(s) => s.get_events(range).await?,
        };
        sort_events(&mut events)?;
        Ok(events)
    }

    /// Applies `events` in order. Events that fail with a recoverable error are logged and
    /// skipped, anything else aborts the batch.
    pub async fn process_events(
        &self,
        tx: &mut dyn WorkerTransaction,
        events: &[RegistryEvent],
    ) -> IndexerResult<ProcessSummary> {
        let chain = self.blockchain();
        let mut summary = ProcessSummary::default();
        for index in 0..events.len() {
            let result = match self {
                ChainStrategy::Evm(s) => s.process_event(tx, events, index).await,
                ChainStrategy::Zil(s) => s.process_event(tx, &events[index]).await,
            };
            match result {
                Ok(()) => summary.processed += 1,
                Err(e) if e.is_recoverable() => {
                    let event = &events[index];
                    warn!(
                        "[{}] Skipping {} event at block {}: {}. Event: {:?}",
                        chain, event.event_type, event.block_number, e, event
                    );
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            "[{}] Processed {} events, skipped {}",
            chain, summary.processed, summary.skipped
        );
        Ok(summary)
    }
}

/// Sorts by `(atxuid, block, log index)`. Two events at the same position are a corrupt
/// response.
pub(crate) fn sort_events(events: &mut [RegistryEvent]) -> IndexerResult<()> {
    events.sort_by_key(|e| e.position());
    if let Some(pair) = events.windows(2).find(|w| w[0].position() == w[1].position()) {
        return Err(IndexerError::InvariantViolation(format!(
            "Duplicate log index {:?} in block {}",
            pair[1].log_index, pair[1].block_number
        )));
    }
    Ok(())
}

pub(crate) fn is_null_address(address: &str) -> bool {
    address.eq_ignore_ascii_case(NULL_ADDRESS)
}

pub(crate) fn node_of(event: &RegistryEvent) -> IndexerResult<&str> {
    event.node.as_deref().ok_or_else(|| {
        IndexerError::EventProcessing(format!("{} event has no node", event.event_type))
    })
}

pub(crate) fn arg<'a>(event: &'a RegistryEvent, key: &str) -> IndexerResult<&'a str> {
    event.value(key).ok_or_else(|| {
        IndexerError::EventProcessing(format!("{} event has no {key}", event.event_type))
    })
}

/// A contract read that still fails after retrying only invalidates the event that needed it.
pub(crate) fn read_failed(event: &RegistryEvent, e: ChainError) -> IndexerError {
    IndexerError::EventProcessing(format!(
        "{} event at block {} needs a contract read that failed: {e}",
        event.event_type, event.block_number
    ))
}

pub(crate) async fn require_domain(
    tx: &mut dyn WorkerTransaction,
    node: &str,
) -> IndexerResult<()> {
    match tx.find_domain(node).await? {
        Some(_) => Ok(()),
        None => Err(IndexerError::EventProcessing(format!(
            "Domain {node} does not exist"
        ))),
    }
}
