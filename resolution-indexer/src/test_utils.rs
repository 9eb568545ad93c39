// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mock chain clients and event builders shared by the unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::chain::{
    ChainError, ChainResult, DecodedEvent, EvmChainClient, ZilChainClient, ZilEvent,
    ZilTransaction,
};
use crate::config::{ChainConfig, ContractConfig, ContractKind};
use crate::namehash::{eip137_namehash, node_to_token_id};
use crate::types::{Block, Blockchain, EventType, Records, RegistryEvent, NULL_ADDRESS};

pub const OWNER: &str = "0x00000000000000000000000000000000000000a1";
pub const REGISTRY: &str = "0x049aba7510f45ba5b64ea9e658e342f904db358d";
pub const ZIL_REGISTRY: &str = "0x9611c53be6d1b32058b2747bdececed7e1216793";

pub fn evm_chain_config() -> ChainConfig {
    let mut config = ChainConfig::new(Blockchain::ETH, 1, "http://localhost:8545");
    config.contracts.push(ContractConfig {
        address: REGISTRY.to_string(),
        kind: ContractKind::UnsRegistry,
    });
    config.starting_block = 1;
    config.block_fetch_limit = 50;
    config.max_retry_duration_ms = 10;
    config
}

pub fn zil_chain_config() -> ChainConfig {
    let mut config = ChainConfig::new(Blockchain::ZIL, 1, "http://localhost:4201");
    config.contracts.push(ContractConfig {
        address: ZIL_REGISTRY.to_string(),
        kind: ContractKind::ZnsRegistry,
    });
    config.transaction_api_url = Some("http://localhost:8080".to_string());
    config.max_retry_duration_ms = 10;
    config
}

/// Hash of `number` on the `generation`-th fork of the mock chain.
pub fn block_hash(number: u64, generation: u64) -> String {
    format!("0x{generation:032x}{number:032x}")
}

fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn evm_event(
    event_type: EventType,
    block_number: u64,
    log_index: u32,
    node: &str,
    values: &[(&str, &str)],
) -> RegistryEvent {
    RegistryEvent {
        event_type,
        blockchain: Blockchain::ETH,
        network_id: 1,
        block_number,
        block_hash: Some(block_hash(block_number, 0)),
        log_index: Some(log_index),
        transaction_hash: Some(format!("0xtx{block_number}")),
        contract_address: REGISTRY.to_string(),
        node: Some(node.to_string()),
        return_values: args(values),
        atxuid: None,
    }
}

/// Transfer from the null address followed by the NewURI naming it.
pub fn mint_events(
    block_number: u64,
    log_index: u32,
    name: &str,
    owner: &str,
) -> Vec<RegistryEvent> {
    let node = eip137_namehash(name);
    vec![
        evm_event(
            EventType::Transfer,
            block_number,
            log_index,
            &node,
            &[("from", NULL_ADDRESS), ("to", owner)],
        ),
        evm_event(EventType::NewURI, block_number, log_index + 1, &node, &[("uri", name)]),
    ]
}

/// A log as returned by the EVM client. The block hash is filled in when the log is read.
pub fn decoded_event(
    event_type: EventType,
    block_number: u64,
    log_index: u32,
    node: Option<&str>,
    values: &[(&str, &str)],
) -> DecodedEvent {
    let mut args = args(values);
    if let Some(node) = node {
        args.insert(
            "tokenId".to_string(),
            node_to_token_id(node).unwrap().to_string(),
        );
    }
    DecodedEvent {
        block_number,
        block_hash: None,
        log_index,
        transaction_hash: Some(format!("0xtx{block_number}")),
        contract_address: REGISTRY.to_string(),
        event_name: event_type.to_string(),
        args,
    }
}

pub fn decoded_mint(
    block_number: u64,
    log_index: u32,
    name: &str,
    owner: &str,
) -> Vec<DecodedEvent> {
    let node = eip137_namehash(name);
    vec![
        decoded_event(
            EventType::Transfer,
            block_number,
            log_index,
            Some(&node),
            &[("from", NULL_ADDRESS), ("to", owner)],
        ),
        decoded_event(
            EventType::NewURI,
            block_number,
            log_index + 1,
            Some(&node),
            &[("uri", name)],
        ),
    ]
}

#[derive(Default)]
struct MockEvmState {
    latest: u64,
    forks: Vec<u64>,
    events: Vec<DecodedEvent>,
    resolvers: HashMap<String, String>,
    records: HashMap<String, (String, String)>,
    fail_from: Option<u64>,
    reads_reverting: bool,
    reorg_after_log_query: Option<u64>,
}

impl MockEvmState {
    fn generation(&self, number: u64) -> u64 {
        self.forks.iter().filter(|fork| **fork <= number).count() as u64
    }
}

/// In-memory EVM chain. Every reorg bumps the hash generation of the blocks at and above
/// the fork block.
#[derive(Default)]
pub struct MockEvmClient {
    state: Mutex<MockEvmState>,
    block_lookups: AtomicUsize,
}

impl MockEvmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest(&self, latest: u64) {
        self.state.lock().unwrap().latest = latest;
    }

    pub fn push_events(&self, events: impl IntoIterator<Item = DecodedEvent>) {
        self.state.lock().unwrap().events.extend(events);
    }

    /// Replaces every block from `fork_block` on, dropping their events.
    pub fn reorg(&self, fork_block: u64) {
        let mut state = self.state.lock().unwrap();
        state.forks.push(fork_block);
        state.events.retain(|e| e.block_number < fork_block);
    }

    pub fn current_hash(&self, number: u64) -> String {
        let state = self.state.lock().unwrap();
        block_hash(number, state.generation(number))
    }

    pub fn set_resolver(&self, node: &str, resolver: &str) {
        self.state
            .lock()
            .unwrap()
            .resolvers
            .insert(node.to_string(), resolver.to_string());
    }

    pub fn set_record(&self, key_hash: &str, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(key_hash.to_string(), (key.to_string(), value.to_string()));
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().fail_from = failing.then_some(0);
    }

    /// Log queries reaching `block` fail from now on.
    pub fn fail_from(&self, block: u64) {
        self.state.lock().unwrap().fail_from = Some(block);
    }

    /// Contract reads revert from now on.
    pub fn set_reads_reverting(&self, reverting: bool) {
        self.state.lock().unwrap().reads_reverting = reverting;
    }

    /// The next log query is answered from the current fork, then `fork_block` is replaced.
    pub fn reorg_after_next_log_query(&self, fork_block: u64) {
        self.state.lock().unwrap().reorg_after_log_query = Some(fork_block);
    }

    pub fn block_lookups(&self) -> usize {
        self.block_lookups.load(Ordering::SeqCst)
    }

    pub fn reset_block_lookups(&self) {
        self.block_lookups.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvmChainClient for MockEvmClient {
    async fn get_latest_block(&self) -> ChainResult<u64> {
        Ok(self.state.lock().unwrap().latest)
    }

    async fn get_block(&self, number: u64) -> ChainResult<Block> {
        self.block_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if number > state.latest {
            // Not recoverable on purpose, so the retry loop gives up at once.
            return Err(ChainError::InvalidResponse(format!("Block {number} is not mined")));
        }
        Ok(Block::new(number, block_hash(number, state.generation(number))))
    }

    async fn get_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DecodedEvent>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_from.is_some_and(|block| to_block >= block) {
            return Err(ChainError::InvalidResponse("mock failure".into()));
        }
        let events = state
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .map(|e| DecodedEvent {
                block_hash: Some(block_hash(e.block_number, state.generation(e.block_number))),
                ..e.clone()
            })
            .collect();
        if let Some(fork) = state.reorg_after_log_query.take() {
            state.forks.push(fork);
        }
        Ok(events)
    }

    async fn resolver_of(&self, _registry: &str, node: &str) -> ChainResult<String> {
        let state = self.state.lock().unwrap();
        if state.reads_reverting {
            return Err(ChainError::Rpc("execution reverted".into()));
        }
        Ok(state
            .resolvers
            .get(node)
            .cloned()
            .unwrap_or_else(|| NULL_ADDRESS.to_string()))
    }

    async fn record_by_key_hash(
        &self,
        _resolver: &str,
        _node: &str,
        key_hash: &str,
    ) -> ChainResult<(String, String)> {
        let state = self.state.lock().unwrap();
        if state.reads_reverting {
            return Err(ChainError::Rpc("execution reverted".into()));
        }
        Ok(state.records.get(key_hash).cloned().unwrap_or_default())
    }
}

/// A transaction with one `NewDomain(parent, label)` event of the registry.
pub fn zil_transaction(
    atxuid: u64,
    block_number: u64,
    label: &str,
    parent: &str,
) -> ZilTransaction {
    ZilTransaction {
        atxuid,
        hash: format!("0xzil{atxuid}"),
        block_number,
        events: vec![ZilEvent {
            name: "NewDomain".to_string(),
            contract_address: ZIL_REGISTRY.to_string(),
            params: args(&[("parent", parent), ("label", label)]),
        }],
    }
}

#[derive(Default)]
struct MockZilState {
    latest: Option<u64>,
    transactions: Vec<ZilTransaction>,
    records: HashMap<String, Records>,
}

#[derive(Default)]
pub struct MockZilClient {
    state: Mutex<MockZilState>,
}

impl MockZilClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest(&self, latest: u64) {
        self.state.lock().unwrap().latest = Some(latest);
    }

    pub fn push_transaction(&self, transaction: ZilTransaction) {
        self.state.lock().unwrap().transactions.push(transaction);
    }

    pub fn set_records(&self, resolver: &str, records: &[(&str, &str)]) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(resolver.to_string(), args(records));
    }
}

#[async_trait]
impl ZilChainClient for MockZilClient {
    async fn get_latest_block(&self) -> ChainResult<u64> {
        let state = self.state.lock().unwrap();
        Ok(state.latest.unwrap_or_else(|| {
            state
                .transactions
                .iter()
                .map(|t| t.block_number)
                .max()
                .unwrap_or(0)
        }))
    }

    async fn get_transactions(
        &self,
        atxuid_from: u64,
        atxuid_to: u64,
    ) -> ChainResult<Vec<ZilTransaction>> {
        let state = self.state.lock().unwrap();
        let mut transactions: Vec<ZilTransaction> = state
            .transactions
            .iter()
            .filter(|t| t.atxuid >= atxuid_from && t.atxuid <= atxuid_to)
            .cloned()
            .collect();
        transactions.sort_by_key(|t| t.atxuid);
        Ok(transactions)
    }

    async fn resolver_records(&self, resolver: &str) -> ChainResult<Records> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .records
            .get(resolver)
            .cloned()
            .unwrap_or_default())
    }
}
