// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain clients consumed by the strategies.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::types::{Block, Records};

pub mod evm;
pub mod zil;

pub use evm::EthersEvmClient;
pub use zil::ViewBlockZilClient;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address {0}")]
    InvalidAddress(String),
}

impl ChainError {
    /// Whether the call is worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::BlockNotFound(_))
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// A registry log decoded by an EVM client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub log_index: u32,
    pub transaction_hash: Option<String>,
    pub contract_address: String,
    pub event_name: String,
    pub args: BTreeMap<String, String>,
}

#[async_trait]
pub trait EvmChainClient: Send + Sync {
    async fn get_latest_block(&self) -> ChainResult<u64>;

    async fn get_block(&self, number: u64) -> ChainResult<Block>;

    /// Registry logs emitted by the configured contracts in `[from_block, to_block]`.
    async fn get_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DecodedEvent>>;

    /// `resolverOf(tokenId)` on `registry`.
    async fn resolver_of(&self, registry: &str, node: &str) -> ChainResult<String>;

    /// Resolves `key_hash` (decimal) to its key through `resolver` and reads the record value
    /// stored under it for `node`.
    async fn record_by_key_hash(
        &self,
        resolver: &str,
        node: &str,
        key_hash: &str,
    ) -> ChainResult<(String, String)>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZilEvent {
    pub name: String,
    pub contract_address: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZilTransaction {
    pub atxuid: u64,
    pub hash: String,
    pub block_number: u64,
    pub events: Vec<ZilEvent>,
}

#[async_trait]
pub trait ZilChainClient: Send + Sync {
    async fn get_latest_block(&self) -> ChainResult<u64>;

    /// Registry transactions with `atxuid_from <= atxuid <= atxuid_to`, ascending.
    async fn get_transactions(
        &self,
        atxuid_from: u64,
        atxuid_to: u64,
    ) -> ChainResult<Vec<ZilTransaction>>;

    /// The `records` field of a resolver contract.
    async fn resolver_records(&self, resolver: &str) -> ChainResult<Records>;
}
