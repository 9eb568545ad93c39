// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Indexer configuration

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{IndexerError, IndexerResult};
use crate::types::Blockchain;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
}

impl IndexerConfig {
    /// Load configuration from YAML file with environment variable substitution
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read indexer config file: {:?}", path))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let contents = substitute_env_vars(contents)?;
        let config: IndexerConfig =
            serde_yaml::from_str(&contents).context("Failed to parse indexer config YAML")?;
        Ok(config)
    }

    pub fn validate(&self) -> IndexerResult<()> {
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.blockchain) {
                return Err(IndexerError::Config(format!(
                    "Chain {} is configured more than once",
                    chain.blockchain
                )));
            }
            chain.validate()?;
        }
        Ok(())
    }

    pub fn chain(&self, blockchain: Blockchain) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.blockchain == blockchain)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").context("Invalid substitution regex")?;
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(var_value) = std::env::var(var_name) {
            result = result.replace(full_match, &var_value);
        } else {
            // Keep the placeholder if env var is not set
            tracing::warn!(
                "Environment variable {} not found, keeping placeholder",
                var_name
            );
        }
    }

    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// UNS registry, which also stores the records of its tokens.
    UnsRegistry,
    CnsRegistry,
    CnsResolver,
    ZnsRegistry,
}

impl ContractKind {
    pub fn is_registry(&self) -> bool {
        !matches!(self, ContractKind::CnsResolver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    pub address: String,
    pub kind: ContractKind,
}

/// Per chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub blockchain: Blockchain,
    pub network_id: i32,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub starting_block: u64,
    #[serde(default)]
    pub confirmation_blocks: u64,
    #[serde(default = "default_block_fetch_limit")]
    pub block_fetch_limit: u64,
    #[serde(default = "default_max_reorg_size")]
    pub max_reorg_size: u64,
    #[serde(default = "default_fetch_interval_ms")]
    pub fetch_interval_ms: u64,
    #[serde(default = "default_max_retry_duration_ms")]
    pub max_retry_duration_ms: u64,
    /// One-shot resync target applied before the first iteration.
    #[serde(default)]
    pub resync_from: Option<u64>,
    /// ViewBlock-style transaction API, Zilliqa only.
    #[serde(default)]
    pub transaction_api_url: Option<String>,
    #[serde(default)]
    pub transaction_api_key: Option<String>,
    #[serde(default = "default_zil_network")]
    pub transaction_api_network: String,
    #[serde(default = "default_transaction_page_size")]
    pub transaction_page_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_block_fetch_limit() -> u64 {
    500
}

fn default_max_reorg_size() -> u64 {
    200
}

fn default_fetch_interval_ms() -> u64 {
    5000
}

fn default_max_retry_duration_ms() -> u64 {
    30_000
}

fn default_zil_network() -> String {
    "mainnet".to_string()
}

fn default_transaction_page_size() -> u64 {
    100
}

impl ChainConfig {
    pub fn new(blockchain: Blockchain, network_id: i32, rpc_url: impl Into<String>) -> Self {
        Self {
            blockchain,
            network_id,
            rpc_url: rpc_url.into(),
            contracts: vec![],
            enabled: true,
            starting_block: 0,
            confirmation_blocks: 0,
            block_fetch_limit: default_block_fetch_limit(),
            max_reorg_size: default_max_reorg_size(),
            fetch_interval_ms: default_fetch_interval_ms(),
            max_retry_duration_ms: default_max_retry_duration_ms(),
            resync_from: None,
            transaction_api_url: None,
            transaction_api_key: None,
            transaction_api_network: default_zil_network(),
            transaction_page_size: default_transaction_page_size(),
        }
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn max_retry_duration(&self) -> Duration {
        Duration::from_millis(self.max_retry_duration_ms)
    }

    pub fn contract_kind(&self, address: &str) -> Option<ContractKind> {
        self.contracts
            .iter()
            .find(|c| c.address.eq_ignore_ascii_case(address))
            .map(|c| c.kind)
    }

    pub fn validate(&self) -> IndexerResult<()> {
        let chain = self.blockchain;
        let fail = |msg: &str| Err(IndexerError::Config(format!("[{chain}] {msg}")));

        if self.rpc_url.trim().is_empty() {
            return fail("rpc_url is required");
        }
        if self.contracts.is_empty() {
            return fail("at least one contract is required");
        }
        if self.block_fetch_limit == 0 {
            return fail("block_fetch_limit must be greater than zero");
        }
        if chain.is_evm() {
            if self.max_reorg_size == 0 {
                return fail("max_reorg_size must be greater than zero");
            }
            if self
                .contracts
                .iter()
                .any(|c| c.kind == ContractKind::ZnsRegistry)
            {
                return fail("zns_registry contracts are only valid on ZIL");
            }
        } else {
            if self
                .transaction_api_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
            {
                return fail("transaction_api_url is required");
            }
            if self.transaction_page_size == 0 {
                return fail("transaction_page_size must be greater than zero");
            }
            if self.registry_address().is_none() {
                return fail("a zns_registry contract is required");
            }
        }
        Ok(())
    }

    /// The Zilliqa registry contract.
    pub fn registry_address(&self) -> Option<&str> {
        self.contracts
            .iter()
            .find(|c| c.kind == ContractKind::ZnsRegistry)
            .map(|c| c.address.as_str())
    }
}
