// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tracing::debug;

use super::{arg, is_null_address, node_of, read_failed, require_domain};
use crate::chain::zil::normalize_zil_address;
use crate::chain::{ZilChainClient, ZilTransaction};
use crate::config::ChainConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::namehash::{normalize_node, zns_child_node, ROOT_NODE};
use crate::repository::WorkerTransaction;
use crate::retry_with_max_elapsed_time;
use crate::types::{
    Block, Domain, EventType, Patch, Records, RecordsUpdate, RegistryEvent, ResolutionUpdate,
    SyncRange,
};

/// Strategy of the Zilliqa name service registry.
///
/// The registry log is read per transaction through the `atxuid` cursor. Zilliqa blocks are
/// final, so no confirmation margin applies.
pub struct ZilStrategy {
    config: ChainConfig,
    client: Arc<dyn ZilChainClient>,
}

impl ZilStrategy {
    pub fn new(config: ChainConfig, client: Arc<dyn ZilChainClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub async fn get_latest_network_block(&self) -> IndexerResult<Block> {
        let latest = retry_with_max_elapsed_time!(
            self.client.get_latest_block(),
            self.config.max_retry_duration()
        )?;
        Ok(Block::without_hash(latest))
    }

    /// Pages through the registry transactions after `range.after_atxuid` until one lands
    /// above `range.to_block`. Transactions below `range.from_block` were already mirrored
    /// without registry events and are skipped.
    pub async fn get_events(&self, range: &SyncRange) -> IndexerResult<Vec<RegistryEvent>> {
        let page = self.config.transaction_page_size;
        let mut from = range.after_atxuid.map_or(0, |atxuid| atxuid + 1);
        let mut events = vec![];
        loop {
            let transactions = retry_with_max_elapsed_time!(
                self.client.get_transactions(from, from + page - 1),
                self.config.max_retry_duration()
            )?;
            let fetched = transactions.len() as u64;
            let mut reached_end = false;
            for transaction in transactions {
                if transaction.block_number > range.to_block {
                    reached_end = true;
                    break;
                }
                if transaction.block_number < range.from_block {
                    continue;
                }
                events.extend(self.to_registry_events(&transaction)?);
            }
            if reached_end || fetched < page {
                break;
            }
            from += page;
        }
        debug!(
            "[{}] Fetched {} registry events for blocks {}-{}",
            self.config.blockchain,
            events.len(),
            range.from_block,
            range.to_block
        );
        Ok(events)
    }

    fn to_registry_events(
        &self,
        transaction: &ZilTransaction,
    ) -> IndexerResult<Vec<RegistryEvent>> {
        let registry = self.config.registry_address().unwrap_or_default();
        let mut events = vec![];
        for (index, event) in transaction.events.iter().enumerate() {
            if !event.contract_address.eq_ignore_ascii_case(registry) {
                continue;
            }
            let (event_type, node) = match event.name.as_str() {
                "NewDomain" => {
                    let parent = param(&event.params, "parent")?;
                    let label = param(&event.params, "label")?;
                    (EventType::NewDomain, zns_child_node(parent, label))
                }
                "Configured" => (
                    EventType::Configured,
                    normalize_node(param(&event.params, "node")?),
                ),
                _ => continue,
            };
            let node = node.map_err(|e| IndexerError::InvariantViolation(e.to_string()))?;
            events.push(RegistryEvent {
                event_type,
                blockchain: self.config.blockchain,
                network_id: self.config.network_id,
                block_number: transaction.block_number,
                block_hash: None,
                log_index: Some(index as u32),
                transaction_hash: Some(transaction.hash.clone()),
                contract_address: event.contract_address.to_lowercase(),
                node: Some(node),
                return_values: event.params.clone(),
                atxuid: Some(transaction.atxuid),
            });
        }
        Ok(events)
    }

    pub(crate) async fn process_event(
        &self,
        tx: &mut dyn WorkerTransaction,
        event: &RegistryEvent,
    ) -> IndexerResult<()> {
        match event.event_type {
            EventType::NewDomain => self.on_new_domain(tx, event).await,
            EventType::Configured => self.on_configured(tx, event).await,
            other => Err(IndexerError::EventProcessing(format!(
                "{other} is not a Zilliqa registry event"
            ))),
        }
    }

    async fn on_new_domain(
        &self,
        tx: &mut dyn WorkerTransaction,
        event: &RegistryEvent,
    ) -> IndexerResult<()> {
        let node = node_of(event)?;
        let parent = normalize_node(arg(event, "parent")?)?;
        let label = arg(event, "label")?.to_lowercase();

        let name = if parent == ROOT_NODE {
            label
        } else {
            let parent_name = tx
                .find_domain(&parent)
                .await?
                .and_then(|domain| domain.name)
                .ok_or_else(|| {
                    IndexerError::EventProcessing(format!(
                        "Parent {parent} of {label} has no known name"
                    ))
                })?;
            format!("{label}.{parent_name}")
        };
        tx.save_domains(&[Domain::named(node, name)]).await?;
        Ok(())
    }

    async fn on_configured(
        &self,
        tx: &mut dyn WorkerTransaction,
        event: &RegistryEvent,
    ) -> IndexerResult<()> {
        let node = node_of(event)?;
        require_domain(tx, node).await?;
        let owner = address(arg(event, "owner")?)?;
        let resolver = address(arg(event, "resolver")?)?;

        let (resolver, records) = if is_null_address(&resolver) {
            (Patch::Clear, Records::new())
        } else {
            let records = retry_with_max_elapsed_time!(
                self.client.resolver_records(&resolver),
                self.config.max_retry_duration()
            )
            .map_err(|e| read_failed(event, e))?;
            (Patch::Set(resolver), records)
        };
        tx.save_resolutions(&[ResolutionUpdate::new(node)
            .owner(owner)
            .resolver(resolver)
            .registry(event.contract_address.clone())
            .records(RecordsUpdate::Replace(records))])
            .await?;
        Ok(())
    }
}

fn param<'a>(
    params: &'a std::collections::BTreeMap<String, String>,
    key: &str,
) -> IndexerResult<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| IndexerError::InvariantViolation(format!("Zilliqa event has no {key}")))
}

fn address(value: &str) -> IndexerResult<String> {
    normalize_zil_address(value).map_err(|e| IndexerError::EventProcessing(e.to_string()))
}
