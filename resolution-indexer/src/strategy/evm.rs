// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tracing::{debug, info};

use super::{arg, is_null_address, node_of, read_failed, require_domain};
use crate::chain::{DecodedEvent, EvmChainClient};
use crate::config::{ChainConfig, ContractKind};
use crate::error::{IndexerError, IndexerResult};
use crate::namehash::{is_valid_node, token_id_to_node};
use crate::repository::WorkerTransaction;
use crate::retry_with_max_elapsed_time;
use crate::types::{
    Block, Domain, EventType, Patch, Records, RecordsUpdate, RegistryEvent, ResolutionUpdate,
    ReverseResolution, SyncRange,
};

/// Strategy of the ETH and MATIC registries (UNS and CNS).
pub struct EvmStrategy {
    config: ChainConfig,
    client: Arc<dyn EvmChainClient>,
}

impl EvmStrategy {
    pub fn new(config: ChainConfig, client: Arc<dyn EvmChainClient>) -> Self {
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
        self.get_block(latest.saturating_sub(self.config.confirmation_blocks))
            .await
    }

    pub async fn get_block(&self, number: u64) -> IndexerResult<Block> {
        Ok(retry_with_max_elapsed_time!(
            self.client.get_block(number),
            self.config.max_retry_duration()
        )?)
    }

    pub async fn get_events(&self, range: &SyncRange) -> IndexerResult<Vec<RegistryEvent>> {
        let decoded = retry_with_max_elapsed_time!(
            self.client.get_events(range.from_block, range.to_block),
            self.config.max_retry_duration()
        )?;
        let mut events = Vec::with_capacity(decoded.len());
        for event in decoded {
            if let Some(event) = self.to_registry_event(event)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn to_registry_event(&self, event: DecodedEvent) -> IndexerResult<Option<RegistryEvent>> {
        let Ok(event_type) = event.event_name.parse::<EventType>() else {
            debug!(
                "[{}] Ignoring unknown event {}",
                self.config.blockchain, event.event_name
            );
            return Ok(None);
        };
        let node = event
            .args
            .get("tokenId")
            .map(|token_id| token_id_to_node(token_id))
            .transpose()
            .map_err(|e| IndexerError::InvariantViolation(e.to_string()))?;
        Ok(Some(RegistryEvent {
            event_type,
            blockchain: self.config.blockchain,
            network_id: self.config.network_id,
            block_number: event.block_number,
            block_hash: event.block_hash,
            log_index: Some(event.log_index),
            transaction_hash: event.transaction_hash,
            contract_address: event.contract_address.to_lowercase(),
            node,
            return_values: event.args,
            atxuid: None,
        }))
    }

    /// Applies `events[index]`. Transfer and NewURI look at their neighbours to pair a mint
    /// with its naming event.
    pub(crate) async fn process_event(
        &self,
        tx: &mut dyn WorkerTransaction,
        events: &[RegistryEvent],
        index: usize,
    ) -> IndexerResult<()> {
        let event = &events[index];
        match event.event_type {
            EventType::Transfer => self.on_transfer(tx, events, index).await,
            EventType::NewURI => self.on_new_uri(tx, events, index).await,
            EventType::Set => {
                let node = node_of(event)?;
                require_domain(tx, node).await?;
                let records = Records::from([(
                    arg(event, "key")?.to_string(),
                    arg(event, "value")?.to_string(),
                )]);
                tx.save_resolutions(&[
                    ResolutionUpdate::new(node).records(RecordsUpdate::Merge(records))
                ])
                .await?;
                Ok(())
            }
            EventType::ResetRecords => {
                let node = node_of(event)?;
                require_domain(tx, node).await?;
                tx.save_resolutions(&[
                    ResolutionUpdate::new(node).records(RecordsUpdate::Replace(Records::new()))
                ])
                .await?;
                Ok(())
            }
            EventType::Resolve => self.on_resolve(tx, event).await,
            EventType::Sync => self.on_sync(tx, event).await,
            EventType::SetReverse => {
                let node = node_of(event)?;
                require_domain(tx, node).await?;
                tx.save_reverse_resolutions(&[ReverseResolution {
                    node: node.to_string(),
                    blockchain: self.config.blockchain,
                    network_id: self.config.network_id,
                    reverse_address: arg(event, "addr")?.to_lowercase(),
                }])
                .await
            }
            EventType::RemoveReverse => {
                tx.remove_reverse_resolutions(&[arg(event, "addr")?.to_lowercase()])
                    .await?;
                Ok(())
            }
            EventType::Approval | EventType::ApprovalForAll | EventType::NewKey => Ok(()),
            EventType::NewDomain | EventType::Configured => Err(IndexerError::EventProcessing(
                format!("{} is not an EVM registry event", event.event_type),
            )),
        }
    }

    // UNS registries store the records of their tokens themselves.
    fn registry_resolver(&self, contract: &str) -> Patch<String> {
        match self.config.contract_kind(contract) {
            Some(ContractKind::UnsRegistry) => Patch::Set(contract.to_string()),
            _ => Patch::Keep,
        }
    }

    async fn on_transfer(
        &self,
        tx: &mut dyn WorkerTransaction,
        events: &[RegistryEvent],
        index: usize,
    ) -> IndexerResult<()> {
        let event = &events[index];
        let node = node_of(event)?;
        let from = arg(event, "from")?;
        let to = arg(event, "to")?.to_lowercase();

        if !is_null_address(from) {
            require_domain(tx, node).await?;
            let update = if is_null_address(&to) {
                ResolutionUpdate::burn(node)
            } else {
                ResolutionUpdate::new(node).owner(to)
            };
            tx.save_resolutions(&[update]).await?;
            return Ok(());
        }

        let named_next = events.get(index + 1).is_some_and(|next| {
            next.event_type == EventType::NewURI && next.node.as_deref() == Some(node)
        });
        if named_next {
            return Ok(());
        }

        // Mint without a naming event in the batch: a bridged token, or one whose name was
        // registered on another chain.
        info!(
            "[{}] Mint of {} without NewURI at block {}",
            self.config.blockchain, node, event.block_number
        );
        tx.save_domains(&[Domain::placeholder(node)]).await?;
        tx.save_resolutions(&[ResolutionUpdate::new(node)
            .owner(to)
            .registry(event.contract_address.clone())
            .resolver(self.registry_resolver(&event.contract_address))])
            .await?;
        Ok(())
    }

    async fn on_new_uri(
        &self,
        tx: &mut dyn WorkerTransaction,
        events: &[RegistryEvent],
        index: usize,
    ) -> IndexerResult<()> {
        let event = &events[index];
        let node = node_of(event)?;
        let uri = arg(event, "uri")?.to_lowercase();

        let mint = index
            .checked_sub(1)
            .and_then(|i| events.get(i))
            .filter(|prev| {
                prev.event_type == EventType::Transfer
                    && prev.node.as_deref() == Some(node)
                    && prev.value("from").is_some_and(is_null_address)
            })
            .ok_or_else(|| {
                IndexerError::EventProcessing(format!(
                    "NewURI {uri} is not preceded by the mint of {node}"
                ))
            })?;
        if !is_valid_node(&uri, node) {
            return Err(IndexerError::EventProcessing(format!(
                "NewURI {uri} does not hash to {node}"
            )));
        }

        tx.save_domains(&[Domain::named(node, uri)]).await?;
        tx.save_resolutions(&[ResolutionUpdate::new(node)
            .owner(arg(mint, "to")?.to_lowercase())
            .registry(event.contract_address.clone())
            .resolver(self.registry_resolver(&event.contract_address))])
            .await?;
        Ok(())
    }

    async fn on_resolve(
        &self,
        tx: &mut dyn WorkerTransaction,
        event: &RegistryEvent,
    ) -> IndexerResult<()> {
        let node = node_of(event)?;
        require_domain(tx, node).await?;
        let resolver = retry_with_max_elapsed_time!(
            self.client.resolver_of(&event.contract_address, node),
            self.config.max_retry_duration()
        )
        .map_err(|e| read_failed(event, e))?
        .to_lowercase();
        let resolver = if is_null_address(&resolver) {
            Patch::Clear
        } else {
            Patch::Set(resolver)
        };
        tx.save_resolutions(&[ResolutionUpdate::new(node).resolver(resolver)])
            .await?;
        Ok(())
    }

    async fn on_sync(
        &self,
        tx: &mut dyn WorkerTransaction,
        event: &RegistryEvent,
    ) -> IndexerResult<()> {
        let node = node_of(event)?;
        let update_id = arg(event, "updateId")?;
        require_domain(tx, node).await?;

        let records = if update_id == "0" {
            RecordsUpdate::Replace(Records::new())
        } else {
            let resolver = arg(event, "resolver")?;
            let (key, value) = retry_with_max_elapsed_time!(
                self.client.record_by_key_hash(resolver, node, update_id),
                self.config.max_retry_duration()
            )
            .map_err(|e| read_failed(event, e))?;
            if key.is_empty() {
                return Err(IndexerError::EventProcessing(format!(
                    "Key hash {update_id} is unknown to resolver {resolver}"
                )));
            }
            RecordsUpdate::Merge(Records::from([(key, value)]))
        };
        tx.save_resolutions(&[ResolutionUpdate::new(node).records(records)])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namehash::eip137_namehash;
    use crate::repository::{InMemoryWorkerStore, WorkerStore};
    use crate::strategy::ChainStrategy;
    use crate::test_utils::{
        evm_chain_config, evm_event, mint_events, MockEvmClient, OWNER, REGISTRY,
    };
    use crate::types::{Blockchain, NULL_ADDRESS};

    fn strategy(client: Arc<MockEvmClient>) -> ChainStrategy {
        ChainStrategy::Evm(EvmStrategy::new(evm_chain_config(), client))
    }

    async fn process(
        store: &InMemoryWorkerStore,
        strategy: &ChainStrategy,
        events: &[RegistryEvent],
    ) -> crate::types::ProcessSummary {
        let mut tx = store.begin(Blockchain::ETH, 1).await.unwrap();
        let summary = strategy.process_events(tx.as_mut(), events).await.unwrap();
        tx.commit().await.unwrap();
        summary
    }

    #[tokio::test]
    async fn test_mint_and_new_uri_create_domain() {
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(Arc::new(MockEvmClient::new()));
        let node = eip137_namehash("brad.crypto");

        let summary = process(&store, &strategy, &mint_events(10, 0, "brad.crypto", OWNER)).await;

        assert_eq!(summary.processed, 2);
        let state = store.snapshot().await;
        assert_eq!(state.domains[&node].name.as_deref(), Some("brad.crypto"));
        let resolution = state.resolution(&node, Blockchain::ETH, 1).unwrap();
        assert_eq!(resolution.owner_address.as_deref(), Some(OWNER));
        assert_eq!(resolution.registry.as_deref(), Some(REGISTRY));
        assert_eq!(resolution.resolver.as_deref(), Some(REGISTRY));
    }

    #[tokio::test]
    async fn test_new_uri_with_wrong_hash_is_skipped() {
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(Arc::new(MockEvmClient::new()));
        let node = eip137_namehash("brad.crypto");
        let events = vec![
            evm_event(
                EventType::Transfer,
                10,
                0,
                &node,
                &[("from", NULL_ADDRESS), ("to", OWNER)],
            ),
            evm_event(EventType::NewURI, 10, 1, &node, &[("uri", "other.crypto")]),
        ];

        let summary = process(&store, &strategy, &events).await;

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!store.snapshot().await.domains.contains_key(&node));
    }

    #[tokio::test]
    async fn test_bridge_mint_creates_placeholder() {
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(Arc::new(MockEvmClient::new()));
        let node = eip137_namehash("bridged.crypto");
        let events = vec![evm_event(
            EventType::Transfer,
            10,
            0,
            &node,
            &[("from", NULL_ADDRESS), ("to", OWNER)],
        )];

        process(&store, &strategy, &events).await;

        let state = store.snapshot().await;
        assert_eq!(state.domains[&node].name, None);
        assert_eq!(
            state
                .resolution(&node, Blockchain::ETH, 1)
                .unwrap()
                .owner_address
                .as_deref(),
            Some(OWNER)
        );
    }

    #[tokio::test]
    async fn test_transfer_of_unknown_domain_is_skipped() {
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(Arc::new(MockEvmClient::new()));
        let events = vec![evm_event(
            EventType::Transfer,
            10,
            0,
            &eip137_namehash("ghost.crypto"),
            &[("from", OWNER), ("to", "0x00000000000000000000000000000000000000bb")],
        )];

        let summary = process(&store, &strategy, &events).await;

        assert_eq!(summary.skipped, 1);
        assert!(store.snapshot().await.domains.is_empty());
    }

    #[tokio::test]
    async fn test_burn_resets_resolution() {
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(Arc::new(MockEvmClient::new()));
        let node = eip137_namehash("brad.crypto");
        let mut events = mint_events(10, 0, "brad.crypto", OWNER);
        events.push(evm_event(
            EventType::Set,
            11,
            0,
            &node,
            &[("key", "crypto.ETH.address"), ("value", OWNER)],
        ));
        events.push(evm_event(
            EventType::Transfer,
            12,
            0,
            &node,
            &[("from", OWNER), ("to", NULL_ADDRESS)],
        ));

        process(&store, &strategy, &events).await;

        let state = store.snapshot().await;
        let resolution = state.resolution(&node, Blockchain::ETH, 1).unwrap();
        assert_eq!(resolution.owner_address.as_deref(), Some(NULL_ADDRESS));
        assert_eq!(resolution.resolver, None);
        assert_eq!(resolution.registry, None);
        assert!(resolution.records.is_empty());
    }

    #[tokio::test]
    async fn test_set_merges_and_reset_clears() {
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(Arc::new(MockEvmClient::new()));
        let node = eip137_namehash("brad.crypto");
        let mut events = mint_events(10, 0, "brad.crypto", OWNER);
        events.push(evm_event(EventType::Set, 11, 0, &node, &[("key", "b"), ("value", "2")]));
        events.push(evm_event(EventType::Set, 11, 1, &node, &[("key", "a"), ("value", "1")]));
        process(&store, &strategy, &events).await;

        let records = store
            .snapshot()
            .await
            .resolution(&node, Blockchain::ETH, 1)
            .unwrap()
            .records
            .clone();
        assert_eq!(
            records,
            Records::from([("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())])
        );

        process(
            &store,
            &strategy,
            &[evm_event(EventType::ResetRecords, 12, 0, &node, &[])],
        )
        .await;
        assert!(store
            .snapshot()
            .await
            .resolution(&node, Blockchain::ETH, 1)
            .unwrap()
            .records
            .is_empty());
    }

    #[tokio::test]
    async fn test_resolve_and_sync_read_the_chain() {
        let client = Arc::new(MockEvmClient::new());
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(client.clone());
        let node = eip137_namehash("brad.crypto");
        let resolver = "0x00000000000000000000000000000000000000cc";
        client.set_resolver(&node, resolver);
        client.set_record("42", "crypto.BTC.address", "bc1q");

        let mut events = mint_events(10, 0, "brad.crypto", OWNER);
        events.push(evm_event(EventType::Resolve, 11, 0, &node, &[("to", resolver)]));
        events.push(evm_event(
            EventType::Sync,
            11,
            1,
            &node,
            &[("resolver", resolver), ("updateId", "42")],
        ));
        process(&store, &strategy, &events).await;

        let state = store.snapshot().await;
        let resolution = state.resolution(&node, Blockchain::ETH, 1).unwrap();
        assert_eq!(resolution.resolver.as_deref(), Some(resolver));
        assert_eq!(resolution.records["crypto.BTC.address"], "bc1q");

        process(
            &store,
            &strategy,
            &[evm_event(
                EventType::Sync,
                12,
                0,
                &node,
                &[("resolver", resolver), ("updateId", "0")],
            )],
        )
        .await;
        assert!(store
            .snapshot()
            .await
            .resolution(&node, Blockchain::ETH, 1)
            .unwrap()
            .records
            .is_empty());
    }

    #[tokio::test]
    async fn test_reverse_resolution_is_superseded_and_removed() {
        let store = InMemoryWorkerStore::new();
        let strategy = strategy(Arc::new(MockEvmClient::new()));
        let first = eip137_namehash("first.crypto");
        let second = eip137_namehash("second.crypto");
        let mut events = mint_events(10, 0, "first.crypto", OWNER);
        events.extend(mint_events(10, 2, "second.crypto", OWNER));
        events.push(evm_event(EventType::SetReverse, 11, 0, &first, &[("addr", OWNER)]));
        events.push(evm_event(EventType::SetReverse, 11, 1, &second, &[("addr", OWNER)]));
        process(&store, &strategy, &events).await;

        let state = store.snapshot().await;
        assert_eq!(
            state.reverse_resolutions.get(&(Blockchain::ETH, 1, OWNER.to_string())),
            Some(&second)
        );

        let mut remove = evm_event(EventType::RemoveReverse, 12, 0, &second, &[("addr", OWNER)]);
        remove.node = None;
        process(&store, &strategy, &[remove]).await;
        assert!(store.snapshot().await.reverse_resolutions.is_empty());
    }
}
