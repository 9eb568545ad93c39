// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::contract::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, Log, H256, U256};
use ethers::utils::keccak256;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tap::TapFallible;

use super::{ChainError, ChainResult, DecodedEvent, EvmChainClient};
use crate::namehash::node_to_token_id;
use crate::types::{Block, EventType};

abigen!(
    RegistryReader,
    r#"[
        function resolverOf(uint256 tokenId) external view returns (address)
        function hashToKey(uint256 keyHash) external view returns (string)
        function get(string key, uint256 tokenId) external view returns (string)
    ]"#
);

const EVENT_SIGNATURES: &[(&str, EventType)] = &[
    ("Transfer(address,address,uint256)", EventType::Transfer),
    ("Approval(address,address,uint256)", EventType::Approval),
    ("ApprovalForAll(address,address,bool)", EventType::ApprovalForAll),
    ("NewURI(uint256,string)", EventType::NewURI),
    ("NewKey(uint256,string,string)", EventType::NewKey),
    ("Set(uint256,string,string,string,string)", EventType::Set),
    ("ResetRecords(uint256)", EventType::ResetRecords),
    ("Resolve(uint256,address)", EventType::Resolve),
    ("Sync(address,uint256,uint256)", EventType::Sync),
    ("SetReverse(address,uint256)", EventType::SetReverse),
    ("RemoveReverse(address)", EventType::RemoveReverse),
];

/// Topic0 of an event: the full keccak256 of its signature.
fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature))
}

fn event_topics() -> &'static [(H256, EventType)] {
    static TOPICS: OnceLock<Vec<(H256, EventType)>> = OnceLock::new();
    TOPICS.get_or_init(|| {
        EVENT_SIGNATURES
            .iter()
            .map(|(signature, event_type)| (event_topic(signature), *event_type))
            .collect()
    })
}

pub struct EthersEvmClient {
    provider: Arc<Provider<Http>>,
    contracts: Vec<Address>,
}

impl EthersEvmClient {
    pub fn new(rpc_url: &str, contracts: &[String]) -> ChainResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Rpc(format!("Invalid RPC url {rpc_url}: {e}")))?;
        let contracts = contracts
            .iter()
            .map(|address| parse_address(address))
            .collect::<ChainResult<Vec<_>>>()?;
        Ok(Self {
            provider: Arc::new(provider),
            contracts,
        })
    }

    fn reader(&self, address: &str) -> ChainResult<RegistryReader<Provider<Http>>> {
        Ok(RegistryReader::new(
            parse_address(address)?,
            self.provider.clone(),
        ))
    }
}

#[async_trait]
impl EvmChainClient for EthersEvmClient {
    async fn get_latest_block(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn get_block(&self, number: u64) -> ChainResult<Block> {
        let block = self
            .provider
            .get_block(number)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or(ChainError::BlockNotFound(number))?;
        Ok(Block {
            number,
            hash: block.hash.map(|h| format!("{h:?}")),
        })
    }

    // Note: query may fail if range is too big. The worker bounds it with the fetch limit.
    async fn get_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DecodedEvent>> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(self.contracts.clone());
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
            .tap_err(|e| {
                tracing::error!(
                    "get_events failed. Filter: {:?}. Error {:?}",
                    filter,
                    e
                )
            })?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if !self.contracts.contains(&log.address) {
                return Err(ChainError::InvalidResponse(format!(
                    "Provider returned a log from an unexpected contract: {:?}",
                    log.address
                )));
            }
            if let Some(event) = decode_log(&log)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    async fn resolver_of(&self, registry: &str, node: &str) -> ChainResult<String> {
        let token_id = token_id(node)?;
        let resolver = self
            .reader(registry)?
            .resolver_of(token_id)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(format!("{resolver:?}"))
    }

    async fn record_by_key_hash(
        &self,
        resolver: &str,
        node: &str,
        key_hash: &str,
    ) -> ChainResult<(String, String)> {
        let reader = self.reader(resolver)?;
        let key_hash = U256::from_dec_str(key_hash)
            .map_err(|e| ChainError::InvalidResponse(format!("Invalid key hash: {e}")))?;
        let key = reader
            .hash_to_key(key_hash)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let value = reader
            .get(key.clone(), token_id(node)?)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok((key, value))
    }
}

fn parse_address(address: &str) -> ChainResult<Address> {
    Address::from_str(address).map_err(|_| ChainError::InvalidAddress(address.to_string()))
}

fn token_id(node: &str) -> ChainResult<U256> {
    node_to_token_id(node).map_err(|e| ChainError::InvalidResponse(e.to_string()))
}

fn topic(log: &Log, index: usize) -> ChainResult<H256> {
    log.topics.get(index).copied().ok_or_else(|| {
        ChainError::InvalidResponse(format!(
            "Log {:?} is missing topic {index}",
            log.transaction_hash
        ))
    })
}

fn topic_address(log: &Log, index: usize) -> ChainResult<String> {
    let topic = topic(log, index)?;
    Ok(format!("{:?}", Address::from_slice(&topic.as_bytes()[12..])))
}

fn topic_uint(log: &Log, index: usize) -> ChainResult<String> {
    Ok(U256::from_big_endian(topic(log, index)?.as_bytes()).to_string())
}

fn data_tokens(log: &Log, types: &[ParamType]) -> ChainResult<Vec<Token>> {
    abi::decode(types, &log.data).map_err(|e| {
        ChainError::InvalidResponse(format!(
            "Failed to decode log data of {:?}: {e}",
            log.transaction_hash
        ))
    })
}

fn token_string(token: Token) -> String {
    match token {
        Token::String(s) => s,
        Token::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

// Returns `None` for logs of events the indexer does not know about.
fn decode_log(log: &Log) -> ChainResult<Option<DecodedEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let Some(event_type) = event_topics()
        .iter()
        .find(|(t, _)| t == topic0)
        .map(|(_, event_type)| *event_type)
    else {
        tracing::debug!("Skipping unknown log topic {:?}", topic0);
        return Ok(None);
    };

    let mut args = BTreeMap::new();
    match event_type {
        EventType::Transfer => {
            args.insert("from".into(), topic_address(log, 1)?);
            args.insert("to".into(), topic_address(log, 2)?);
            args.insert("tokenId".into(), topic_uint(log, 3)?);
        }
        EventType::Approval => {
            args.insert("owner".into(), topic_address(log, 1)?);
            args.insert("approved".into(), topic_address(log, 2)?);
            args.insert("tokenId".into(), topic_uint(log, 3)?);
        }
        EventType::ApprovalForAll => {
            args.insert("owner".into(), topic_address(log, 1)?);
            args.insert("operator".into(), topic_address(log, 2)?);
            let mut data = data_tokens(log, &[ParamType::Bool])?;
            args.insert("approved".into(), token_string(data.remove(0)));
        }
        EventType::NewURI => {
            args.insert("tokenId".into(), topic_uint(log, 1)?);
            let mut data = data_tokens(log, &[ParamType::String])?;
            args.insert("uri".into(), token_string(data.remove(0)));
        }
        EventType::NewKey => {
            args.insert("tokenId".into(), topic_uint(log, 1)?);
            let mut data = data_tokens(log, &[ParamType::String])?;
            args.insert("key".into(), token_string(data.remove(0)));
        }
        EventType::Set => {
            args.insert("tokenId".into(), topic_uint(log, 1)?);
            let mut data = data_tokens(log, &[ParamType::String, ParamType::String])?.into_iter();
            args.insert("key".into(), data.next().map(token_string).unwrap_or_default());
            args.insert("value".into(), data.next().map(token_string).unwrap_or_default());
        }
        EventType::ResetRecords => {
            args.insert("tokenId".into(), topic_uint(log, 1)?);
        }
        EventType::Resolve => {
            args.insert("tokenId".into(), topic_uint(log, 1)?);
            args.insert("to".into(), topic_address(log, 2)?);
        }
        EventType::Sync => {
            args.insert("resolver".into(), topic_address(log, 1)?);
            args.insert("updateId".into(), topic_uint(log, 2)?);
            args.insert("tokenId".into(), topic_uint(log, 3)?);
        }
        EventType::SetReverse => {
            args.insert("addr".into(), topic_address(log, 1)?);
            args.insert("tokenId".into(), topic_uint(log, 2)?);
        }
        EventType::RemoveReverse => {
            args.insert("addr".into(), topic_address(log, 1)?);
        }
        EventType::NewDomain | EventType::Configured => return Ok(None),
    }

    let block_number = log
        .block_number
        .ok_or_else(|| {
            ChainError::InvalidResponse("Provider returns log without block_number".into())
        })?
        .as_u64();
    let log_index = log
        .log_index
        .ok_or_else(|| {
            ChainError::InvalidResponse("Provider returns log without log_index".into())
        })?
        .as_u32();

    Ok(Some(DecodedEvent {
        block_number,
        block_hash: log.block_hash.map(|h| format!("{h:?}")),
        log_index,
        transaction_hash: log.transaction_hash.map(|h| format!("{h:?}")),
        contract_address: format!("{:?}", log.address),
        event_name: event_type.to_string(),
        args,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, U64};

    fn address_topic(address: Address) -> H256 {
        H256::from(address)
    }

    fn base_log(topics: Vec<H256>, data: Vec<u8>) -> Log {
        Log {
            address: Address::repeat_byte(0x11),
            topics,
            data: Bytes::from(data),
            block_number: Some(U64::from(42)),
            block_hash: Some(H256::repeat_byte(0xaa)),
            transaction_hash: Some(H256::repeat_byte(0xbb)),
            log_index: Some(U256::from(3)),
            ..Default::default()
        }
    }

    #[test]
    fn test_event_topics_are_full_signature_hashes() {
        let transfer = event_topics()
            .iter()
            .find(|(_, event_type)| *event_type == EventType::Transfer)
            .map(|(topic, _)| *topic)
            .unwrap();
        assert_eq!(
            transfer,
            H256::from_str("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
                .unwrap()
        );
        assert_eq!(event_topics().len(), EVENT_SIGNATURES.len());
    }

    #[test]
    fn test_decode_transfer() {
        let from = Address::zero();
        let to = Address::repeat_byte(0x22);
        let log = base_log(
            vec![
                event_topic("Transfer(address,address,uint256)"),
                address_topic(from),
                address_topic(to),
                H256::from_low_u64_be(7),
            ],
            vec![],
        );

        let event = decode_log(&log).unwrap().unwrap();

        assert_eq!(event.event_name, "Transfer");
        assert_eq!(event.block_number, 42);
        assert_eq!(event.log_index, 3);
        assert_eq!(event.args["from"], crate::types::NULL_ADDRESS);
        assert_eq!(event.args["to"], format!("{to:?}"));
        assert_eq!(event.args["tokenId"], "7");
    }

    #[test]
    fn test_decode_set_reads_key_and_value_from_data() {
        let data = abi::encode(&[
            Token::String("crypto.ETH.address".into()),
            Token::String("0xabc".into()),
        ]);
        let log = base_log(
            vec![
                event_topic("Set(uint256,string,string,string,string)"),
                H256::from_low_u64_be(7),
                H256::repeat_byte(1),
                H256::repeat_byte(2),
            ],
            data,
        );

        let event = decode_log(&log).unwrap().unwrap();

        assert_eq!(event.event_name, "Set");
        assert_eq!(event.args["key"], "crypto.ETH.address");
        assert_eq!(event.args["value"], "0xabc");
    }

    #[test]
    fn test_unknown_topic_is_skipped() {
        let log = base_log(vec![event_topic("Paused(address)")], vec![]);
        assert!(decode_log(&log).unwrap().is_none());
    }

    #[test]
    fn test_truncated_log_is_rejected() {
        let log = base_log(vec![event_topic("Transfer(address,address,uint256)")], vec![]);
        assert!(matches!(
            decode_log(&log),
            Err(ChainError::InvalidResponse(_))
        ));
    }
}
