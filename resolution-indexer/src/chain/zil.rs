// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bech32::FromBase32;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{ChainError, ChainResult, ZilChainClient, ZilEvent, ZilTransaction};
use crate::types::Records;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Zilliqa client: chain state through the JSON-RPC node, registry transactions through a
/// ViewBlock-style indexer API.
pub struct ViewBlockZilClient {
    http: reqwest::Client,
    rpc_url: String,
    api_url: String,
    api_key: Option<String>,
    network: String,
    registry: String,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewBlockTransaction {
    hash: String,
    block_height: u64,
    atxuid: u64,
    #[serde(default)]
    events: Vec<ViewBlockEvent>,
}

#[derive(Deserialize)]
struct ViewBlockEvent {
    address: String,
    name: String,
    #[serde(default)]
    params: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct RecordsSubState {
    #[serde(default)]
    records: BTreeMap<String, String>,
}

impl ViewBlockZilClient {
    pub fn new(
        rpc_url: impl Into<String>,
        api_url: impl Into<String>,
        api_key: Option<String>,
        network: impl Into<String>,
        registry: impl Into<String>,
    ) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(Self {
            http,
            rpc_url: rpc_url.into(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key,
            network: network.into(),
            registry: registry.into(),
        })
    }

    async fn rpc<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Value,
    ) -> ChainResult<Option<T>> {
        let response: JsonRpcResponse<T> = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "id": "1",
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(format!("{method}: {e}")))?;
        if let Some(error) = response.error {
            return Err(ChainError::Rpc(format!("{method}: {}", error.message)));
        }
        Ok(response.result)
    }
}

#[async_trait]
impl ZilChainClient for ViewBlockZilClient {
    async fn get_latest_block(&self) -> ChainResult<u64> {
        let count: String = self
            .rpc("GetNumTxBlocks", json!([""]))
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("GetNumTxBlocks: empty result".into()))?;
        let count: u64 = count
            .parse()
            .map_err(|e| ChainError::InvalidResponse(format!("GetNumTxBlocks: {e}")))?;
        Ok(count.saturating_sub(1))
    }

    async fn get_transactions(
        &self,
        atxuid_from: u64,
        atxuid_to: u64,
    ) -> ChainResult<Vec<ZilTransaction>> {
        let url = format!("{}/v1/zilliqa/addresses/{}/txs", self.api_url, self.registry);
        let mut request = self.http.get(&url).query(&[
            ("network", self.network.clone()),
            ("events", "true".to_string()),
            ("atxuidFrom", atxuid_from.to_string()),
            ("atxuidTo", atxuid_to.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("X-APIKEY", key);
        }
        let transactions: Vec<ViewBlockTransaction> = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(format!("transactions: {e}")))?;

        let mut transactions: Vec<ZilTransaction> = transactions
            .into_iter()
            .map(|tx| ZilTransaction {
                atxuid: tx.atxuid,
                hash: tx.hash,
                block_number: tx.block_height,
                events: tx
                    .events
                    .into_iter()
                    .map(|event| ZilEvent {
                        name: event.name,
                        contract_address: normalize_zil_address(&event.address)
                            .unwrap_or(event.address),
                        params: event
                            .params
                            .into_iter()
                            .map(|(k, v)| (k, param_string(v)))
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        transactions.sort_by_key(|tx| tx.atxuid);
        Ok(transactions)
    }

    async fn resolver_records(&self, resolver: &str) -> ChainResult<Records> {
        let address = normalize_zil_address(resolver)?;
        let state: Option<RecordsSubState> = self
            .rpc(
                "GetSmartContractSubState",
                json!([address.trim_start_matches("0x"), "records", []]),
            )
            .await?;
        Ok(state.map(|s| s.records).unwrap_or_default())
    }
}

fn param_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Converts a bech32 (`zil1...`) or hex address into lowercase `0x` hex.
pub fn normalize_zil_address(address: &str) -> ChainResult<String> {
    if address.starts_with("zil1") {
        let (hrp, data, _) =
            bech32::decode(address).map_err(|_| ChainError::InvalidAddress(address.into()))?;
        if hrp != "zil" {
            return Err(ChainError::InvalidAddress(address.into()));
        }
        let bytes = Vec::<u8>::from_base32(&data)
            .map_err(|_| ChainError::InvalidAddress(address.into()))?;
        if bytes.len() != 20 {
            return Err(ChainError::InvalidAddress(address.into()));
        }
        return Ok(format!("0x{}", hex::encode(bytes)));
    }

    let raw = address.strip_prefix("0x").unwrap_or(address);
    if raw.len() != 40 || hex::decode(raw).is_err() {
        return Err(ChainError::InvalidAddress(address.into()));
    }
    Ok(format!("0x{}", raw.to_lowercase()))
}
