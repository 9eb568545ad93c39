// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain name hashing.
//!
//! EVM registries key domains by the EIP-137 namehash (keccak256), the Zilliqa
//! registry by the same recursion over sha256. Nodes are rendered as `0x` followed
//! by 64 lowercase hex characters.

use ethers::types::U256;
use ethers::utils::keccak256;
use sha2::{Digest, Sha256};

use crate::error::{IndexerError, IndexerResult};

pub const ROOT_NODE: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn namehash_with(name: &str, hash: fn(&[u8]) -> [u8; 32]) -> [u8; 32] {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return node;
    }
    for label in name.to_lowercase().rsplit('.') {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&node);
        buf[32..].copy_from_slice(&hash(label.as_bytes()));
        node = hash(&buf);
    }
    node
}

fn to_node(bytes: [u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn eip137_namehash(name: &str) -> String {
    to_node(namehash_with(name, |data| keccak256(data)))
}

pub fn zns_namehash(name: &str) -> String {
    to_node(namehash_with(name, sha256))
}

/// Node of `label` under `parent` in the Zilliqa registry: `sha256(parent ++ sha256(label))`.
pub fn zns_child_node(parent: &str, label: &str) -> IndexerResult<String> {
    let parent = node_bytes(parent)?;
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&parent);
    buf[32..].copy_from_slice(&sha256(label.to_lowercase().as_bytes()));
    Ok(to_node(sha256(&buf)))
}

/// `node` is a valid hash of `name` under at least one of the supported schemes.
pub fn is_valid_node(name: &str, node: &str) -> bool {
    let node = node.to_lowercase();
    eip137_namehash(name) == node || zns_namehash(name) == node
}

pub fn normalize_node(node: &str) -> IndexerResult<String> {
    node_bytes(node).map(to_node)
}

fn node_bytes(node: &str) -> IndexerResult<[u8; 32]> {
    let raw = node.strip_prefix("0x").unwrap_or(node);
    let decoded = hex::decode(raw)
        .map_err(|e| IndexerError::EventProcessing(format!("Invalid node {node}: {e}")))?;
    decoded
        .try_into()
        .map_err(|_| IndexerError::EventProcessing(format!("Node {node} is not 32 bytes long")))
}

/// Converts an ERC-721 token id (decimal) into its node.
pub fn token_id_to_node(token_id: &str) -> IndexerResult<String> {
    let value = U256::from_dec_str(token_id)
        .map_err(|e| IndexerError::EventProcessing(format!("Invalid token id {token_id}: {e}")))?;
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Ok(to_node(bytes))
}

pub fn node_to_token_id(node: &str) -> IndexerResult<U256> {
    Ok(U256::from_big_endian(&node_bytes(node)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip137_known_nodes() {
        assert_eq!(eip137_namehash(""), ROOT_NODE);
        assert_eq!(
            eip137_namehash("eth"),
            "0x93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
        assert_eq!(
            eip137_namehash("crypto"),
            "0x0f4a10a4f46c288cea365fcf45cccf0e9d901b945b9829ccdb54c10dc3cb7a6f"
        );
    }

    #[test]
    fn test_names_are_case_insensitive() {
        assert_eq!(eip137_namehash("Foo.Crypto"), eip137_namehash("foo.crypto"));
    }

    #[test]
    fn test_zns_child_matches_namehash() {
        let zil = zns_child_node(ROOT_NODE, "zil").unwrap();
        assert_eq!(zil, zns_namehash("zil"));

        let child = zns_child_node(&zil, "brad").unwrap();
        assert_eq!(child, zns_namehash("brad.zil"));
        assert_ne!(child, eip137_namehash("brad.zil"));
    }

    #[test]
    fn test_is_valid_node_accepts_either_scheme() {
        assert!(is_valid_node("brad.zil", &zns_namehash("brad.zil")));
        assert!(is_valid_node("brad.crypto", &eip137_namehash("brad.crypto")));
        assert!(is_valid_node(
            "brad.crypto",
            &eip137_namehash("brad.crypto").to_uppercase().replace("0X", "0x")
        ));
        assert!(!is_valid_node("brad.crypto", &eip137_namehash("other.crypto")));
    }

    #[test]
    fn test_token_id_round_trip() {
        let node = eip137_namehash("crypto");
        let token_id = node_to_token_id(&node).unwrap();
        assert_eq!(token_id_to_node(&token_id.to_string()).unwrap(), node);
        assert_eq!(token_id_to_node("1").unwrap(), format!("0x{:0>64}", "1"));
    }

    #[test]
    fn test_invalid_inputs_are_event_errors() {
        assert!(matches!(
            token_id_to_node("not-a-number"),
            Err(IndexerError::EventProcessing(_))
        ));
        assert!(matches!(
            zns_child_node("0x1234", "zil"),
            Err(IndexerError::EventProcessing(_))
        ));
    }
}
