// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain model shared by the strategies, the repository and the worker.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum_macros::{AsRefStr, Display, EnumString};

/// Owner of a token that is not owned on a chain, also the reset state of a resolution.
pub const NULL_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub type Records = BTreeMap<String, String>;

#[allow(clippy::upper_case_acronyms)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[strum(ascii_case_insensitive)]
pub enum Blockchain {
    ETH,
    MATIC,
    ZIL,
}

impl Blockchain {
    pub fn is_evm(&self) -> bool {
        matches!(self, Blockchain::ETH | Blockchain::MATIC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: Option<String>,
}

impl Block {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: Some(hash.into()),
        }
    }

    pub fn without_hash(number: u64) -> Self {
        Self { number, hash: None }
    }
}

/// A domain row. `name` is `None` for placeholder rows created before the naming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub node: String,
    pub name: Option<String>,
    pub parent_node: Option<String>,
}

impl Domain {
    pub fn named(node: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            name: Some(name.into()),
            parent_node: None,
        }
    }

    pub fn placeholder(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            name: None,
            parent_node: None,
        }
    }

    /// Name of the parent domain: everything after the first label.
    pub fn parent_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|name| name.split_once('.'))
            .map(|(_, parent)| parent)
            .filter(|parent| !parent.is_empty())
    }
}

/// Per-chain ownership and record snapshot of a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub node: String,
    pub blockchain: Blockchain,
    pub network_id: i32,
    pub owner_address: Option<String>,
    pub resolver: Option<String>,
    pub registry: Option<String>,
    pub records: Records,
}

impl Resolution {
    pub fn empty(node: impl Into<String>, blockchain: Blockchain, network_id: i32) -> Self {
        Self {
            node: node.into(),
            blockchain,
            network_id,
            owner_address: Some(NULL_ADDRESS.to_string()),
            resolver: None,
            registry: None,
            records: Records::new(),
        }
    }

    /// Applies `update` in place and reports whether anything changed.
    pub fn apply(&mut self, update: &ResolutionUpdate) -> bool {
        let before = self.clone();
        update.owner.apply_to(&mut self.owner_address);
        update.resolver.apply_to(&mut self.resolver);
        update.registry.apply_to(&mut self.registry);
        match &update.records {
            RecordsUpdate::Unchanged => {}
            RecordsUpdate::Merge(records) => {
                for (key, value) in records {
                    self.records.insert(key.clone(), value.clone());
                }
            }
            RecordsUpdate::Replace(records) => self.records = records.clone(),
        }
        *self != before
    }
}

/// Field-level update. `Keep` leaves the stored value alone, `Clear` nulls it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> Patch<T> {
    fn apply_to(&self, target: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Set(value) => *target = Some(value.clone()),
            Patch::Clear => *target = None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordsUpdate {
    #[default]
    Unchanged,
    Merge(Records),
    Replace(Records),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionUpdate {
    pub node: String,
    pub owner: Patch<String>,
    pub resolver: Patch<String>,
    pub registry: Patch<String>,
    pub records: RecordsUpdate,
}

impl ResolutionUpdate {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            owner: Patch::Keep,
            resolver: Patch::Keep,
            registry: Patch::Keep,
            records: RecordsUpdate::Unchanged,
        }
    }

    /// Reset to the "not owned on this chain" state.
    pub fn burn(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            owner: Patch::Set(NULL_ADDRESS.to_string()),
            resolver: Patch::Clear,
            registry: Patch::Clear,
            records: RecordsUpdate::Replace(Records::new()),
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Patch::Set(owner.into());
        self
    }

    pub fn resolver(mut self, resolver: Patch<String>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Patch::Set(registry.into());
        self
    }

    pub fn records(mut self, records: RecordsUpdate) -> Self {
        self.records = records;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseResolution {
    pub node: String,
    pub blockchain: Blockchain,
    pub network_id: i32,
    pub reverse_address: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
pub enum EventType {
    Transfer,
    Approval,
    ApprovalForAll,
    NewURI,
    NewKey,
    Set,
    ResetRecords,
    Resolve,
    Sync,
    SetReverse,
    RemoveReverse,
    NewDomain,
    Configured,
}

/// One decoded registry event as stored in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub event_type: EventType,
    pub blockchain: Blockchain,
    pub network_id: i32,
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub log_index: Option<u32>,
    pub transaction_hash: Option<String>,
    pub contract_address: String,
    pub node: Option<String>,
    pub return_values: BTreeMap<String, String>,
    /// Zilliqa transaction cursor. Always `None` on EVM chains.
    pub atxuid: Option<u64>,
}

impl RegistryEvent {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.return_values.get(key).map(String::as_str)
    }

    /// Sort key of the event within its chain log.
    pub fn position(&self) -> (u64, u64, u32) {
        (
            self.atxuid.unwrap_or(0),
            self.block_number,
            self.log_index.unwrap_or(0),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub location: String,
    pub last_mirrored_block_number: u64,
    pub last_mirrored_block_hash: Option<String>,
    pub last_atxuid: Option<u64>,
    /// Configured resync target that was already applied.
    pub last_resync_block: Option<u64>,
}

impl WorkerStatus {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            last_mirrored_block_number: 0,
            last_mirrored_block_hash: None,
            last_atxuid: None,
            last_resync_block: None,
        }
    }
}

/// Result of deleting the tail of an event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub deleted: usize,
    pub affected_nodes: BTreeSet<String>,
    /// Highest atxuid left in the Zilliqa log after the cleanup.
    pub remaining_atxuid: Option<u64>,
}

/// Block range of one slice. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRange {
    pub from_block: u64,
    pub to_block: u64,
    pub after_atxuid: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub processed: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for ProcessSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.skipped += other.skipped;
    }
}

/// Outcome of one worker iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub from_block: u64,
    pub to_block: u64,
    pub slices: usize,
    pub events: usize,
    pub processed: ProcessSummary,
    pub rewound_to: Option<u64>,
    pub rebuilt_domains: usize,
}
