// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use diesel::{Identifiable, Insertable, Queryable, Selectable};
use serde_json::Value;

use crate::schema::{
    domains, domains_resolution, domains_reverse_resolution, registry_events, worker_status,
    zns_transactions,
};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = domains)]
pub struct DomainRow {
    pub id: i64,
    pub name: Option<String>,
    pub node: String,
    pub parent_id: Option<i64>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = domains)]
pub struct NewDomain<'a> {
    pub name: Option<&'a str>,
    pub node: &'a str,
    pub parent_id: Option<i64>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = domains_resolution)]
pub struct ResolutionRow {
    pub id: i64,
    pub domain_id: i64,
    pub blockchain: String,
    pub network_id: i32,
    pub owner_address: Option<String>,
    pub resolver: Option<String>,
    pub registry: Option<String>,
    pub resolution: Value,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = domains_resolution)]
pub struct NewResolution<'a> {
    pub domain_id: i64,
    pub blockchain: &'a str,
    pub network_id: i32,
    pub owner_address: Option<&'a str>,
    pub resolver: Option<&'a str>,
    pub registry: Option<&'a str>,
    pub resolution: Value,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = domains_reverse_resolution)]
pub struct ReverseResolutionRow {
    pub id: i64,
    pub domain_id: i64,
    pub blockchain: String,
    pub network_id: i32,
    pub reverse_address: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = domains_reverse_resolution)]
pub struct NewReverseResolution<'a> {
    pub domain_id: i64,
    pub blockchain: &'a str,
    pub network_id: i32,
    pub reverse_address: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = registry_events)]
pub struct RegistryEventRow {
    pub id: i64,
    pub event_type: String,
    pub blockchain: String,
    pub network_id: i32,
    pub block_number: i64,
    pub block_hash: Option<String>,
    pub log_index: Option<i32>,
    pub transaction_hash: Option<String>,
    pub contract_address: String,
    pub node: Option<String>,
    pub return_values: Value,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = registry_events)]
pub struct NewRegistryEvent {
    pub event_type: String,
    pub blockchain: String,
    pub network_id: i32,
    pub block_number: i64,
    pub block_hash: Option<String>,
    pub log_index: Option<i32>,
    pub transaction_hash: Option<String>,
    pub contract_address: String,
    pub node: Option<String>,
    pub return_values: Value,
}

/// A Zilliqa transaction together with the registry events it emitted. `events` holds the
/// decoded event list as a JSON array.
#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = zns_transactions)]
pub struct ZnsTransactionRow {
    pub id: i64,
    pub atxuid: i64,
    pub hash: String,
    pub block_number: i64,
    pub events: Value,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = zns_transactions)]
pub struct NewZnsTransaction {
    pub atxuid: i64,
    pub hash: String,
    pub block_number: i64,
    pub events: Value,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = worker_status)]
pub struct WorkerStatusRow {
    pub id: i32,
    pub location: String,
    pub last_mirrored_block_number: i64,
    pub last_mirrored_block_hash: Option<String>,
    pub last_atxuid: Option<i64>,
    pub last_resync_block: Option<i64>,
}
