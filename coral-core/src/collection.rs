//! Collection definitions.
//!
//! A collection is identified by (database id, collection id, globally unique
//! id) and carries a type, a lifecycle status, sharding and replication
//! settings. Satellite collections are fully replicated everywhere and encode
//! that as `replicationFactor == 0`.

use crate::{CollectionId, CoralError, CoralResult, DatabaseId, KeyOptions};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ENUMS
// ============================================================================

/// Collection type discriminator. The numeric values are part of the wire
/// format of the collection API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CollectionType {
    Document = 2,
    Edge = 3,
}

impl CollectionType {
    pub fn from_number(n: u64) -> Self {
        if n == CollectionType::Edge as u64 {
            CollectionType::Edge
        } else {
            CollectionType::Document
        }
    }
}

impl Default for CollectionType {
    fn default() -> Self {
        CollectionType::Document
    }
}

/// Lifecycle status of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Deleted,
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectionStatus::Unloaded => "unloaded",
            CollectionStatus::Loading => "loading",
            CollectionStatus::Loaded => "loaded",
            CollectionStatus::Unloading => "unloading",
            CollectionStatus::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// COLLECTION DEFINITION
// ============================================================================

/// The persisted definition of a logical collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub id: CollectionId,
    pub database_id: DatabaseId,
    /// Cluster-wide unique id, stable across renames.
    pub globally_unique_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub collection_type: CollectionType,
    pub status: CollectionStatus,
    pub is_system: bool,
    pub wait_for_sync: bool,
    pub cache_enabled: bool,
    pub key_options: KeyOptions,

    // --- sharding ---
    pub shard_keys: Vec<String>,
    pub number_of_shards: u32,
    /// 0 encodes a satellite collection.
    pub replication_factor: u32,
    /// Minimum number of in-sync replicas (leader included) required to
    /// acknowledge a write.
    pub write_concern: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribute_shards_like: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharding_strategy: Option<String>,

    // --- smart graphs ---
    pub is_smart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_graph_attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_join_attribute: Option<String>,
}

impl CollectionDefinition {
    /// A plain single-shard document collection with defaults.
    pub fn document(name: impl Into<String>) -> Self {
        Self {
            id: CollectionId::new(crate::next_tick()),
            database_id: DatabaseId::new(1),
            globally_unique_id: format!("c{}", crate::next_tick()),
            name: name.into(),
            collection_type: CollectionType::Document,
            status: CollectionStatus::Loaded,
            is_system: false,
            wait_for_sync: false,
            cache_enabled: false,
            key_options: KeyOptions::default(),
            shard_keys: vec![crate::KEY_STRING.to_string()],
            number_of_shards: 1,
            replication_factor: 1,
            write_concern: 1,
            distribute_shards_like: None,
            sharding_strategy: None,
            is_smart: false,
            smart_graph_attribute: None,
            smart_join_attribute: None,
        }
    }

    /// Same, but with edge type.
    pub fn edge(name: impl Into<String>) -> Self {
        Self {
            collection_type: CollectionType::Edge,
            ..Self::document(name)
        }
    }

    pub fn is_edge(&self) -> bool {
        self.collection_type == CollectionType::Edge
    }

    /// Satellite collections carry replication factor 0.
    pub fn is_satellite(&self) -> bool {
        self.replication_factor == 0
    }

    /// Validate the replication invariants.
    pub fn validate(&self) -> CoralResult<()> {
        if self.name.is_empty() {
            return Err(CoralError::bad_parameter("collection name must not be empty"));
        }
        if self.number_of_shards == 0 {
            return Err(CoralError::bad_parameter("numberOfShards must be at least 1"));
        }
        if self.is_satellite() {
            if self.write_concern != 0 {
                return Err(CoralError::bad_parameter(
                    "satellite collections must use writeConcern 0",
                ));
            }
        } else if self.write_concern > self.replication_factor {
            return Err(CoralError::bad_parameter(
                "writeConcern must not exceed replicationFactor",
            ));
        }
        if self.shard_keys.is_empty() {
            return Err(CoralError::bad_parameter("shardKeys must not be empty"));
        }
        Ok(())
    }

    /// Whether `update` changes an option that is immutable after creation.
    pub fn immutable_options_changed(&self, update: &CollectionDefinition) -> bool {
        self.collection_type != update.collection_type
            || self.key_options != update.key_options
            || self.shard_keys != update.shard_keys
            || self.number_of_shards != update.number_of_shards
            || self.distribute_shards_like != update.distribute_shards_like
            || self.is_smart != update.is_smart
            || self.smart_graph_attribute != update.smart_graph_attribute
            || self.smart_join_attribute != update.smart_join_attribute
    }
}
