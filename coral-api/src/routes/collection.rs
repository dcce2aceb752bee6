//! Collection management routes.
//!
//! `GET/POST/PUT/DELETE /_api/collection...` -- creation options pass
//! through an allow-list; anything else in the request body is silently
//! dropped.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use coral_core::{CollectionDefinition, CollectionType, CoralError, KeyOptions};
use coral_txn::TransactionHints;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Creation options recognized in the request body; everything else is
/// silently dropped.
const CREATE_OPTION_ALLOW_LIST: [&str; 20] = [
    "doCompact",
    "isSystem",
    "id",
    "isVolatile",
    "journalSize",
    "indexBuckets",
    "keyOptions",
    "waitForSync",
    "cacheEnabled",
    "shardKeys",
    "numberOfShards",
    "distributeShardsLike",
    "avoidServers",
    "isSmart",
    "shardingStrategy",
    "smartGraphAttribute",
    "smartJoinAttribute",
    "replicationFactor",
    "minReplicationFactor",
    "servers",
];

fn filter_create_options(body: &Map<String, Value>) -> Map<String, Value> {
    body.iter()
        .filter(|(key, _)| CREATE_OPTION_ALLOW_LIST.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn collection_info(collection: &coral_storage::PhysicalCollection) -> Value {
    let def = collection.definition();
    json!({
        "id": def.id.to_string(),
        "name": def.name,
        "status": def.status,
        "type": def.collection_type as u8,
        "isSystem": def.is_system,
        "globallyUniqueId": def.globally_unique_id,
    })
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /_api/collection - list all collections
pub async fn list_collections(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let result: Vec<Value> = state
        .database
        .collections()
        .iter()
        .map(|c| collection_info(c))
        .collect();
    Ok(Json(json!({ "error": false, "code": 200, "result": result })))
}

/// GET /_api/collection/{name}
pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let collection = state.database.collection(&name)?;
    Ok(Json(collection_info(&collection)))
}

/// GET /_api/collection/{name}/{sub} with sub in
/// {checksum, figures, count, properties, revision, shards}
pub async fn get_collection_sub(
    State(state): State<Arc<AppState>>,
    Path((name, sub)): Path<(String, String)>,
    Query(params): Query<ChecksumParams>,
) -> ApiResult<impl IntoResponse> {
    let collection = state.database.collection(&name)?;
    let mut info = collection_info(&collection);
    let extra = match sub.as_str() {
        "count" => json!({ "count": collection.number_documents() }),
        "figures" => json!({
            "count": collection.number_documents(),
            "figures": collection.figures(),
        }),
        "revision" => json!({ "revision": collection.revision().to_string() }),
        "properties" => serde_json::to_value(collection.definition())
            .map_err(|e| ApiError(CoralError::internal(e.to_string())))?,
        "checksum" => {
            let trx = collection.begin_transaction(TransactionHints::empty());
            let checksum = collection.checksum(
                &trx,
                params.with_revisions.unwrap_or(false),
                params.with_data.unwrap_or(false),
            )?;
            json!({ "checksum": checksum, "revision": collection.revision().to_string() })
        }
        "shards" => {
            let def = collection.definition();
            json!({
                "shards": [def.name],
                "numberOfShards": def.number_of_shards,
                "shardKeys": def.shard_keys,
            })
        }
        _ => {
            return Err(ApiError::bad_parameter(format!(
                "unknown collection sub-resource '{}'",
                sub
            )))
        }
    };
    merge_into(&mut info, extra);
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
pub struct ChecksumParams {
    #[serde(rename = "withRevisions")]
    pub with_revisions: Option<bool>,
    #[serde(rename = "withData")]
    pub with_data: Option<bool>,
}

/// POST /_api/collection - create a collection
pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let map = body
        .as_object()
        .ok_or_else(|| ApiError::bad_parameter("expecting a JSON object body"))?;
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::bad_parameter("'name' must be a non-empty string"))?;

    let collection_type = match map.get("type") {
        Some(Value::String(s)) if s == "edge" || s == "3" => CollectionType::Edge,
        Some(Value::Number(n)) => CollectionType::from_number(n.as_u64().unwrap_or(2)),
        _ => CollectionType::Document,
    };

    // a allow-listed subset of the body configures the collection
    let options = filter_create_options(map);
    let mut definition = match collection_type {
        CollectionType::Edge => CollectionDefinition::edge(name),
        CollectionType::Document => CollectionDefinition::document(name),
    };
    apply_create_options(&mut definition, &options)?;

    let collection = state.database.create_collection(definition)?;
    Ok((StatusCode::OK, Json(collection_info(&collection))))
}

fn apply_create_options(
    definition: &mut CollectionDefinition,
    options: &Map<String, Value>,
) -> ApiResult<()> {
    if let Some(v) = options.get("isSystem").and_then(Value::as_bool) {
        definition.is_system = v;
    }
    if let Some(v) = options.get("waitForSync").and_then(Value::as_bool) {
        definition.wait_for_sync = v;
    }
    if let Some(v) = options.get("cacheEnabled").and_then(Value::as_bool) {
        definition.cache_enabled = v;
    }
    if let Some(v) = options.get("id").and_then(Value::as_str) {
        if let Ok(id) = v.parse::<u64>() {
            definition.id = coral_core::CollectionId::new(id);
        }
    }
    if let Some(v) = options.get("keyOptions") {
        definition.key_options = serde_json::from_value::<KeyOptions>(v.clone())
            .map_err(|e| ApiError::bad_parameter(format!("invalid keyOptions: {}", e)))?;
    }
    if let Some(v) = options.get("shardKeys").and_then(Value::as_array) {
        definition.shard_keys = v
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = options.get("numberOfShards").and_then(Value::as_u64) {
        definition.number_of_shards = v as u32;
    }
    if let Some(v) = options.get("replicationFactor") {
        // "satellite" encodes replication factor 0
        definition.replication_factor = match v {
            Value::String(s) if s == "satellite" => 0,
            Value::Number(n) => n.as_u64().unwrap_or(1) as u32,
            _ => definition.replication_factor,
        };
        if definition.is_satellite() {
            definition.write_concern = 0;
        }
    }
    if let Some(v) = options.get("minReplicationFactor").and_then(Value::as_u64) {
        definition.write_concern = v as u32;
    }
    if let Some(v) = options.get("distributeShardsLike").and_then(Value::as_str) {
        definition.distribute_shards_like = Some(v.to_string());
    }
    if let Some(v) = options.get("shardingStrategy").and_then(Value::as_str) {
        definition.sharding_strategy = Some(v.to_string());
    }
    if let Some(v) = options.get("isSmart").and_then(Value::as_bool) {
        definition.is_smart = v;
    }
    if let Some(v) = options.get("smartGraphAttribute").and_then(Value::as_str) {
        definition.smart_graph_attribute = Some(v.to_string());
    }
    if let Some(v) = options.get("smartJoinAttribute").and_then(Value::as_str) {
        definition.smart_join_attribute = Some(v.to_string());
    }
    definition.validate().map_err(ApiError::from)?;
    Ok(())
}

/// PUT /_api/collection/{name}/{action}
pub async fn collection_action(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> ApiResult<impl IntoResponse> {
    let collection = state.database.collection(&name)?;
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    match action.as_str() {
        "load" => {
            collection.load();
            Ok(Json(collection_info(&collection)))
        }
        "unload" => {
            collection.unload();
            Ok(Json(collection_info(&collection)))
        }
        "truncate" => {
            let mut trx = collection.begin_transaction(
                TransactionHints::EXCLUSIVE | TransactionHints::ALLOW_RANGE_DELETE,
            );
            collection.truncate(&mut trx, &Default::default())?;
            trx.commit()?;
            Ok(Json(collection_info(&collection)))
        }
        "properties" => {
            let updated = collection.update_properties(&body)?;
            let value = serde_json::to_value(updated)
                .map_err(|e| ApiError(CoralError::internal(e.to_string())))?;
            Ok(Json(value))
        }
        "rename" => {
            let new_name = body
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::bad_parameter("'name' must be a string"))?;
            state.database.rename_collection(&name, new_name)?;
            let collection = state.database.collection(new_name)?;
            Ok(Json(collection_info(&collection)))
        }
        "compact" => {
            // compaction is handled by the engine's background threads; the
            // endpoint acknowledges the request
            Ok(Json(collection_info(&collection)))
        }
        "responsibleShard" => {
            let def = collection.definition();
            Ok(Json(json!({ "shardId": def.name })))
        }
        "loadIndexesIntoMemory" => Ok(Json(json!({ "result": true }))),
        _ => Err(ApiError::bad_parameter(format!(
            "unknown collection action '{}'",
            action
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct DropParams {
    #[serde(rename = "isSystem")]
    pub is_system: Option<bool>,
}

/// DELETE /_api/collection/{name}
pub async fn drop_collection(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<DropParams>,
) -> ApiResult<impl IntoResponse> {
    let collection = state.database.collection(&name)?;
    let id = collection.definition().id;
    state
        .database
        .drop_collection(&name, params.is_system.unwrap_or(false))?;
    Ok(Json(json!({ "error": false, "code": 200, "id": id.to_string() })))
}

fn merge_into(target: &mut Value, extra: Value) {
    if let (Some(target), Some(extra)) = (target.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_filters_unknown_options() {
        let body: Map<String, Value> = serde_json::from_value(json!({
            "waitForSync": true,
            "numberOfShards": 3,
            "evilOption": "dropped",
            "name": "dropped-too",
        }))
        .expect("map");
        let filtered = filter_create_options(&body);
        assert!(filtered.contains_key("waitForSync"));
        assert!(filtered.contains_key("numberOfShards"));
        assert!(!filtered.contains_key("evilOption"));
        assert!(!filtered.contains_key("name"), "name is handled separately");
    }

    #[test]
    fn test_apply_create_options() {
        let mut definition = CollectionDefinition::document("users");
        let options: Map<String, Value> = serde_json::from_value(json!({
            "waitForSync": true,
            "numberOfShards": 4,
            "replicationFactor": 3,
            "minReplicationFactor": 2,
            "shardKeys": ["region"],
        }))
        .expect("map");
        apply_create_options(&mut definition, &options).expect("apply");
        assert!(definition.wait_for_sync);
        assert_eq!(definition.number_of_shards, 4);
        assert_eq!(definition.replication_factor, 3);
        assert_eq!(definition.write_concern, 2);
        assert_eq!(definition.shard_keys, vec!["region".to_string()]);
    }

    #[test]
    fn test_satellite_replication_factor() {
        let mut definition = CollectionDefinition::document("sat");
        let options: Map<String, Value> =
            serde_json::from_value(json!({ "replicationFactor": "satellite" })).expect("map");
        apply_create_options(&mut definition, &options).expect("apply");
        assert!(definition.is_satellite());
        assert_eq!(definition.write_concern, 0);
    }

    #[test]
    fn test_invalid_write_concern_rejected() {
        let mut definition = CollectionDefinition::document("users");
        let options: Map<String, Value> = serde_json::from_value(json!({
            "replicationFactor": 2,
            "minReplicationFactor": 5,
        }))
        .expect("map");
        assert!(apply_create_options(&mut definition, &options).is_err());
    }
}
