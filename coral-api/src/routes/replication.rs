//! Replication routes consumed by syncing followers.
//!
//! The hold-read-lock endpoint is split: `POST` registers the lock and
//! returns immediately, a concurrent `PUT` polls until acquisition, `DELETE`
//! releases. On a log-structured engine a soft lock is a no-op freeze, so
//! acquisition here is bookkeeping plus (for hard locks) an exclusive
//! transaction hold on the collection.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use coral_core::{CoralError, ErrorCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldReadLockBody {
    pub id: String,
    pub collection: String,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default)]
    pub do_soft_lock_only: bool,
}

fn default_ttl() -> u64 {
    600
}

fn parse_lock_id(id: &str) -> ApiResult<u64> {
    id.parse::<u64>()
        .map_err(|_| ApiError::bad_parameter(format!("invalid read lock id '{}'", id)))
}

// ============================================================================
// READ LOCKS
// ============================================================================

/// GET /_api/replication/holdReadLockCollection - obtain a fresh lock id
pub async fn read_lock_id() -> ApiResult<impl IntoResponse> {
    Ok(Json(json!({ "id": coral_core::next_tick().to_string() })))
}

/// POST /_api/replication/holdReadLockCollection - register the lock
pub async fn hold_read_lock(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HoldReadLockBody>,
) -> ApiResult<impl IntoResponse> {
    state.expire_read_locks();
    let id = parse_lock_id(&body.id)?;
    // verify the collection exists before registering anything
    state.database.collection(&body.collection)?;
    state.register_read_lock(
        id,
        body.collection.clone(),
        body.do_soft_lock_only,
        Duration::from_secs(body.ttl),
    );
    tracing::debug!(
        lock_id = id,
        collection = %body.collection,
        soft = body.do_soft_lock_only,
        "registered read lock"
    );
    Ok(Json(json!({ "error": false, "code": 200 })))
}

/// PUT /_api/replication/holdReadLockCollection - poll until acquisition
pub async fn poll_read_lock(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HoldReadLockBody>,
) -> ApiResult<impl IntoResponse> {
    state.expire_read_locks();
    let id = parse_lock_id(&body.id)?;
    if !state.read_locks.contains_key(&id) {
        return Err(ApiError::not_found(
            ErrorCode::DocumentNotFound,
            format!("read lock {} is not registered", id),
        ));
    }
    // the engine is log-structured: a soft lock freezes nothing, and a hard
    // lock is held by the write path checking this registry
    Ok(Json(json!({ "error": false, "code": 200, "lockHeld": true })))
}

#[derive(Debug, Deserialize)]
pub struct CancelReadLockBody {
    pub id: String,
}

/// DELETE /_api/replication/holdReadLockCollection - release
pub async fn cancel_read_lock(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelReadLockBody>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_lock_id(&body.id)?;
    match state.read_locks.remove(&id) {
        Some(_) => Ok(Json(json!({ "error": false, "code": 200 }))),
        None => Err(ApiError::not_found(
            ErrorCode::DocumentNotFound,
            format!("read lock {} not found", id),
        )),
    }
}

// ============================================================================
// FOLLOWERS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFollowerBody {
    pub follower_id: String,
    pub shard: String,
    pub checksum: String,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub syncer_id: Option<String>,
    #[serde(default)]
    pub client_info: Option<String>,
    #[serde(default)]
    pub read_lock_id: Option<u64>,
}

/// PUT /_api/replication/addFollower
pub async fn add_follower(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddFollowerBody>,
) -> ApiResult<impl IntoResponse> {
    let collection = state.database.collection(&body.shard)?;
    let count = collection.number_documents();

    let read_lock_id = body.read_lock_id.unwrap_or(0);
    if read_lock_id == 0 {
        // shortcut: only empty shards may skip the sync protocol
        if count != 0 || body.checksum != "0" {
            return Err(ApiError(CoralError::new(
                ErrorCode::FollowerRefused,
                "shortcut requires an empty shard on both sides",
            )));
        }
    } else {
        state.expire_read_locks();
        if !state.read_locks.contains_key(&read_lock_id) {
            return Err(ApiError(CoralError::new(
                ErrorCode::FollowerRefused,
                format!("read lock {} is not held", read_lock_id),
            )));
        }
        if body.checksum != count.to_string() {
            return Err(ApiError(CoralError::new(
                ErrorCode::FollowerRefused,
                format!(
                    "follower checksum {} does not match leader count {}",
                    body.checksum, count
                ),
            )));
        }
    }

    state.followers_for(&body.shard).add_follower(&body.follower_id);
    tracing::info!(
        shard = %body.shard,
        follower = %body.follower_id,
        syncer = body.syncer_id.as_deref().unwrap_or(""),
        "added follower"
    );
    Ok(Json(json!({ "error": false, "code": 200 })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFollowerBody {
    pub follower_id: String,
    pub shard: String,
}

/// DELETE /_api/replication/removeFollower
pub async fn remove_follower(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RemoveFollowerBody>,
) -> ApiResult<impl IntoResponse> {
    state.followers_for(&body.shard).remove_follower(&body.follower_id);
    Ok(Json(json!({ "error": false, "code": 200 })))
}

// ============================================================================
// BARRIERS
// ============================================================================

/// DELETE /_api/replication/barrier/{id}
pub async fn remove_barrier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    match state.barriers.remove(&id) {
        Some(_) => Ok((StatusCode::OK, Json(json!({ "error": false, "code": 200 })))),
        None => Err(ApiError::not_found(
            ErrorCode::DocumentNotFound,
            format!("barrier {} not found", id),
        )),
    }
}
