//! Replication client against the shard leader.
//!
//! The [`LeaderClient`] trait is the seam between the synchronize-shard
//! action and the leader's replication REST surface; the HTTP implementation
//! maps onto `/_api/replication/*`. Tests substitute an in-process mock.

use async_trait::async_trait;
use coral_core::{CoralError, CoralResult, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

// ============================================================================
// PAYLOADS
// ============================================================================

/// Result of an initial incremental dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpResult {
    /// WAL barrier preventing log pruning while the sync is in flight.
    pub barrier_id: i64,
    /// Tick up to which the dump is complete; tailing continues from here.
    pub last_tick: u64,
    pub documents: Vec<Value>,
}

/// Result of tailing the leader's WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailResult {
    pub tick_reached: u64,
    /// The leader could not ship everything within the budget; another round
    /// is needed.
    pub did_timeout: bool,
    pub operations: Vec<Value>,
}

/// Body of `PUT /_api/replication/addFollower`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFollowerRequest {
    pub follower_id: String,
    pub shard: String,
    /// Document count, stringified; the leader verifies equality.
    pub checksum: String,
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syncer_id: Option<String>,
    /// 0 requests the zero-document shortcut.
    #[serde(default)]
    pub read_lock_id: u64,
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

#[async_trait]
pub trait LeaderClient: Send + Sync {
    /// Leader-side document count of the shard.
    async fn document_count(&self) -> CoralResult<u64>;

    /// Start an incremental dump; the result carries a WAL barrier.
    async fn start_dump(&self) -> CoralResult<DumpResult>;

    /// Tail WAL entries from `from_tick` within the budget.
    async fn tail_wal(&self, from_tick: u64, budget: Duration) -> CoralResult<TailResult>;

    /// Obtain a fresh read-lock job id from the leader.
    async fn read_lock_id(&self) -> CoralResult<u64>;

    /// Acquire the read lock (soft = no-op freeze on log-structured engines,
    /// hard = true write freeze), polling until held.
    async fn hold_read_lock(&self, lock_id: u64, soft: bool, ttl: Duration) -> CoralResult<()>;

    /// Release a read lock. A leader answering DATABASE_NOT_FOUND means the
    /// lock is implicitly gone and counts as success.
    async fn cancel_read_lock(&self, lock_id: u64) -> CoralResult<()>;

    async fn add_follower(&self, request: &AddFollowerRequest) -> CoralResult<()>;

    async fn remove_follower(&self, follower_id: &str) -> CoralResult<()>;

    /// Release the WAL barrier from the initial dump.
    async fn cancel_barrier(&self, barrier_id: i64) -> CoralResult<()>;
}

// ============================================================================
// STATUS MAPPING
// ============================================================================

/// Map a DELETE on the hold-lock endpoint to an outcome. DATABASE_NOT_FOUND
/// is success: the lock vanished together with its database. Any other
/// non-2xx is fatal for the current iteration.
pub fn cancel_lock_outcome(status: u16, error_num: Option<i32>) -> CoralResult<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    if error_num == Some(ErrorCode::DatabaseNotFound.as_i32()) {
        return Ok(());
    }
    Err(CoralError::new(
        ErrorCode::ClusterTimeout,
        format!("cancelling read lock failed with status {}", status),
    ))
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

const REPLICATION_API: &str = "/_api/replication/";

/// [`LeaderClient`] over the leader's REST surface.
pub struct HttpLeaderClient {
    http: reqwest::Client,
    endpoint: String,
    database: String,
    shard: String,
    client_id: String,
}

impl HttpLeaderClient {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        shard: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            database: database.into(),
            shard: shard.into(),
            client_id: client_id.into(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/_db/{}{}{}",
            self.endpoint, self.database, REPLICATION_API, suffix
        )
    }

    async fn expect_ok(response: reqwest::Response, what: &str) -> CoralResult<Value> {
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            let error_num = body.get("errorNum").and_then(Value::as_i64).unwrap_or(0);
            Err(CoralError::new(
                ErrorCode::ClusterTimeout,
                format!("{} failed with status {} (errorNum {})", what, status, error_num),
            ))
        }
    }
}

#[async_trait]
impl LeaderClient for HttpLeaderClient {
    async fn document_count(&self) -> CoralResult<u64> {
        let url = format!(
            "{}/_db/{}/_api/collection/{}/count",
            self.endpoint, self.database, self.shard
        );
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let body = Self::expect_ok(response, "count").await?;
        Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn start_dump(&self) -> CoralResult<DumpResult> {
        let response = self
            .http
            .post(self.url("dump"))
            .json(&serde_json::json!({
                "collection": self.shard,
                "clientId": self.client_id,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let body = Self::expect_ok(response, "dump").await?;
        serde_json::from_value(body)
            .map_err(|e| CoralError::internal(format!("malformed dump response: {}", e)))
    }

    async fn tail_wal(&self, from_tick: u64, budget: Duration) -> CoralResult<TailResult> {
        let response = self
            .http
            .post(self.url("tail"))
            .json(&serde_json::json!({
                "collection": self.shard,
                "from": from_tick,
                "clientId": self.client_id,
            }))
            .timeout(budget)
            .send()
            .await
            .map_err(transport_error)?;
        let body = Self::expect_ok(response, "tail").await?;
        serde_json::from_value(body)
            .map_err(|e| CoralError::internal(format!("malformed tail response: {}", e)))
    }

    async fn read_lock_id(&self) -> CoralResult<u64> {
        let response = self
            .http
            .get(self.url("holdReadLockCollection"))
            .send()
            .await
            .map_err(transport_error)?;
        let body = Self::expect_ok(response, "read lock id").await?;
        body.get("id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CoralError::internal("leader returned no lock id"))
    }

    async fn hold_read_lock(&self, lock_id: u64, soft: bool, ttl: Duration) -> CoralResult<()> {
        // POST registers the lock request and returns immediately
        let body = serde_json::json!({
            "id": lock_id.to_string(),
            "collection": self.shard,
            "ttl": ttl.as_secs(),
            "doSoftLockOnly": soft,
        });
        let response = self
            .http
            .post(self.url("holdReadLockCollection"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::expect_ok(response, "hold read lock").await?;

        // a concurrent PUT polls until the lock is actually held
        let response = self
            .http
            .put(self.url("holdReadLockCollection"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::expect_ok(response, "poll read lock").await?;
        Ok(())
    }

    async fn cancel_read_lock(&self, lock_id: u64) -> CoralResult<()> {
        let response = self
            .http
            .delete(self.url("holdReadLockCollection"))
            .json(&serde_json::json!({ "id": lock_id.to_string() }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let error_num = body
            .get("errorNum")
            .and_then(Value::as_i64)
            .map(|n| n as i32);
        cancel_lock_outcome(status, error_num)
    }

    async fn add_follower(&self, request: &AddFollowerRequest) -> CoralResult<()> {
        let response = self
            .http
            .put(self.url("addFollower"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        Self::expect_ok(response, "addFollower").await?;
        Ok(())
    }

    async fn remove_follower(&self, follower_id: &str) -> CoralResult<()> {
        let response = self
            .http
            .delete(self.url("removeFollower"))
            .json(&serde_json::json!({
                "followerId": follower_id,
                "shard": self.shard,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        Self::expect_ok(response, "removeFollower").await?;
        Ok(())
    }

    async fn cancel_barrier(&self, barrier_id: i64) -> CoralResult<()> {
        if barrier_id <= 0 {
            return Ok(());
        }
        let response = self
            .http
            .delete(self.url(&format!("barrier/{}", barrier_id)))
            .send()
            .await
            .map_err(transport_error)?;
        Self::expect_ok(response, "cancel barrier").await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> CoralError {
    if err.is_timeout() {
        CoralError::new(ErrorCode::ClusterTimeout, err.to_string())
    } else {
        CoralError::new(ErrorCode::ClusterTimeout, format!("network error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_lock_outcome_mapping() {
        cancel_lock_outcome(200, None).expect("2xx is success");
        cancel_lock_outcome(204, None).expect("2xx is success");
        cancel_lock_outcome(
            404,
            Some(ErrorCode::DatabaseNotFound.as_i32()),
        )
        .expect("DATABASE_NOT_FOUND means the lock is gone with its database");
        assert!(cancel_lock_outcome(404, Some(ErrorCode::CollectionNotFound.as_i32())).is_err());
        assert!(cancel_lock_outcome(500, None).is_err());
    }

    #[test]
    fn test_add_follower_request_shape() {
        let request = AddFollowerRequest {
            follower_id: "PRMR-1".into(),
            shard: "s100".into(),
            checksum: "42".into(),
            server_id: "PRMR-1".into(),
            syncer_id: Some("sync-7".into()),
            read_lock_id: 9,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["followerId"], "PRMR-1");
        assert_eq!(json["checksum"], "42");
        assert_eq!(json["readLockId"], 9);
    }
}
