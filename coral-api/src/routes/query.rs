//! The execution-block wire endpoint.
//!
//! Remote execution blocks on other servers pull rows from blocks registered
//! here, addressed by query id and distribute id.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use coral_core::CoralError;
use coral_query::cluster::ExecutionBlockRequest;
use std::sync::Arc;

/// POST /_api/aql/execution-block
pub async fn execution_block(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecutionBlockRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut server = state
        .block_server
        .lock()
        .map_err(|_| ApiError(CoralError::internal("block server poisoned")))?;
    let response = server.handle(&request)?;
    Ok(Json(response))
}
