//! Route handlers.

pub mod collection;
pub mod query;
pub mod replication;

use crate::state::AppState;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::sync::Arc;

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // collection management
        .route(
            "/_api/collection",
            get(collection::list_collections).post(collection::create_collection),
        )
        .route(
            "/_api/collection/:name",
            get(collection::get_collection).delete(collection::drop_collection),
        )
        .route(
            "/_api/collection/:name/:sub",
            get(collection::get_collection_sub).put(collection::collection_action),
        )
        // replication surface
        .route(
            "/_api/replication/holdReadLockCollection",
            get(replication::read_lock_id)
                .post(replication::hold_read_lock)
                .put(replication::poll_read_lock)
                .delete(replication::cancel_read_lock),
        )
        .route("/_api/replication/addFollower", put(replication::add_follower))
        .route(
            "/_api/replication/removeFollower",
            delete(replication::remove_follower),
        )
        .route("/_api/replication/barrier/:id", delete(replication::remove_barrier))
        // execution-block wire
        .route("/_api/aql/execution-block", post(query::execution_block))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
