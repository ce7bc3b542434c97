//! HTTP API surface.
//!
//! All endpoints are stateless: navigation state such as relational filters
//! travels in query parameters, never in server-side session state.

pub mod error;
pub mod forms;
pub mod rows;
pub mod tables;

use axum::{
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Build the application router over the shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/schema", get(tables::schema_index))
        .route("/api/:database/tables/:table", get(tables::grid_config))
        .route(
            "/api/:database/tables/:table/rows",
            get(tables::list_rows).post(rows::create_row),
        )
        .route(
            "/api/:database/tables/:table/rows/:id",
            get(rows::get_row)
                .put(rows::update_row)
                .delete(rows::delete_row),
        )
        .route("/api/:database/tables/:table/form", get(forms::get_form))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
