//! Reads of the merged property tree.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use propd_core::tree;
use serde_json::Value;

use super::ErrorResponse;
use crate::conqueso;
use crate::state::AppState;

pub async fn properties(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(Value::Object(state.manager.properties()))
}

/// Sub-tree at a `/`-separated key path.
pub async fn nested_properties(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    tracing::debug!(path = %path, "nested properties requested");
    let root = Value::Object(state.manager.properties());
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    tree::lookup(&root, &segments)
        .map(|node| Json(node.clone()))
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(format!("no property at `{path}`")),
            )
        })
}

pub async fn conqueso(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        conqueso::render(state.manager.properties()),
    )
}
