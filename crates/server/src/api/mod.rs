//! `/v1` endpoint handlers.

mod health;
mod properties;

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Json<Self> {
        Json(Self { error: error.into() })
    }
}

pub use health::{health, status};
pub use properties::{conqueso, nested_properties, properties};
