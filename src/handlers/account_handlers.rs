//! Caller and build information.

use crate::extractors::CurrentIdentity;
use axum::Json;
use serde_json::{Value, json};

/// `GET /me`: the authenticated caller.
pub async fn me(CurrentIdentity(identity): CurrentIdentity) -> Json<Value> {
    Json(json!({ "id": identity.id, "name": identity.name }))
}

/// `GET /about`
pub async fn about() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}
