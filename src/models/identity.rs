//! Represents a local user record resolved from a bearer credential.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A caller known to the service.
///
/// `sub` is the identity provider's stable subject; `id` is assigned locally
/// the first time the subject is seen and never changes afterwards. `name`
/// tracks the latest display name reported by the provider.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub sub: String,
    pub name: String,
}
