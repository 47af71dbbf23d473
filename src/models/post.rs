//! Posts and the rows that hang off them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A post joined with its author.
///
/// The author columns come from a left join and are `None` when the author
/// row is missing.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct PostRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A stored image attached to a post. `path` is the blob store relative path.
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct MediaReference {
    pub post_id: i64,
    pub path: String,
}

/// A like joined with the liking identity.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Like {
    #[serde(skip)]
    pub post_id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
}

/// A comment joined with its author.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Comment {
    pub id: i64,
    #[serde(skip)]
    pub post_id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
