//! Core data models for the photo feed.
//!
//! Rows map to database tables via `sqlx::FromRow` and serialize as JSON via
//! `serde`. Foreign columns reached through an outer join are `Option`s so a
//! dangling reference never drops a row.

pub mod feed;
pub mod identity;
pub mod post;
