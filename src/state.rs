//! Shared state handed to every handler.

use crate::services::{
    blob_store::BlobStore, feed_service::FeedService, identity_cache::IdentityCache,
    post_service::PostService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Route under which stored images are served.
pub const MEDIA_ROUTE: &str = "/images";

/// Services built once at startup. Cloning only bumps reference counts.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub identities: IdentityCache,
    pub blobs: BlobStore,
    pub feed: FeedService,
    pub posts: PostService,
}
