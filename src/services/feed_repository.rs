//! Read queries backing feed assembly.
//!
//! Every lookup keyed by posts takes the whole id set and issues exactly one
//! statement with an `IN (...)` predicate, never one statement per post.

use crate::models::post::{Comment, Like, MediaReference, PostRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;

#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Ids of up to `limit` posts created strictly before `cursor`, newest first.
    async fn post_ids_before(
        &self,
        cursor: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<i64>, sqlx::Error>;

    /// Posts in `ids` joined with their author, newest first.
    async fn posts_by_ids(&self, ids: &[i64]) -> Result<Vec<PostRow>, sqlx::Error>;

    async fn media_for_posts(&self, ids: &[i64]) -> Result<Vec<MediaReference>, sqlx::Error>;

    async fn likes_for_posts(&self, ids: &[i64]) -> Result<Vec<Like>, sqlx::Error>;

    async fn comments_for_posts(&self, ids: &[i64]) -> Result<Vec<Comment>, sqlx::Error>;
}

pub struct SqliteFeedRepository {
    db: Arc<SqlitePool>,
}

impl SqliteFeedRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

/// Append `(?, ?, ...)` binding every id.
fn push_id_set(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl FeedRepository for SqliteFeedRepository {
    async fn post_ids_before(
        &self,
        cursor: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM posts
             WHERE created_at < ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(cursor)
        .bind(i64::from(limit))
        .fetch_all(&*self.db)
        .await
    }

    async fn posts_by_ids(&self, ids: &[i64]) -> Result<Vec<PostRow>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT p.id, u.id AS user_id, u.name AS user_name, p.text, p.created_at \
             FROM posts AS p LEFT JOIN users AS u ON p.user_id = u.id \
             WHERE p.id IN ",
        );
        push_id_set(&mut builder, ids);
        builder.push(" ORDER BY p.created_at DESC, p.id DESC");
        builder.build_query_as().fetch_all(&*self.db).await
    }

    async fn media_for_posts(&self, ids: &[i64]) -> Result<Vec<MediaReference>, sqlx::Error> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT post_id, path FROM images WHERE post_id IN ");
        push_id_set(&mut builder, ids);
        builder.push(" ORDER BY id");
        builder.build_query_as().fetch_all(&*self.db).await
    }

    async fn likes_for_posts(&self, ids: &[i64]) -> Result<Vec<Like>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT l.post_id, u.id AS user_id, u.name AS user_name \
             FROM likes AS l LEFT JOIN users AS u ON l.user_id = u.id \
             WHERE l.post_id IN ",
        );
        push_id_set(&mut builder, ids);
        builder.push(" ORDER BY l.rowid");
        builder.build_query_as().fetch_all(&*self.db).await
    }

    async fn comments_for_posts(&self, ids: &[i64]) -> Result<Vec<Comment>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT c.id, c.post_id, u.id AS user_id, u.name AS user_name, c.text, c.created_at \
             FROM comments AS c LEFT JOIN users AS u ON c.user_id = u.id \
             WHERE c.post_id IN ",
        );
        push_id_set(&mut builder, ids);
        builder.push(" ORDER BY c.created_at, c.id");
        builder.build_query_as().fetch_all(&*self.db).await
    }
}
