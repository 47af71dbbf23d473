//! Write paths for posts, images, likes and comments.
//!
//! Mutations of an existing post or comment first look up its owner: a
//! missing row is `NotFound`, a different owner is `Forbidden`, and in both
//! cases nothing is written.

use crate::{
    models::identity::Identity,
    services::blob_store::{BlobError, BlobPath, BlobStore},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("post `{0}` not found")]
    PostNotFound(i64),
    #[error("comment `{0}` not found")]
    CommentNotFound(i64),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type PostResult<T> = Result<T, PostError>;

#[derive(Clone)]
pub struct PostService {
    db: Arc<SqlitePool>,
    blobs: BlobStore,
}

impl PostService {
    pub fn new(db: Arc<SqlitePool>, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    async fn post_owner(&self, post_id: i64) -> PostResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT user_id FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(PostError::PostNotFound(post_id))
    }

    async fn ensure_post_owned(
        &self,
        identity: &Identity,
        post_id: i64,
        denied: &'static str,
    ) -> PostResult<()> {
        if self.post_owner(post_id).await? != identity.id {
            return Err(PostError::Forbidden(denied));
        }
        Ok(())
    }

    pub async fn create_post(&self, identity: &Identity, text: &str) -> PostResult<i64> {
        let post_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO posts (user_id, text, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(identity.id)
        .bind(text)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        info!(post_id, user_id = identity.id, "created post");
        Ok(post_id)
    }

    /// Delete a post together with its images, likes and comments. Blob
    /// files stay on disk since identical uploads share them.
    pub async fn delete_post(&self, identity: &Identity, post_id: i64) -> PostResult<()> {
        self.ensure_post_owned(identity, post_id, "can't remove post of another user")
            .await?;
        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(&*self.db)
            .await?;
        info!(post_id, user_id = identity.id, "deleted post");
        Ok(())
    }

    /// Store an image and attach it to the caller's post. The reference is
    /// only recorded once the blob is safely on disk.
    pub async fn attach_image(
        &self,
        identity: &Identity,
        post_id: i64,
        bytes: &[u8],
    ) -> PostResult<BlobPath> {
        if bytes.is_empty() {
            return Err(PostError::Invalid("image body is empty"));
        }
        self.ensure_post_owned(identity, post_id, "can't add image in post of another user")
            .await?;

        let path = self.blobs.put(bytes).await?;
        sqlx::query("INSERT INTO images (post_id, path) VALUES (?, ?)")
            .bind(post_id)
            .bind(path.to_string())
            .execute(&*self.db)
            .await?;
        info!(post_id, blob = %path, "attached image");
        Ok(path)
    }

    pub async fn like(&self, identity: &Identity, post_id: i64) -> PostResult<()> {
        self.post_owner(post_id).await?;
        sqlx::query("INSERT OR IGNORE INTO likes (post_id, user_id) VALUES (?, ?)")
            .bind(post_id)
            .bind(identity.id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn unlike(&self, identity: &Identity, post_id: i64) -> PostResult<()> {
        sqlx::query("DELETE FROM likes WHERE post_id = ? AND user_id = ?")
            .bind(post_id)
            .bind(identity.id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn create_comment(
        &self,
        identity: &Identity,
        post_id: i64,
        text: &str,
    ) -> PostResult<i64> {
        if text.trim().is_empty() {
            return Err(PostError::Invalid("comment text is empty"));
        }
        self.post_owner(post_id).await?;
        let comment_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO comments (post_id, user_id, text, created_at)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(post_id)
        .bind(identity.id)
        .bind(text)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(comment_id)
    }

    pub async fn delete_comment(&self, identity: &Identity, comment_id: i64) -> PostResult<()> {
        let owner = sqlx::query_scalar::<_, i64>("SELECT user_id FROM comments WHERE id = ?")
            .bind(comment_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(PostError::CommentNotFound(comment_id))?;
        if owner != identity.id {
            return Err(PostError::Forbidden("can't remove comment of another user"));
        }
        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(comment_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, services::identity_verifier::upsert_identity};

    struct Fixture {
        pool: Arc<SqlitePool>,
        posts: PostService,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let pool = Arc::new(db::memory_pool().await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path().join("images")).await.unwrap();
        Fixture {
            posts: PostService::new(pool.clone(), blobs),
            pool,
            _dir: dir,
        }
    }

    async fn identity(fx: &Fixture, name: &str) -> Identity {
        upsert_identity(&fx.pool, &format!("sub|{name}"), name)
            .await
            .unwrap()
    }

    async fn count(fx: &Fixture, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&*fx.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn author_can_delete_post_and_its_children() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        let bob = identity(&fx, "bob").await;
        let post = fx.posts.create_post(&ann, "sunset").await.unwrap();
        fx.posts.attach_image(&ann, post, b"jpeg").await.unwrap();
        fx.posts.like(&bob, post).await.unwrap();
        fx.posts.create_comment(&bob, post, "wow").await.unwrap();

        fx.posts.delete_post(&ann, post).await.unwrap();
        for table in ["posts", "images", "likes", "comments"] {
            assert_eq!(count(&fx, table).await, 0, "{table} not emptied");
        }
    }

    #[tokio::test]
    async fn deleting_someone_elses_post_is_forbidden() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        let bob = identity(&fx, "bob").await;
        let post = fx.posts.create_post(&ann, "mine").await.unwrap();

        let err = fx.posts.delete_post(&bob, post).await.unwrap_err();
        assert!(matches!(err, PostError::Forbidden(_)));
        assert_eq!(count(&fx, "posts").await, 1);
    }

    #[tokio::test]
    async fn missing_post_is_not_found() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        assert!(matches!(
            fx.posts.delete_post(&ann, 42).await,
            Err(PostError::PostNotFound(42))
        ));
        assert!(matches!(
            fx.posts.create_comment(&ann, 42, "hi").await,
            Err(PostError::PostNotFound(42))
        ));
        assert!(matches!(
            fx.posts.like(&ann, 42).await,
            Err(PostError::PostNotFound(42))
        ));
    }

    #[tokio::test]
    async fn image_on_someone_elses_post_is_rejected_before_storing() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        let bob = identity(&fx, "bob").await;
        let post = fx.posts.create_post(&ann, "mine").await.unwrap();

        let err = fx.posts.attach_image(&bob, post, b"png").await.unwrap_err();
        assert!(matches!(err, PostError::Forbidden(_)));
        assert_eq!(count(&fx, "images").await, 0);
        let mut stored = tokio::fs::read_dir(fx._dir.path().join("images")).await.unwrap();
        assert!(stored.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_image_twice_shares_one_path() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        let post = fx.posts.create_post(&ann, "twins").await.unwrap();

        let a = fx.posts.attach_image(&ann, post, b"bytes").await.unwrap();
        let b = fx.posts.attach_image(&ann, post, b"bytes").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(count(&fx, "images").await, 2);
    }

    #[tokio::test]
    async fn likes_are_idempotent() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        let post = fx.posts.create_post(&ann, "like me").await.unwrap();

        fx.posts.like(&ann, post).await.unwrap();
        fx.posts.like(&ann, post).await.unwrap();
        assert_eq!(count(&fx, "likes").await, 1);

        fx.posts.unlike(&ann, post).await.unwrap();
        fx.posts.unlike(&ann, post).await.unwrap();
        assert_eq!(count(&fx, "likes").await, 0);
    }

    #[tokio::test]
    async fn only_comment_author_may_delete_it() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        let bob = identity(&fx, "bob").await;
        let post = fx.posts.create_post(&ann, "discuss").await.unwrap();
        let comment = fx.posts.create_comment(&bob, post, "first").await.unwrap();

        assert!(matches!(
            fx.posts.delete_comment(&ann, comment).await,
            Err(PostError::Forbidden(_))
        ));
        assert_eq!(count(&fx, "comments").await, 1);

        fx.posts.delete_comment(&bob, comment).await.unwrap();
        assert_eq!(count(&fx, "comments").await, 0);
        assert!(matches!(
            fx.posts.delete_comment(&bob, comment).await,
            Err(PostError::CommentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn blank_comment_is_invalid() {
        let fx = fixture().await;
        let ann = identity(&fx, "ann").await;
        let post = fx.posts.create_post(&ann, "quiet").await.unwrap();
        assert!(matches!(
            fx.posts.create_comment(&ann, post, "   ").await,
            Err(PostError::Invalid(_))
        ));
    }
}
