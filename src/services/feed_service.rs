//! Feed assembly.
//!
//! Pagination is keyed on `created_at` rather than an offset, so posts
//! inserted between two page fetches cannot shift the window. Assembly runs
//! in two phases: resolve the page's post ids, then fetch the posts and fan
//! out the media/likes/comments lookups for that id set. The number of
//! queries per page is constant: one for an empty page, five otherwise.

use crate::{
    models::{
        feed::{FeedPage, FeedPost},
        post::{Comment, Like, MediaReference},
    },
    services::feed_repository::FeedRepository,
};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("querying {stage}: {source}")]
    QueryFailure {
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

fn query_failure(stage: &'static str) -> impl FnOnce(sqlx::Error) -> FeedError {
    move |source| FeedError::QueryFailure { stage, source }
}

#[derive(Clone)]
pub struct FeedService {
    repo: Arc<dyn FeedRepository>,
    media_route: String,
    default_limit: u32,
    max_limit: u32,
}

impl FeedService {
    pub fn new(
        repo: Arc<dyn FeedRepository>,
        media_route: impl Into<String>,
        default_limit: u32,
        max_limit: u32,
    ) -> Self {
        Self {
            repo,
            media_route: media_route.into(),
            default_limit,
            max_limit,
        }
    }

    /// Page size for a request, falling back to the default and capped at
    /// the configured maximum.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }

    /// Build one page of at most `limit` posts created strictly before
    /// `cursor` (now when absent). Any failing query fails the whole page.
    pub async fn assemble(
        &self,
        cursor: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<FeedPage, FeedError> {
        let cursor = cursor.unwrap_or_else(Utc::now);
        let limit = limit.min(self.max_limit);

        let ids = self
            .repo
            .post_ids_before(cursor, limit)
            .await
            .map_err(query_failure("feed"))?;
        if ids.is_empty() {
            return Ok(FeedPage::default());
        }

        let (posts, media, likes, comments) = tokio::try_join!(
            async { self.repo.posts_by_ids(&ids).await.map_err(query_failure("posts")) },
            async { self.repo.media_for_posts(&ids).await.map_err(query_failure("images")) },
            async { self.repo.likes_for_posts(&ids).await.map_err(query_failure("likes")) },
            async { self.repo.comments_for_posts(&ids).await.map_err(query_failure("comments")) },
        )?;

        let mut media = group_by_post(media, |m: &MediaReference| m.post_id);
        let mut likes = group_by_post(likes, |l: &Like| l.post_id);
        let mut comments = group_by_post(comments, |c: &Comment| c.post_id);

        let posts: Vec<FeedPost> = posts
            .into_iter()
            .map(|post| FeedPost {
                images: media
                    .remove(&post.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| self.public_path(&m.path))
                    .collect(),
                likes: likes.remove(&post.id).unwrap_or_default(),
                comments: comments.remove(&post.id).unwrap_or_default(),
                post,
            })
            .collect();

        debug!(posts = posts.len(), %cursor, "assembled feed page");
        Ok(FeedPage { posts })
    }

    fn public_path(&self, relative: &str) -> String {
        format!("{}/{}", self.media_route.trim_end_matches('/'), relative)
    }
}

/// Group rows by post id, keeping their arrival order within each group.
fn group_by_post<T>(rows: Vec<T>, post_id: impl Fn(&T) -> i64) -> HashMap<i64, Vec<T>> {
    let mut groups: HashMap<i64, Vec<T>> = HashMap::new();
    for row in rows {
        groups.entry(post_id(&row)).or_default().push(row);
    }
    groups
}
