//! Request-scoped feed output. Built fresh for every request, never cached.

use serde::Serialize;

use super::post::{Comment, Like, PostRow};

/// A post with its media, likes and comments attached.
#[derive(Serialize, Clone, Debug)]
pub struct FeedPost {
    #[serde(flatten)]
    pub post: PostRow,
    /// Public retrieval paths, already prefixed with the media route.
    pub images: Vec<String>,
    pub likes: Vec<Like>,
    pub comments: Vec<Comment>,
}

/// One page of the feed, newest post first.
#[derive(Serialize, Clone, Debug, Default)]
pub struct FeedPage {
    pub posts: Vec<FeedPost>,
}
