//! Handlers for posts, images, likes and comments.

use crate::{errors::AppError, extractors::CurrentIdentity, state::{AppState, MEDIA_ROUTE}};
use axum::{
    Json,
    extract::{Path, State},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct TextReq {
    pub text: String,
}

fn acknowledged() -> Json<Value> {
    Json(json!({ "acknowledged": true }))
}

/// `POST /posts`
pub async fn create_post(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(payload): Json<TextReq>,
) -> Result<Json<Value>, AppError> {
    let post_id = state.posts.create_post(&identity, &payload.text).await?;
    Ok(Json(json!({ "acknowledged": true, "post_id": post_id })))
}

/// `DELETE /posts/{post_id}`
pub async fn delete_post(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(post_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    state.posts.delete_post(&identity, post_id).await?;
    Ok(acknowledged())
}

/// `POST /posts/{post_id}/images`: raw image bytes as the body.
pub async fn upload_image(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(post_id): Path<i64>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let path = state.posts.attach_image(&identity, post_id, &body).await?;
    Ok(Json(json!({ "path": path.public_path(MEDIA_ROUTE) })))
}

/// `POST /posts/{post_id}/like`
pub async fn like_post(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(post_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    state.posts.like(&identity, post_id).await?;
    Ok(acknowledged())
}

/// `DELETE /posts/{post_id}/like`
pub async fn unlike_post(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(post_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    state.posts.unlike(&identity, post_id).await?;
    Ok(acknowledged())
}

/// `POST /posts/{post_id}/comments`
pub async fn create_comment(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(post_id): Path<i64>,
    Json(payload): Json<TextReq>,
) -> Result<Json<Value>, AppError> {
    let comment_id = state
        .posts
        .create_comment(&identity, post_id, &payload.text)
        .await?;
    Ok(Json(json!({ "comment_id": comment_id })))
}

/// `DELETE /posts/{post_id}/comments/{comment_id}`
pub async fn delete_comment(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path((_post_id, comment_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, AppError> {
    state.posts.delete_comment(&identity, comment_id).await?;
    Ok(acknowledged())
}
