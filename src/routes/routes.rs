//! Defines routes for the feed API.
//!
//! ## Structure
//! - **Public endpoints**
//!   - `GET    /healthz`, `GET /readyz`, `GET /about`
//!   - `GET    /images/{shard}/{name}` stored image bytes
//!
//! - **Authenticated endpoints** (`Authorization` header)
//!   - `GET    /me`
//!   - `GET    /feed?from=&limit=`
//!   - `POST   /posts`, `DELETE /posts/{post_id}`
//!   - `POST   /posts/{post_id}/images` raw image body
//!   - `POST   /posts/{post_id}/like`, `DELETE /posts/{post_id}/like`
//!   - `POST   /posts/{post_id}/comments`
//!   - `DELETE /posts/{post_id}/comments/{comment_id}`

use crate::{
    handlers::{
        account_handlers::{about, me},
        feed_handlers::feed,
        health_handlers::{healthz, readyz},
        image_handlers::get_image,
        post_handlers::{
            create_comment, create_post, delete_comment, delete_post, like_post, unlike_post,
            upload_image,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header},
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the router for every endpoint.
///
/// `max_upload_bytes` bounds image upload bodies; other bodies keep axum's
/// default limit.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::DELETE]);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/about", get(about))
        .route("/me", get(me))
        .route("/feed", get(feed))
        .route("/posts", post(create_post))
        .route("/posts/{post_id}", delete(delete_post))
        .route(
            "/posts/{post_id}/images",
            post(upload_image).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/posts/{post_id}/like", post(like_post).delete(unlike_post))
        .route("/posts/{post_id}/comments", post(create_comment))
        .route(
            "/posts/{post_id}/comments/{comment_id}",
            delete(delete_comment),
        )
        .route("/images/{shard}/{name}", get(get_image))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
