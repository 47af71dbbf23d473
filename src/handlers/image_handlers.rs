//! Serves stored blobs. Paths are content addresses, so responses never go stale.

use crate::{errors::AppError, services::blob_store::BlobPath, state::AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// `GET /images/{shard}/{name}`
pub async fn get_image(
    State(state): State<AppState>,
    Path((shard, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let path = BlobPath::parse(&shard, &name)?;
    let file = state.blobs.open(&path).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    Ok(response)
}
