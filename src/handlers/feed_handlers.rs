//! `GET /feed?from=<rfc3339>&limit=<n>`

use crate::{errors::AppError, extractors::CurrentIdentity, models::feed::FeedPage, state::AppState};
use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Raw query parameters, parsed by hand so failures get a JSON 400.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub from: Option<String>,
    pub limit: Option<String>,
}

impl FeedQuery {
    fn cursor(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        self.from
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|err| AppError::bad_request(format!("parsing 'from' parameter: {err}")))
            })
            .transpose()
    }

    fn limit(&self) -> Result<Option<u32>, AppError> {
        self.limit
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|err| AppError::bad_request(format!("parsing 'limit' parameter: {err}")))
            })
            .transpose()
    }
}

/// Newest posts created before `from` (now by default), fully hydrated.
pub async fn feed(
    State(state): State<AppState>,
    _caller: CurrentIdentity,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedPage>, AppError> {
    let cursor = query.cursor()?;
    let limit = state.feed.page_size(query.limit()?);
    let page = state.feed.assemble(cursor, limit).await?;
    Ok(Json(page))
}
