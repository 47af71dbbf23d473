use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::{errors::AppError, models::identity::Identity, state::AppState};

/// Caller resolved from the `Authorization` header.
///
/// The header value is passed to the identity cache untouched, scheme prefix
/// included, since the provider expects it verbatim.
pub struct CurrentIdentity(pub Identity);

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::unauthorized("missing authorization header"))?;

        let identity = state.identities.resolve(credential).await?;
        Ok(CurrentIdentity(identity))
    }
}
