//! Resolves a bearer credential into a local [`Identity`].
//!
//! The credential is forwarded verbatim to the identity provider's `userinfo`
//! endpoint. On success the reported subject is upserted into `users` so the
//! local id stays stable while the display name follows the provider.

use crate::models::identity::Identity;
use async_trait::async_trait;
use reqwest::{Client, Url, header};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Failures while resolving a credential.
///
/// Messages are rendered eagerly so one failure can be handed to every caller
/// waiting on the same verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("identity provider unreachable: {0}")]
    NetworkFailure(String),
    #[error("malformed identity provider response: {0}")]
    MalformedResponse(String),
    #[error("storing identity: {0}")]
    StorageFailure(String),
    #[error("verification aborted: {0}")]
    Aborted(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::StorageFailure(err.to_string())
    }
}

/// Something that can turn a credential into an identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Subject and display name as reported by the provider.
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    nickname: String,
}

/// Verifier backed by an OpenID-style `userinfo` endpoint and the local
/// `users` table.
pub struct HttpIdentityVerifier {
    client: Client,
    userinfo_url: Url,
    db: Arc<SqlitePool>,
}

impl HttpIdentityVerifier {
    /// Build a verifier for the provider rooted at `auth_domain`.
    ///
    /// # Errors
    ///
    /// Returns an error when the domain is not a valid base URL or the HTTP
    /// client cannot be constructed.
    pub fn new(auth_domain: &str, timeout: Duration, db: Arc<SqlitePool>) -> anyhow::Result<Self> {
        let userinfo_url = Url::parse(&format!("{}/userinfo", auth_domain.trim_end_matches('/')))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            userinfo_url,
            db,
        })
    }

    async fn fetch_user_info(&self, credential: &str) -> Result<UserInfo, AuthError> {
        let response = self
            .client
            .get(self.userinfo_url.clone())
            .header(header::AUTHORIZATION, credential)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| AuthError::NetworkFailure(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "identity provider rejected credential");
            return Err(AuthError::InvalidCredential);
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AuthError::NetworkFailure(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| AuthError::MalformedResponse(err.to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let info = self.fetch_user_info(credential).await?;
        let identity = upsert_identity(&self.db, &info.sub, &info.nickname).await?;
        debug!(identity_id = identity.id, "credential verified");
        Ok(identity)
    }
}

/// Insert the subject on first sight, otherwise refresh its display name.
/// Returns the stored row with its stable id.
pub async fn upsert_identity(db: &SqlitePool, sub: &str, name: &str) -> Result<Identity, AuthError> {
    let identity = sqlx::query_as::<_, Identity>(
        r#"
        INSERT INTO users (sub, name) VALUES (?, ?)
        ON CONFLICT(sub) DO UPDATE SET name = excluded.name
        RETURNING id, sub, name
        "#,
    )
    .bind(sub)
    .bind(name)
    .fetch_one(db)
    .await?;
    Ok(identity)
}
