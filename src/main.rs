use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod extractors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    blob_store::BlobStore, feed_repository::SqliteFeedRepository, feed_service::FeedService,
    identity_cache::IdentityCache, identity_verifier::HttpIdentityVerifier,
    post_service::PostService,
};
use state::{AppState, MEDIA_ROUTE};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting phototrail with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    if cfg.auth_domain.is_empty() {
        anyhow::bail!("an identity provider is required: set --auth-domain or PHOTOTRAIL_AUTH_DOMAIN");
    }

    // --- Initialize core services ---
    let blobs = BlobStore::new(cfg.images_dir())
        .await
        .with_context(|| format!("creating image directory {}", cfg.images_dir().display()))?;
    tracing::info!("Storing images under {}", blobs.root().display());

    let verifier = HttpIdentityVerifier::new(&cfg.auth_domain, cfg.provider_timeout, db.clone())?;
    let identities = IdentityCache::new(Arc::new(verifier), cfg.identity_ttl);
    spawn_identity_janitor(identities.clone(), cfg.identity_purge_interval);

    let state = AppState {
        feed: FeedService::new(
            Arc::new(SqliteFeedRepository::new(db.clone())),
            MEDIA_ROUTE,
            cfg.feed_default_limit,
            cfg.feed_max_limit,
        ),
        posts: PostService::new(db.clone(), blobs.clone()),
        identities,
        blobs,
        db,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Sweep expired credentials from the identity cache on a fixed interval.
fn spawn_identity_janitor(identities: IdentityCache, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = identities.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired identities");
            }
        }
    });
}
