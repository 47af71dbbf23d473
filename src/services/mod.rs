//! Core services: identity resolution, blob storage, feed assembly and the
//! post write paths.

pub mod blob_store;
pub mod feed_repository;
pub mod feed_service;
pub mod identity_cache;
pub mod identity_verifier;
pub mod post_service;
