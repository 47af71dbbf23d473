//! Time-bounded identity cache with per-credential request coalescing.
//!
//! A hit returns the cached identity without touching the network or the
//! database. On a miss, concurrent callers presenting the same credential
//! share a single verification: the first caller registers it in the
//! in-flight table, later callers attach to the same shared future. The
//! verification runs as its own task so it completes (and populates the
//! cache) even if every caller that was awaiting it goes away.
//!
//! Only successes are cached. A failure is returned to every attached caller
//! and the next call for that credential starts a fresh verification.

use crate::{
    models::identity::Identity,
    services::identity_verifier::{AuthError, IdentityVerifier},
};
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, warn};

type Verification = Shared<BoxFuture<'static, Result<Identity, AuthError>>>;

#[derive(Clone, Debug)]
struct CacheEntry {
    identity: Identity,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct Inner {
    verifier: Arc<dyn IdentityVerifier>,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, Verification>,
}

/// Process-wide identity cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IdentityCache {
    inner: Arc<Inner>,
}

impl IdentityCache {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                verifier,
                ttl,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Resolve `credential` to an identity, verifying at most once per
    /// credential at any time.
    pub async fn resolve(&self, credential: &str) -> Result<Identity, AuthError> {
        if let Some(identity) = self.inner.lookup(credential) {
            return Ok(identity);
        }
        self.join_or_start(credential).await
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.inner.entries.len())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.entries.len()
    }

    fn join_or_start(&self, credential: &str) -> Verification {
        match self.inner.in_flight.entry(credential.to_owned()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                // A verification may have finished between the first lookup
                // and taking the in-flight slot.
                if let Some(identity) = self.inner.lookup(credential) {
                    return futures::future::ready(Ok(identity)).boxed().shared();
                }

                let inner = Arc::clone(&self.inner);
                let key = credential.to_owned();
                let task = tokio::spawn(async move { inner.verify_and_store(key).await });
                let verification = async move {
                    task.await
                        .unwrap_or_else(|err| Err(AuthError::Aborted(err.to_string())))
                }
                .boxed()
                .shared();
                vacant.insert(verification.clone());
                verification
            }
        }
    }
}

impl Inner {
    fn lookup(&self, credential: &str) -> Option<Identity> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(credential) {
            if entry.is_live(now) {
                return Some(entry.identity.clone());
            }
        }
        self.entries
            .remove_if(credential, |_, entry| !entry.is_live(now));
        None
    }

    async fn verify_and_store(&self, credential: String) -> Result<Identity, AuthError> {
        // Released after the cache is populated, so late callers see one or
        // the other. Also released if the verifier panics.
        let _slot = InFlightSlot {
            in_flight: &self.in_flight,
            credential: &credential,
        };
        let result = self.verifier.verify(&credential).await;
        match &result {
            Ok(identity) => {
                debug!(identity_id = identity.id, "caching verified identity");
                self.entries.insert(
                    credential.clone(),
                    CacheEntry {
                        identity: identity.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
            }
            Err(err) => warn!(error = %err, "credential verification failed"),
        }
        result
    }
}

/// Clears a credential's in-flight registration when dropped.
struct InFlightSlot<'a> {
    in_flight: &'a DashMap<String, Verification>,
    credential: &'a str,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(self.credential);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    const TTL: Duration = Duration::from_secs(60);

    /// Verifier that sleeps, counts invocations and replays scripted results.
    struct ScriptedVerifier {
        calls: AtomicUsize,
        delay: Duration,
        script: Mutex<Vec<Result<Identity, AuthError>>>,
    }

    impl ScriptedVerifier {
        fn new(delay: Duration, script: Vec<Result<Identity, AuthError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                script: Mutex::new(script),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityVerifier for ScriptedVerifier {
        async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(identity(credential));
            }
            script.remove(0)
        }
    }

    fn identity(credential: &str) -> Identity {
        Identity {
            id: credential.len() as i64,
            sub: format!("sub|{credential}"),
            name: credential.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_verification() {
        let verifier = ScriptedVerifier::new(Duration::from_millis(50), vec![]);
        let cache = IdentityCache::new(verifier.clone(), TTL);

        let results =
            futures::future::join_all((0..16).map(|_| cache.resolve("Bearer token"))).await;

        assert_eq!(verifier.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), identity("Bearer token"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_failure() {
        let verifier = ScriptedVerifier::new(
            Duration::from_millis(50),
            vec![Err(AuthError::InvalidCredential)],
        );
        let cache = IdentityCache::new(verifier.clone(), TTL);

        let results = futures::future::join_all((0..8).map(|_| cache.resolve("Bearer bad"))).await;

        assert_eq!(verifier.calls(), 1);
        assert!(
            results
                .iter()
                .all(|r| r.as_ref().unwrap_err() == &AuthError::InvalidCredential)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_credentials_verify_independently() {
        let verifier = ScriptedVerifier::new(Duration::from_millis(50), vec![]);
        let cache = IdentityCache::new(verifier.clone(), TTL);

        let (a, b) = tokio::join!(cache.resolve("Bearer a"), cache.resolve("Bearer bb"));

        assert_eq!(verifier.calls(), 2);
        assert_eq!(a.unwrap().name, "Bearer a");
        assert_eq!(b.unwrap().name, "Bearer bb");
    }

    #[tokio::test(start_paused = true)]
    async fn cached_identity_served_until_ttl_expires() {
        let verifier = ScriptedVerifier::new(Duration::ZERO, vec![]);
        let cache = IdentityCache::new(verifier.clone(), TTL);

        cache.resolve("Bearer token").await.unwrap();
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        cache.resolve("Bearer token").await.unwrap();
        assert_eq!(verifier.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.resolve("Bearer token").await.unwrap();
        assert_eq!(verifier.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let verifier = ScriptedVerifier::new(
            Duration::ZERO,
            vec![Err(AuthError::NetworkFailure("connection refused".into()))],
        );
        let cache = IdentityCache::new(verifier.clone(), TTL);

        assert!(cache.resolve("Bearer token").await.is_err());
        assert_eq!(cache.len(), 0);

        let identity = cache.resolve("Bearer token").await.unwrap();
        assert_eq!(identity.name, "Bearer token");
        assert_eq!(verifier.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_does_not_abort_shared_verification() {
        let verifier = ScriptedVerifier::new(Duration::from_millis(50), vec![]);
        let cache = IdentityCache::new(verifier.clone(), TTL);

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve("Bearer token").await })
        };
        tokio::task::yield_now().await;
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve("Bearer token").await })
        };
        tokio::task::yield_now().await;
        first.abort();

        let identity = second.await.unwrap().unwrap();
        assert_eq!(identity.name, "Bearer token");
        assert_eq!(verifier.calls(), 1);

        cache.resolve("Bearer token").await.unwrap();
        assert_eq!(verifier.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let verifier = ScriptedVerifier::new(Duration::ZERO, vec![]);
        let cache = IdentityCache::new(verifier.clone(), TTL);

        cache.resolve("Bearer old").await.unwrap();
        tokio::time::advance(TTL / 2).await;
        cache.resolve("Bearer new").await.unwrap();
        tokio::time::advance(TTL / 2 + Duration::from_secs(1)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
