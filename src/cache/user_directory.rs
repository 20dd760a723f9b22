//! Candidate profile lookups, optionally fronted by the TTL cache.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::ttl::TtlCache;
use crate::gateway::{GatewayError, UserProfile, UserServiceClient};

/// Source of candidate profiles
#[async_trait]
pub trait UserDirectory: Send + Sync + Debug {
    /// `Ok(None)` when the user does not exist
    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, GatewayError>;
}

#[async_trait]
impl UserDirectory for UserServiceClient {
    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, GatewayError> {
        self.get_user_by_id(user_id).await
    }
}

/// Read-through cache over another directory. Only profiles with an email are
/// cached so an incomplete record is re-fetched on the next lookup.
#[derive(Debug)]
pub struct CachedUserDirectory {
    inner: Arc<dyn UserDirectory>,
    cache: TtlCache<String, UserProfile>,
}

impl CachedUserDirectory {
    pub fn new(inner: Arc<dyn UserDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    pub fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(&user_id.to_string());
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl UserDirectory for CachedUserDirectory {
    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, GatewayError> {
        let result = self
            .cache
            .get_or_fetch(
                user_id.to_string(),
                || self.inner.fetch_user(user_id),
                UserProfile::has_email,
            )
            .await;

        if let Ok(Some(profile)) = &result {
            if !profile.has_email() {
                debug!(user_id, "Profile without email returned uncached");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingDirectory {
        profiles: Mutex<HashMap<String, UserProfile>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UserDirectory for CountingDirectory {
        async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.profiles.lock().get(user_id).cloned())
        }
    }

    fn profile(email: Option<&str>) -> UserProfile {
        UserProfile {
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_serves_until_ttl() {
        let source = Arc::new(CountingDirectory::default());
        source
            .profiles
            .lock()
            .insert("u1".to_string(), profile(Some("a@example.com")));
        let directory = CachedUserDirectory::new(source.clone(), Duration::from_secs(1_800));

        for _ in 0..3 {
            assert!(directory.fetch_user("u1").await.unwrap().is_some());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1_800)).await;
        directory.fetch_user("u1").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_profiles_without_email_are_refetched() {
        let source = Arc::new(CountingDirectory::default());
        source.profiles.lock().insert("u1".to_string(), profile(None));
        let directory = CachedUserDirectory::new(source.clone(), Duration::from_secs(60));

        directory.fetch_user("u1").await.unwrap();
        directory.fetch_user("u1").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(directory.cached_entries(), 0);

        assert!(directory.fetch_user("missing").await.unwrap().is_none());
    }
}
