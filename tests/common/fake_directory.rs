//! In-process stand-in for the user management service.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use recruit_core::cache::UserDirectory;
use recruit_core::gateway::{GatewayError, UserProfile};

#[derive(Debug, Default)]
pub struct FakeDirectory {
    profiles: Mutex<HashMap<String, UserProfile>>,
    failing: Mutex<HashSet<String>>,
    lookups: AtomicUsize,
}

impl FakeDirectory {
    pub fn with_profiles(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        let directory = Self::default();
        for profile in profiles {
            directory.insert(profile);
        }
        directory
    }

    pub fn insert(&self, profile: UserProfile) {
        let id = profile.id.clone().unwrap_or_default();
        self.profiles.lock().insert(id, profile);
    }

    /// Lookups for `user_id` fail as if the peer returned a 500
    pub fn fail_for(&self, user_id: &str) {
        self.failing.lock().insert(user_id.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, GatewayError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(user_id) {
            return Err(GatewayError::Provider {
                operation: "get_user_by_id".to_string(),
                message: "Internal Server Error".to_string(),
            });
        }
        Ok(self.profiles.lock().get(user_id).cloned())
    }
}
