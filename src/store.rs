//! Grant stores: one payment grant per resource key
//!
//! The [`GrantStore`] trait is the only path through which grants change.
//! Reads never mutate; expiry is computed from `expires_at` at check time.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{PaymentGrant, ResourceKey};
use crate::Result;

/// Keyed storage for payment grants
pub trait GrantStore: Send + Sync {
    /// Grant held for `key`, if any
    fn get(&self, key: &ResourceKey) -> Result<Option<PaymentGrant>>;

    /// Store `grant` for `key`, replacing any previous grant
    fn put(&self, key: &ResourceKey, grant: PaymentGrant) -> Result<()>;

    /// Remove the grant for `key`
    fn delete(&self, key: &ResourceKey) -> Result<()>;

    /// Remove every grant
    fn clear(&self) -> Result<()>;

    /// Whether a time-boxed grant for `key` is valid at `now`
    fn is_valid(&self, key: &ResourceKey, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .get(key)?
            .map(|grant| grant.is_valid_at(now))
            .unwrap_or(false))
    }
}

/// In-memory, per-session grant store
#[derive(Debug, Clone, Default)]
pub struct MemoryGrantStore {
    grants: Arc<RwLock<HashMap<ResourceKey, PaymentGrant>>>,
}

impl MemoryGrantStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of grants held
    pub fn len(&self) -> usize {
        self.grants.read().len()
    }

    /// Whether the store holds no grants
    pub fn is_empty(&self) -> bool {
        self.grants.read().is_empty()
    }
}

impl GrantStore for MemoryGrantStore {
    fn get(&self, key: &ResourceKey) -> Result<Option<PaymentGrant>> {
        Ok(self.grants.read().get(key).cloned())
    }

    fn put(&self, key: &ResourceKey, grant: PaymentGrant) -> Result<()> {
        self.grants.write().insert(key.clone(), grant);
        Ok(())
    }

    fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.grants.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.grants.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GrantStatus, PaymentRequirement};
    use chrono::Duration;
    use serde_json::json;

    fn requirement(payment_id: &str) -> PaymentRequirement {
        serde_json::from_value(json!({
            "payment_id": payment_id,
            "amount_usd": 0.01,
            "amount_satoshis": 1000
        }))
        .unwrap()
    }

    #[test]
    fn test_put_overwrites_existing_grant() {
        let store = MemoryGrantStore::new();
        let key = ResourceKey::api("ml-inference", "predict");

        store.put(&key, PaymentGrant::pending(&requirement("pay_1"))).unwrap();
        store.put(&key, PaymentGrant::pending(&requirement("pay_2"))).unwrap();

        let grant = store.get(&key).unwrap().unwrap();
        assert_eq!(grant.payment_id, "pay_2");
        assert_eq!(grant.status, GrantStatus::Pending);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = MemoryGrantStore::new();
        let a = ResourceKey::from("a:x");
        let b = ResourceKey::from("b:y");
        store.put(&a, PaymentGrant::pending(&requirement("1"))).unwrap();
        store.put(&b, PaymentGrant::pending(&requirement("2"))).unwrap();

        store.delete(&a).unwrap();
        assert!(store.get(&a).unwrap().is_none());
        assert!(store.get(&b).unwrap().is_some());

        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_is_valid_uses_exclusive_expiry() {
        let store = MemoryGrantStore::new();
        let key = ResourceKey::from("abc123");
        let now = Utc::now();
        let grant = PaymentGrant::pending(&requirement("p9")).time_boxed(now + Duration::seconds(300));
        store.put(&key, grant).unwrap();

        assert!(store.is_valid(&key, now).unwrap());
        assert!(!store.is_valid(&key, now + Duration::seconds(300)).unwrap());
        assert!(!store.is_valid(&ResourceKey::from("unknown"), now).unwrap());
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryGrantStore::new();
        let other = store.clone();
        let key = ResourceKey::from("weather:current");
        other.put(&key, PaymentGrant::pending(&requirement("1"))).unwrap();
        assert!(store.get(&key).unwrap().is_some());
    }
}
