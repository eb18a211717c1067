//! Key registry: `key -> bucket -> guard`.
//!
//! Guards are created lazily the first time a transaction touches a key and
//! shared through `Arc`, so a transaction keeps its guards alive while it
//! holds them even if the registry drops the entry. What happens to guards
//! that fall idle is decided by [`RegistryPolicy`].

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;
use txmap_common::config::RegistryPolicy;

use crate::guard::Guard;
use crate::op::Bucket;

/// The per-key guards, one per key-scoped bucket.
#[derive(Debug, Default)]
pub struct KeyGuards {
    modify: Guard,
    get: Guard,
    contains: Guard,
}

impl KeyGuards {
    /// Returns the guard for `bucket`.
    ///
    /// # Panics
    ///
    /// Panics for [`Bucket::Size`], which is not scoped to a key.
    pub fn bucket(&self, bucket: Bucket) -> &Guard {
        match bucket {
            Bucket::Modify => &self.modify,
            Bucket::Get => &self.get,
            Bucket::Contains => &self.contains,
            Bucket::Size => panic!("the size guard is map-wide, not per key"),
        }
    }

    /// Returns true if every guard of the key is idle.
    pub fn is_idle(&self) -> bool {
        self.modify.is_idle() && self.get.is_idle() && self.contains.is_idle()
    }
}

/// A resolved guard a transaction can acquire and release.
#[derive(Clone)]
pub(crate) enum GuardHandle<K> {
    Key {
        key: K,
        bucket: Bucket,
        guards: Arc<KeyGuards>,
    },
    Size(Arc<Guard>),
}

impl<K> GuardHandle<K> {
    pub(crate) fn guard(&self) -> &Guard {
        match self {
            GuardHandle::Key { bucket, guards, .. } => guards.bucket(*bucket),
            GuardHandle::Size(guard) => guard,
        }
    }

    pub(crate) fn bucket(&self) -> Bucket {
        match self {
            GuardHandle::Key { bucket, .. } => *bucket,
            GuardHandle::Size(_) => Bucket::Size,
        }
    }
}

/// Concurrent registry of guards.
pub struct KeyRegistry<K> {
    keys: DashMap<K, Arc<KeyGuards>>,
    size: Arc<Guard>,
    policy: RegistryPolicy,
    evicted: AtomicU64,
}

impl<K: Eq + Hash + Clone> KeyRegistry<K> {
    /// Creates an empty registry.
    pub fn new(policy: RegistryPolicy) -> Self {
        Self {
            keys: DashMap::new(),
            size: Arc::new(Guard::new()),
            policy,
            evicted: AtomicU64::new(0),
        }
    }

    /// Returns the guards for `key`, creating them on first use.
    pub fn guards(&self, key: &K) -> Arc<KeyGuards> {
        if let Some(existing) = self.keys.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self.keys.entry(key.clone()).or_default();
        Arc::clone(entry.value())
    }

    pub(crate) fn handle(&self, key: &K, bucket: Bucket) -> GuardHandle<K> {
        if bucket == Bucket::Size {
            return self.size_handle();
        }
        GuardHandle::Key {
            key: key.clone(),
            bucket,
            guards: self.guards(key),
        }
    }

    pub(crate) fn size_handle(&self) -> GuardHandle<K> {
        GuardHandle::Size(Arc::clone(&self.size))
    }

    /// Returns the map-wide size guard.
    pub fn size_guard(&self) -> &Guard {
        &self.size
    }

    /// Returns the number of keys with registered guards.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no key has registered guards.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Eq + Hash> KeyRegistry<K> {
    /// Returns the eviction policy.
    pub fn policy(&self) -> RegistryPolicy {
        self.policy
    }

    /// Returns how many keys have been evicted so far.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Drops the guards of `keys` that are idle and unreferenced.
    ///
    /// Does nothing under [`RegistryPolicy::Retain`]. Callers must have
    /// dropped their own handles first. Returns the number of evicted keys.
    pub(crate) fn evict_idle<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        if self.policy == RegistryPolicy::Retain {
            return 0;
        }
        let mut evicted = 0;
        for key in keys {
            let removed = self.keys.remove_if(key, |_, guards| {
                Arc::strong_count(guards) == 1 && guards.is_idle()
            });
            if removed.is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            trace!(evicted, remaining = self.keys.len(), "evicted idle key guards");
        }
        evicted
    }
}

impl<K> std::fmt::Debug for KeyRegistry<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("policy", &self.policy)
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish()
    }
}
