//! Registry of in-flight reads.
//!
//! At most one pending operation exists per [`CacheKey`]. Callers that arrive
//! while it is pending receive a clone of the same shared handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, Shared};

use super::keys::CacheKey;
use crate::error::ApiError;

/// Handle every interested caller awaits for the outcome of one fetch.
pub type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ApiError>>>;

struct PendingOperation<V> {
    id: u64,
    handle: SharedFetch<V>,
}

/// What the caller-supplied launcher decided once the slot was reserved.
pub enum Launch<V> {
    Pending(SharedFetch<V>),
    /// The value became available while the slot was being claimed; nothing is registered.
    Resolved(V),
}

/// Result of [`InFlightRegistry::join_or_register`].
pub enum Claim<V> {
    Joined(SharedFetch<V>),
    Started(SharedFetch<V>),
    Resolved(V),
}

pub struct InFlightRegistry<V> {
    pending: DashMap<CacheKey, PendingOperation<V>>,
    next_id: AtomicU64,
}

impl<V> Default for InFlightRegistry<V> {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<V> InFlightRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the operation pending under `key`, or start one with `launch`.
    ///
    /// The lookup and the insert happen under the same shard lock, so two
    /// callers can never both launch for the same key. `launch` receives the
    /// operation id that must later be passed to [`InFlightRegistry::complete`].
    pub fn join_or_register<F>(&self, key: &CacheKey, launch: F) -> Claim<V>
    where
        F: FnOnce(u64) -> Launch<V>,
    {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(occupied) => Claim::Joined(occupied.get().handle.clone()),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                match launch(id) {
                    Launch::Pending(handle) => {
                        vacant.insert(PendingOperation {
                            id,
                            handle: handle.clone(),
                        });
                        Claim::Started(handle)
                    }
                    Launch::Resolved(value) => Claim::Resolved(value),
                }
            }
        }
    }

    /// Remove the entry for `key` if it still belongs to operation `id`.
    pub fn complete(&self, key: &CacheKey, id: u64) -> bool {
        self.pending.remove_if(key, |_, op| op.id == id).is_some()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Removes the registry entry when the owning operation finishes, including by panic.
pub(crate) struct CompletionGuard<V> {
    pub(crate) registry: Arc<InFlightRegistry<V>>,
    pub(crate) key: CacheKey,
    pub(crate) id: u64,
}

impl<V> Drop for CompletionGuard<V> {
    fn drop(&mut self) {
        self.registry.complete(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    fn ready(value: u32) -> SharedFetch<u32> {
        async move { Ok::<_, ApiError>(value) }.boxed().shared()
    }

    #[tokio::test]
    async fn second_claim_joins_the_first() {
        let registry = InFlightRegistry::new();
        let key = CacheKey::endpoint("/makes");

        let mut started_id = 0;
        let first = registry.join_or_register(&key, |id| {
            started_id = id;
            Launch::Pending(ready(7))
        });
        assert!(matches!(first, Claim::Started(_)));

        let second = registry.join_or_register(&key, |_| panic!("must not launch twice"));
        let Claim::Joined(handle) = second else {
            panic!("expected join");
        };
        assert_eq!(handle.await.expect("value"), 7);

        assert!(registry.complete(&key, started_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn complete_ignores_stale_operation_ids() {
        let registry = InFlightRegistry::new();
        let key = CacheKey::endpoint("/k");
        let mut id = 0;
        registry.join_or_register(&key, |assigned| {
            id = assigned;
            Launch::Pending(ready(1))
        });

        assert!(!registry.complete(&key, id + 100));
        assert!(registry.contains(&key));
        assert!(registry.complete(&key, id));
        assert!(!registry.complete(&key, id));
    }

    #[test]
    fn resolved_launch_registers_nothing() {
        let registry = InFlightRegistry::new();
        let key = CacheKey::endpoint("/k");
        let claim = registry.join_or_register(&key, |_| Launch::Resolved(3_u32));
        assert!(matches!(claim, Claim::Resolved(3)));
        assert!(registry.is_empty());
    }

    #[test]
    fn guard_releases_entry_on_drop() {
        let registry = Arc::new(InFlightRegistry::new());
        let key = CacheKey::endpoint("/k");
        let mut id = 0;
        registry.join_or_register(&key, |assigned| {
            id = assigned;
            Launch::Pending(ready(1))
        });

        drop(CompletionGuard {
            registry: Arc::clone(&registry),
            key: key.clone(),
            id,
        });
        assert!(!registry.contains(&key));
    }
}
