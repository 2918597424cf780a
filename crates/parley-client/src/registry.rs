//! Subscription registry.
//!
//! Maps each [`ChannelKey`] to its callback and, while connected, to the
//! transport handle (`sub-<n>`) the server tags its MESSAGE frames with.
//! The callback map is the durable part; handles belong to one connection
//! generation and are rebuilt after every (re)connect.
//!
//! The registry is the single source of truth consulted for every inbound
//! frame, so a key removed here stops receiving immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_shared::protocol::InboundMessage;
use parley_shared::types::ChannelKey;

/// Invoked on the inbound-delivery task. Must not block.
pub type Callback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Transport-level identity of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: String,
    pub destination: String,
    pub generation: u64,
}

struct Entry {
    callback: Callback,
    handle: Option<SubscriptionHandle>,
    /// Sequence number of `handle`; orders keys sharing a destination.
    bound_seq: u64,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<ChannelKey, Entry>,
    by_handle: HashMap<String, ChannelKey>,
    next_handle: u64,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback. Returns `false`, leaving the existing entry
    /// untouched, if the key is already registered.
    pub fn insert(&self, key: ChannelKey, callback: Callback) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(&key) {
            return false;
        }
        state.entries.insert(
            key,
            Entry {
                callback,
                handle: None,
                bound_seq: 0,
            },
        );
        true
    }

    /// Allocate a transport handle for a registered key that has none yet.
    ///
    /// Returns `None` if the key is unknown or already bound, so concurrent
    /// binders issue at most one SUBSCRIBE per key and generation.
    pub fn bind(
        &self,
        key: &ChannelKey,
        destination: String,
        generation: u64,
    ) -> Option<SubscriptionHandle> {
        let mut state = self.lock();
        let seq = state.next_handle;
        let id = format!("sub-{seq}");

        let entry = state.entries.get_mut(key)?;
        if entry.handle.is_some() {
            return None;
        }
        let handle = SubscriptionHandle {
            id: id.clone(),
            destination,
            generation,
        };
        entry.handle = Some(handle.clone());
        entry.bound_seq = seq;

        state.next_handle += 1;
        state.by_handle.insert(id, key.clone());
        Some(handle)
    }

    /// Remove a key. Returns its transport handle when it was bound.
    /// Unknown keys are a no-op.
    pub fn remove(&self, key: &ChannelKey) -> Option<SubscriptionHandle> {
        let mut state = self.lock();
        let handle = state.entries.remove(key)?.handle?;
        state.by_handle.remove(&handle.id);
        Some(handle)
    }

    /// Drop every subscription at once. Returns the handles that were bound.
    pub fn teardown_all(&self) -> Vec<SubscriptionHandle> {
        let mut state = self.lock();
        state.by_handle.clear();
        state
            .entries
            .drain()
            .filter_map(|(_, entry)| entry.handle)
            .collect()
    }

    /// Forget transport handles but keep callbacks for resubscription.
    pub fn invalidate_handles(&self) {
        let mut state = self.lock();
        state.by_handle.clear();
        for entry in state.entries.values_mut() {
            entry.handle = None;
        }
    }

    /// Keys that still need a SUBSCRIBE on the current connection.
    pub fn unbound_keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.handle.is_none())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Find the channel an inbound frame belongs to.
    ///
    /// The `subscription` header wins; the destination is only used for
    /// frames that lack one. When several keys are bound to that
    /// destination the earliest-bound one receives the frame. Unbound keys
    /// never match.
    pub fn resolve(
        &self,
        subscription: Option<&str>,
        destination: Option<&str>,
    ) -> Option<(ChannelKey, Callback)> {
        let state = self.lock();

        if let Some(id) = subscription {
            let key = state.by_handle.get(id)?;
            let entry = state.entries.get(key)?;
            return Some((key.clone(), entry.callback.clone()));
        }

        let destination = destination?;
        state
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .handle
                    .as_ref()
                    .is_some_and(|h| h.destination == destination)
            })
            .min_by_key(|(_, entry)| entry.bound_seq)
            .map(|(key, entry)| (key.clone(), entry.callback.clone()))
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn handle(&self, key: &ChannelKey) -> Option<SubscriptionHandle> {
        self.lock().entries.get(key)?.handle.clone()
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn noop() -> Callback {
        Arc::new(|_: InboundMessage| {})
    }

    #[test]
    fn test_insert_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let key = ChannelKey::new("room:1");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        assert!(registry.insert(
            key.clone(),
            Arc::new(move |_: InboundMessage| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            })
        ));
        assert!(!registry.insert(key.clone(), noop()));
        assert_eq!(registry.len(), 1);

        // The first callback is the one kept.
        registry.bind(&key, "/topic/room.1".into(), 1);
        let (_, callback) = registry.resolve(Some("sub-0"), None).unwrap();
        callback(InboundMessage::Recall(parley_shared::protocol::RecallEvent {
            message_id: parley_shared::types::MessageId(1),
            room_id: parley_shared::types::RoomId(1),
            timestamp: None,
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bind_once_per_generation() {
        let registry = SubscriptionRegistry::new();
        let key = ChannelKey::new("user-status");
        registry.insert(key.clone(), noop());

        let handle = registry.bind(&key, "/topic/user-status".into(), 1).unwrap();
        assert_eq!(handle.id, "sub-0");
        assert!(registry.bind(&key, "/topic/user-status".into(), 1).is_none());
        assert!(registry
            .bind(&ChannelKey::new("unknown"), "/topic/unknown".into(), 1)
            .is_none());
    }

    #[test]
    fn test_resolve_by_handle_then_destination() {
        let registry = SubscriptionRegistry::new();
        let room = ChannelKey::new("room:1");
        let status = ChannelKey::new("user-status");
        registry.insert(room.clone(), noop());
        registry.insert(status.clone(), noop());
        registry.bind(&room, "/topic/room.1".into(), 1);
        registry.bind(&status, "/topic/user-status".into(), 1);

        let (key, _) = registry.resolve(Some("sub-1"), None).unwrap();
        assert_eq!(key, status);
        let (key, _) = registry.resolve(None, Some("/topic/room.1")).unwrap();
        assert_eq!(key, room);
        assert!(registry.resolve(Some("sub-9"), Some("/topic/room.1")).is_none());
        assert!(registry.resolve(None, None).is_none());
    }

    #[test]
    fn test_unbound_key_does_not_resolve() {
        let registry = SubscriptionRegistry::new();
        registry.insert(ChannelKey::new("room:1"), noop());
        assert!(registry.resolve(None, Some("/topic/room.1")).is_none());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.remove(&ChannelKey::new("room:404")).is_none());
    }

    #[test]
    fn test_remove_stops_resolution() {
        let registry = SubscriptionRegistry::new();
        let key = ChannelKey::new("room:1");
        registry.insert(key.clone(), noop());
        registry.bind(&key, "/topic/room.1".into(), 1);

        let handle = registry.remove(&key).unwrap();
        assert_eq!(handle.id, "sub-0");
        assert!(registry.resolve(Some("sub-0"), None).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_teardown_all_clears_everything() {
        let registry = SubscriptionRegistry::new();
        let a = ChannelKey::new("room:1");
        let b = ChannelKey::new("room:2");
        registry.insert(a.clone(), noop());
        registry.insert(b.clone(), noop());
        registry.bind(&a, "/topic/room.1".into(), 1);

        let handles = registry.teardown_all();
        assert_eq!(handles.len(), 1);
        assert!(registry.is_empty());
        assert!(registry.resolve(Some("sub-0"), None).is_none());
    }

    #[test]
    fn test_invalidate_keeps_callbacks() {
        let registry = SubscriptionRegistry::new();
        let a = ChannelKey::new("room:1");
        let b = ChannelKey::new("room:2");
        registry.insert(a.clone(), noop());
        registry.insert(b.clone(), noop());
        registry.bind(&a, "/topic/room.1".into(), 1);
        registry.bind(&b, "/topic/room.2".into(), 1);

        registry.invalidate_handles();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.unbound_keys(), vec![a.clone(), b]);
        assert!(registry.resolve(Some("sub-0"), None).is_none());

        let rebound = registry.bind(&a, "/topic/room.1".into(), 2).unwrap();
        assert_eq!(rebound.id, "sub-2");
        assert_eq!(rebound.generation, 2);
    }

    #[test]
    fn test_shared_destination_routes_to_earliest_binding() {
        let registry = SubscriptionRegistry::new();
        let first = ChannelKey::new("room:1");
        let second = ChannelKey::new("room.1");
        registry.insert(second.clone(), noop());
        registry.insert(first.clone(), noop());
        registry.bind(&first, "/topic/room.1".into(), 1);
        registry.bind(&second, "/topic/room.1".into(), 1);

        for _ in 0..8 {
            let (key, _) = registry.resolve(None, Some("/topic/room.1")).unwrap();
            assert_eq!(key, first);
        }

        registry.remove(&first);
        let (key, _) = registry.resolve(None, Some("/topic/room.1")).unwrap();
        assert_eq!(key, second);
    }
}
