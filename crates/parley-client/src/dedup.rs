//! Bounded memory of recently dispatched message ids.
//!
//! Two eviction policies are available:
//!
//! - [`EvictionPolicy::EvictOldest`] (default): ring buffer, the oldest id
//!   is forgotten when a new one would exceed capacity. No blind spot.
//! - [`EvictionPolicy::ClearAll`]: the whole set is dropped once it is
//!   full and the new id starts a fresh set. Matches older clients; a burst
//!   of replays right after a clear is delivered again.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::str::FromStr;

use parley_shared::protocol::DedupKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    #[default]
    EvictOldest,
    ClearAll,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict-oldest" | "lru" | "ring" => Ok(Self::EvictOldest),
            "clear-all" | "clear" => Ok(Self::ClearAll),
            other => Err(format!("unknown dedup policy: {other}")),
        }
    }
}

#[derive(Debug)]
pub struct DedupCache<K = DedupKey> {
    capacity: usize,
    policy: EvictionPolicy,
    order: VecDeque<K>,
    members: HashSet<K>,
}

impl<K: Copy + Eq + Hash> DedupCache<K> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn seen(&self, id: &K) -> bool {
        self.members.contains(id)
    }

    /// Record an id. Returns `false` if it was already present.
    pub fn remember(&mut self, id: K) -> bool {
        if self.members.contains(&id) {
            return false;
        }

        if self.members.len() >= self.capacity {
            match self.policy {
                EvictionPolicy::EvictOldest => {
                    if let Some(oldest) = self.order.pop_front() {
                        self.members.remove(&oldest);
                    }
                }
                EvictionPolicy::ClearAll => self.clear(),
            }
        }

        self.order.push_back(id);
        self.members.insert(id);
        true
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_and_seen() {
        let mut cache: DedupCache<u64> = DedupCache::new(4, EvictionPolicy::EvictOldest);
        assert!(!cache.seen(&1));
        assert!(cache.remember(1));
        assert!(cache.seen(&1));
        assert!(!cache.remember(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_oldest_forgets_first_id_only() {
        let capacity = 1000;
        let mut cache: DedupCache<u64> = DedupCache::new(capacity, EvictionPolicy::EvictOldest);
        for id in 0..=capacity as u64 {
            assert!(cache.remember(id));
        }

        assert!(!cache.seen(&0));
        assert!(cache.seen(&1));
        assert!(cache.seen(&(capacity as u64)));
        assert_eq!(cache.len(), capacity);
    }

    #[test]
    fn test_clear_all_restarts_with_newest_id() {
        let capacity = 1000;
        let mut cache: DedupCache<u64> = DedupCache::new(capacity, EvictionPolicy::ClearAll);
        for id in 0..=capacity as u64 {
            assert!(cache.remember(id));
        }

        assert!(!cache.seen(&0));
        assert!(!cache.seen(&1));
        assert!(cache.seen(&(capacity as u64)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_duplicate_does_not_evict() {
        let mut cache: DedupCache<u64> = DedupCache::new(2, EvictionPolicy::EvictOldest);
        cache.remember(1);
        cache.remember(2);
        assert!(!cache.remember(2));
        assert!(cache.seen(&1));
    }

    #[test]
    fn test_zero_capacity_is_bounded_to_one() {
        let mut cache: DedupCache<u64> = DedupCache::new(0, EvictionPolicy::EvictOldest);
        cache.remember(1);
        cache.remember(2);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.seen(&2));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("clear-all".parse::<EvictionPolicy>(), Ok(EvictionPolicy::ClearAll));
        assert_eq!(
            "Evict-Oldest".parse::<EvictionPolicy>(),
            Ok(EvictionPolicy::EvictOldest)
        );
        assert!("fifo-ish".parse::<EvictionPolicy>().is_err());
    }
}
