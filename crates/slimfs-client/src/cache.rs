// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bounded map with per-entry expiry and least-recently-used eviction

use std::borrow::Borrow;
use std::hash::Hash;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

#[derive(Debug)]
struct Slot<V> {
    inserted: Instant,
    value: V,
}

/// Entries are kept in recency order: index 0 is the least recently used.
/// Expired entries are dropped lazily when they are looked up, or when
/// they reach the front of the order and get evicted.
#[derive(Debug)]
pub struct TtlLru<K, V> {
    ttl: Duration,
    capacity: usize,
    entries: IndexMap<K, Slot<V>>,
}

impl<K: Hash + Eq, V> TtlLru<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`, marking it most recently used.
    pub fn get_at<Q>(&mut self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.entries.get_index_of(key)?;
        let inserted = self.entries.get_index(index)?.1.inserted;
        if now.saturating_duration_since(inserted) > self.ttl {
            self.entries.shift_remove_index(index);
            return None;
        }

        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, slot)| &slot.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Insert or replace `key`, evicting the least recently used entry when
    /// the map is full.
    pub fn insert_at(&mut self, key: K, value: V, inserted: Instant) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.shift_remove(&key).is_none() && self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, Slot { inserted, value });
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.shift_remove(key).map(|slot| slot.value)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|key, slot| keep(key, &slot.value));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn entries_expire_after_ttl() {
        let start = Instant::now();
        let mut cache = TtlLru::new(TTL, 4);
        cache.insert_at("a".to_string(), 1, start);

        assert_eq!(cache.get_at("a", start + TTL), Some(&1));
        assert_eq!(cache.get_at("a", start + TTL + Duration::from_millis(1)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let now = Instant::now();
        let mut cache = TtlLru::new(TTL, 2);
        cache.insert_at("a", 1, now);
        cache.insert_at("b", 2, now);

        // Touch "a" so that "b" becomes the eviction candidate.
        assert_eq!(cache.get_at("a", now), Some(&1));
        cache.insert_at("c", 3, now);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("b", now), None);
        assert_eq!(cache.get_at("a", now), Some(&1));
        assert_eq!(cache.get_at("c", now), Some(&3));
    }

    #[test]
    fn replacing_refreshes_without_evicting() {
        let start = Instant::now();
        let mut cache = TtlLru::new(TTL, 2);
        cache.insert_at("a", 1, start);
        cache.insert_at("b", 2, start);
        cache.insert_at("a", 10, start + TTL);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("a", start + TTL + TTL / 2), Some(&10));
        assert_eq!(cache.get_at("b", start + TTL + TTL / 2), None);
    }

    #[test]
    fn remove_and_zero_capacity() {
        let mut cache = TtlLru::new(TTL, 1);
        cache.insert("k", 5);
        assert_eq!(cache.remove("k"), Some(5));
        assert_eq!(cache.remove("k"), None);

        let mut disabled = TtlLru::new(TTL, 0);
        disabled.insert("k", 1);
        assert!(disabled.get("k").is_none());
    }

    #[test]
    fn retain_keeps_recency_order() {
        let now = Instant::now();
        let mut cache = TtlLru::new(TTL, 3);
        cache.insert_at("/a", 1, now);
        cache.insert_at("/a/b", 2, now);
        cache.insert_at("/c", 3, now);
        cache.retain(|key, _| !key.starts_with("/a/"));

        assert_eq!(cache.len(), 2);
        cache.insert_at("/d", 4, now);
        cache.insert_at("/e", 5, now);
        assert_eq!(cache.get_at("/a", now), None);
        assert_eq!(cache.get_at("/c", now), Some(&3));
    }
}
