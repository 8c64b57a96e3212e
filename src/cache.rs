//! S3-FIFO cache holding page frames of the file-backed store.
//!
//! ```text
//!   insert ──► small ──(freq > 1)──► main ──(freq == 0)──► dropped
//!                │                    ▲  └─(freq > 0, freq -= 1)─┘
//!                └──(cold)──► ghost ──┘ (re-inserted keys skip small)
//! ```
//!
//! Keys live in the FIFO queues, values in one map. Ghost entries keep only
//! the key so a page that comes back soon after eviction goes straight to main.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
};

/// Maximum frequency limit for an entry in the cache.
const MAX_FREQUENCY: u8 = 3;

struct Slot<V> {
    value: V,
    freq: u8,
}

pub struct Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    capacity: usize,
    small_capacity: usize,
    small: VecDeque<K>,
    main: VecDeque<K>,
    ghost: VecDeque<K>,
    ghost_keys: HashSet<K>,
    slots: HashMap<K, Slot<V>>,
    hits: usize,
    misses: usize,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Cache {
            capacity,
            small_capacity: (capacity / 10).max(1),
            small: VecDeque::new(),
            main: VecDeque::new(),
            ghost: VecDeque::new(),
            ghost_keys: HashSet::new(),
            slots: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached value and bumps its frequency.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.slots.get_mut(key) {
            Some(slot) => {
                slot.freq = (slot.freq + 1).min(MAX_FREQUENCY);
                self.hits += 1;
                Some(&slot.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.value = value;
            return;
        }
        while self.slots.len() >= self.capacity {
            if !self.evict() {
                break;
            }
        }
        if self.ghost_keys.remove(&key) {
            self.ghost.retain(|k| k != &key);
            self.main.push_back(key.clone());
        } else {
            self.small.push_back(key.clone());
        }
        self.slots.insert(key, Slot { value, freq: 0 });
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.small.retain(|k| k != key);
        self.main.retain(|k| k != key);
        Some(slot.value)
    }

    /// Drops every entry whose key fails the predicate, ghosts included.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.slots.retain(|k, _| keep(k));
        let slots = &self.slots;
        self.small.retain(|k| slots.contains_key(k));
        self.main.retain(|k| slots.contains_key(k));
        self.ghost_keys.retain(|k| keep(k));
        let ghosts = &self.ghost_keys;
        self.ghost.retain(|k| ghosts.contains(k));
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    /// Evicts one entry. Returns false when nothing could be evicted.
    fn evict(&mut self) -> bool {
        loop {
            let from_small =
                !self.small.is_empty() && (self.small.len() >= self.small_capacity || self.main.is_empty());
            if from_small {
                let Some(key) = self.small.pop_front() else {
                    return false;
                };
                let freq = self.slots.get(&key).map_or(0, |s| s.freq);
                if freq > 1 {
                    if let Some(slot) = self.slots.get_mut(&key) {
                        slot.freq = 0;
                    }
                    self.main.push_back(key);
                    continue;
                }
                self.slots.remove(&key);
                self.push_ghost(key);
                return true;
            }

            let Some(key) = self.main.pop_front() else {
                return false;
            };
            match self.slots.get_mut(&key) {
                Some(slot) if slot.freq > 0 => {
                    slot.freq -= 1;
                    self.main.push_back(key);
                }
                _ => {
                    self.slots.remove(&key);
                    return true;
                }
            }
        }
    }

    fn push_ghost(&mut self, key: K) {
        if self.ghost.len() >= self.capacity {
            if let Some(old) = self.ghost.pop_front() {
                self.ghost_keys.remove(&old);
            }
        }
        self.ghost_keys.insert(key.clone());
        self.ghost.push_back(key);
    }
}
