//! Deduplication of concurrent fetches for the same key.
//!
//! The first caller to claim a key becomes its leader and performs the
//! fetch; everyone else claiming the same key while it is in flight
//! becomes a follower and blocks on the leader's result. Entries are
//! removed the moment the leader publishes, so nothing is cached beyond
//! the overlapping requests, and a later claim of the same key starts a
//! fresh fetch.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

pub struct InflightMap<K, V> {
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

struct Slot<V> {
    result: Mutex<Option<Result<V, String>>>,
    ready: Condvar,
}

pub enum Claim<'a, K: Eq + Hash + Clone, V: Clone> {
    Leader(Leader<'a, K, V>),
    Follower(Follower<V>),
}

/// The claim that owns the fetch. Publishing resolves every follower;
/// dropping without publishing resolves them with a failure instead of
/// leaving them blocked.
pub struct Leader<'a, K: Eq + Hash + Clone, V: Clone> {
    map: &'a InflightMap<K, V>,
    key: K,
    slot: Arc<Slot<V>>,
    published: bool,
}

pub struct Follower<V> {
    slot: Arc<Slot<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> InflightMap<K, V> {
    pub fn new() -> Self {
        InflightMap {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn claim(&self, key: K) -> Claim<'_, K, V> {
        let mut slots = self.slots.lock().expect("inflight lock poisoned");
        if let Some(slot) = slots.get(&key) {
            return Claim::Follower(Follower { slot: slot.clone() });
        }
        let slot = Arc::new(Slot {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        slots.insert(key.clone(), slot.clone());
        Claim::Leader(Leader {
            map: self,
            key,
            slot,
            published: false,
        })
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Leader<'_, K, V> {
    /// Hands the outcome to every follower and retires the entry.
    pub fn publish(mut self, outcome: Result<V, String>) {
        self.resolve(outcome);
    }

    fn resolve(&mut self, outcome: Result<V, String>) {
        // retire the entry first so a fresh claim starts a new fetch
        self.map
            .slots
            .lock()
            .expect("inflight lock poisoned")
            .remove(&self.key);
        *self.slot.result.lock().expect("inflight lock poisoned") = Some(outcome);
        self.slot.ready.notify_all();
        self.published = true;
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Drop for Leader<'_, K, V> {
    fn drop(&mut self) {
        if !self.published {
            self.resolve(Err("fetch abandoned before completion".into()));
        }
    }
}

impl<V: Clone> Follower<V> {
    /// Blocks until the leader publishes.
    pub fn wait(self) -> Result<V, String> {
        let mut result = self.slot.result.lock().expect("inflight lock poisoned");
        while result.is_none() {
            result = self
                .slot
                .ready
                .wait(result)
                .expect("inflight lock poisoned");
        }
        result.clone().expect("checked above")
    }
}
