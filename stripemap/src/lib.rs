//! Striped concurrent hash map.
//!
//! The key space is split into stripes, each guarded by its own mutex and
//! owning a fixed handful of chained buckets, so the lock radius of any
//! single operation is one stripe. `len` is the exception: it locks every
//! stripe in ascending index order and is not meant for hot paths.
//!
//! Geometry: with `S` stripes there are `S * 10` buckets. A key's global
//! bucket index is `hash % (S * 10)` and its stripe is `hash % S`; the two
//! are congruent modulo `S`, so stripe `i` owns exactly the buckets whose
//! index is `i` mod `S` and every key lands in one bucket of one stripe.

use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

const BUCKETS_PER_STRIPE: usize = 10;

struct Stripe<K, V> {
    // buckets[b] holds the chain for global bucket index b * S + stripe.
    buckets: Vec<Vec<(K, V)>>,
    len: usize,
}

impl<K, V> Stripe<K, V> {
    fn new() -> Self {
        Self {
            buckets: (0..BUCKETS_PER_STRIPE).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }
}

/// Concurrent map with per-stripe mutual exclusion and chained buckets.
pub struct StripedMap<K, V, S = RandomState> {
    stripes: Vec<Mutex<Stripe<K, V>>>,
    hasher: S,
}

impl<K: Eq + Hash, V: Clone> StripedMap<K, V> {
    /// Map with one stripe per hardware thread.
    pub fn new() -> Self {
        let stripes = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_stripes(stripes)
    }

    /// Map with an explicit stripe count.
    pub fn with_stripes(stripes: usize) -> Self {
        assert!(stripes > 0, "stripe count must be > 0");
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(Stripe::new())).collect(),
            hasher: RandomState::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Default for StripedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V: Clone, S: BuildHasher> StripedMap<K, V, S> {
    /// Stripe index and the stripe-local bucket index for a key.
    fn locate(&self, key: &K) -> (usize, usize) {
        let hash = self.hasher.hash_one(key);
        let stripes = self.stripes.len() as u64;
        let bucket = hash % (stripes * BUCKETS_PER_STRIPE as u64);
        ((bucket % stripes) as usize, (bucket / stripes) as usize)
    }

    /// Inserts only if the key is absent. Returns whether it inserted.
    pub fn insert(&self, key: K, value: V) -> bool {
        let (stripe_idx, bucket_idx) = self.locate(&key);
        let mut stripe = self.stripes[stripe_idx].lock();
        let bucket = &mut stripe.buckets[bucket_idx];

        if bucket.iter().any(|(k, _)| *k == key) {
            return false;
        }
        bucket.push((key, value));
        stripe.len += 1;
        true
    }

    /// Inserts or overwrites.
    pub fn upsert(&self, key: K, value: V) {
        let (stripe_idx, bucket_idx) = self.locate(&key);
        let mut stripe = self.stripes[stripe_idx].lock();
        let bucket = &mut stripe.buckets[bucket_idx];

        for (k, v) in bucket.iter_mut() {
            if *k == key {
                *v = value;
                return;
            }
        }
        bucket.push((key, value));
        stripe.len += 1;
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        let (stripe_idx, bucket_idx) = self.locate(key);
        let stripe = self.stripes[stripe_idx].lock();
        stripe.buckets[bucket_idx]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Removes the key if present. Returns whether it removed.
    pub fn erase(&self, key: &K) -> bool {
        let (stripe_idx, bucket_idx) = self.locate(key);
        let mut stripe = self.stripes[stripe_idx].lock();
        let bucket = &mut stripe.buckets[bucket_idx];

        match bucket.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.swap_remove(pos);
                stripe.len -= 1;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_some()
    }

    /// Entry count. Locks all stripes in ascending order; heavy, keep off
    /// hot paths.
    pub fn len(&self) -> usize {
        let guards: Vec<_> = self.stripes.iter().map(|s| s.lock()).collect();
        guards.iter().map(|s| s.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}
