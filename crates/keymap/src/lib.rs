//! # Keymap
//!
//! Two-way mapping between long-lived server objects and the short textual keys
//! the client uses to address them.
//!
//! ## Invariants
//!
//! - **Inverse Maps**: `forward` (identity -> key) and `reverse` (key -> object)
//!   always hold the same set of entries.
//! - **No Reuse**: Keys come from a counter that only grows. A key never names two
//!   different objects over the lifetime of a mapper, even across `remove_all`.
//! - **Reserved Null**: `"null"` is produced only for an absent object. Allocated
//!   keys are decimal strings of a strictly positive counter, so they cannot collide.
//!
//! Objects are compared through an identity function rather than by reference.
//! The function must be stable for as long as an object stays mapped.

use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;


/// The key produced for an absent object.
pub const NULL_KEY: &str = "null";

/// Application-supplied mapping from an object to its comparison key.
pub type IdentityFn<V, K> = Arc<dyn Fn(&V) -> K + Send + Sync>;

/// Assigns and reuses short keys for objects referenced from the client.
///
/// Not internally synchronized: a mapper belongs to one session and is only
/// touched while the caller holds that session's lock.
pub struct KeyMapper<V, K = V> {
    forward: HashMap<K, String>,
    reverse: HashMap<String, V>,
    identity: IdentityFn<V, K>,
    last_key: u64,
}

impl<V> KeyMapper<V, V>
where
    V: Clone + Eq + Hash + 'static,
{
    /// Creates a mapper that uses the value itself as its identity.
    pub fn new() -> Self {
        Self::with_identity(Arc::new(|value: &V| value.clone()))
    }
}

impl<V> Default for KeyMapper<V, V>
where
    V: Clone + Eq + Hash + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, K> KeyMapper<V, K>
where
    V: Clone,
    K: Eq + Hash,
{
    /// Creates an empty mapper with a custom identity function.
    pub fn with_identity(identity: IdentityFn<V, K>) -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
            identity,
            last_key: 0,
        }
    }

    /// Returns the key for `value`, allocating one on first use.
    ///
    /// An absent value yields [`NULL_KEY`] without touching the maps.
    pub fn key(&mut self, value: Option<&V>) -> Cow<'static, str> {
        match value {
            None => Cow::Borrowed(NULL_KEY),
            Some(value) => Cow::Owned(self.key_of(value)),
        }
    }

    /// Returns the key for a present value, allocating one on first use.
    pub fn key_of(&mut self, value: &V) -> String {
        let id = (self.identity)(value);
        if let Some(key) = self.forward.get(&id) {
            return key.clone();
        }

        self.last_key += 1;
        let key = self.last_key.to_string();
        tracing::trace!(key = %key, "allocated key");

        self.forward.insert(id, key.clone());
        self.reverse.insert(key.clone(), value.clone());
        key
    }

    /// True iff the value's identity is currently mapped.
    pub fn has(&self, value: &V) -> bool {
        self.forward.contains_key(&(self.identity)(value))
    }

    /// Returns the existing key for `value` without allocating one.
    pub fn lookup(&self, value: &V) -> Option<&str> {
        self.forward.get(&(self.identity)(value)).map(String::as_str)
    }

    /// Maps `value` under a key issued by an earlier mapper, e.g. when a session
    /// is restored. Fails if the key or the identity is already mapped.
    ///
    /// The counter moves past numeric keys so later allocations cannot collide.
    pub fn adopt(&mut self, key: &str, value: V) -> bool {
        let id = (self.identity)(&value);
        if key == NULL_KEY || self.reverse.contains_key(key) || self.forward.contains_key(&id) {
            return false;
        }

        if let Ok(n) = key.parse::<u64>() {
            self.last_key = self.last_key.max(n);
        }
        self.forward.insert(id, key.to_string());
        self.reverse.insert(key.to_string(), value);
        true
    }

    /// Reverse lookup.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.reverse.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.reverse.contains_key(key)
    }

    /// Drops both directions for the value's identity. No-op if unmapped.
    pub fn remove(&mut self, value: &V) {
        let id = (self.identity)(value);
        if let Some(key) = self.forward.remove(&id) {
            self.reverse.remove(&key);
        }
    }

    /// Clears both maps. The key counter keeps counting.
    pub fn remove_all(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Reconciles the mapper with the set of live objects.
    ///
    /// Every live object gets or keeps its key, and the mapped instance is replaced
    /// by the live one. Every mapped object whose identity is not in `live` is
    /// dropped. Returns the number of dropped entries.
    pub fn merge<I>(&mut self, live: I) -> usize
    where
        I: IntoIterator<Item = V>,
    {
        let mut keep = HashSet::new();

        for value in live {
            let id = (self.identity)(&value);
            let last_key = &mut self.last_key;
            let key = self
                .forward
                .entry(id)
                .or_insert_with(|| {
                    *last_key += 1;
                    last_key.to_string()
                })
                .clone();

            self.reverse.insert(key.clone(), value);
            keep.insert(key);
        }

        let before = self.reverse.len();
        self.forward.retain(|_, key| keep.contains(key));
        self.reverse.retain(|key, _| keep.contains(key));

        let pruned = before - self.reverse.len();
        if pruned > 0 {
            tracing::debug!(pruned, live = self.reverse.len(), "pruned unreferenced keys");
        }
        pruned
    }

    /// Re-associates the existing key for this identity with a new instance.
    ///
    /// Returns false (and maps nothing) if the identity has no key.
    pub fn refresh(&mut self, value: V) -> bool {
        let id = (self.identity)(&value);
        match self.forward.get(&id) {
            Some(key) => {
                self.reverse.insert(key.clone(), value);
                true
            }
            None => false,
        }
    }

    /// Returns the current identity function.
    pub fn identity(&self) -> IdentityFn<V, K> {
        Arc::clone(&self.identity)
    }

    /// Swaps the identity function and rebuilds the forward index from the
    /// reverse index. Keys are preserved. No-op if `identity` is the function
    /// already in use.
    ///
    /// If the new function folds several mapped objects into one identity, the
    /// object holding the oldest key wins and the others are unmapped.
    pub fn set_identity(&mut self, identity: IdentityFn<V, K>) {
        if Arc::ptr_eq(&self.identity, &identity) {
            return;
        }

        let mut entries: Vec<(&String, &V)> = self.reverse.iter().collect();
        entries.sort_by_key(|(key, _)| key_order(key));

        let mut forward = HashMap::with_capacity(entries.len());
        let mut collided = Vec::new();
        for (key, value) in entries {
            let id = identity(value);
            if forward.contains_key(&id) {
                collided.push(key.clone());
            } else {
                forward.insert(id, key.clone());
            }
        }

        for key in &collided {
            self.reverse.remove(key);
        }
        if !collided.is_empty() {
            tracing::warn!(dropped = collided.len(), "identity change merged mapped objects");
        }

        self.forward = forward;
        self.identity = identity;
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.reverse.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}

impl<V, K> std::fmt::Debug for KeyMapper<V, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMapper")
            .field("mapped", &self.reverse.len())
            .field("last_key", &self.last_key)
            .finish()
    }
}

/// Allocation order of a key; foreign keys sort last.
fn key_order(key: &str) -> u64 {
    key.parse().unwrap_or(u64::MAX)
}
