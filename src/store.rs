//! The keyspace: a typed value map with TTL, scalar/list coercion, and a
//! background expiry sweeper.
//!
//! A single `tokio::sync::RwLock` around the `HashMap` is the entire
//! concurrency story: readers (`get`, `lrange`, `list_len`, the sweeper's scan
//! phase) take shared access, writers (`set`, `delete_many`, `rpush`, `lpush`,
//! lazy-expiry removal, the sweeper's delete phase) take exclusive access. A
//! list value is owned inline by its `Item`, so mutating a list is just
//! mutating the map entry under the same write guard — no separate lock.

use crate::error::StoreError;
use crate::list::LinkedList;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

enum Payload {
    Str(Bytes),
    Int(i64),
    List(LinkedList),
}

struct Item {
    payload: Payload,
    expires_at: Option<Instant>,
}

impl Item {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(t) if Instant::now() >= t)
    }

    /// Canonical text form of a scalar payload. `None` for a list.
    fn scalar_text(&self) -> Option<Bytes> {
        match &self.payload {
            Payload::Str(s) => Some(s.clone()),
            Payload::Int(n) => Some(Bytes::from(n.to_string())),
            Payload::List(_) => None,
        }
    }
}

/// `kind=Integer` iff `value` is a base-10 signed integer with no leading
/// zeros and no whitespace other than an optional leading `-`. `-0` is not
/// canonical and is kept as a plain string.
fn classify(value: &[u8]) -> Payload {
    let parsed = std::str::from_utf8(value).ok().and_then(|s| {
        let digits = s.strip_prefix('-').unwrap_or(s);
        let is_canonical = !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'))
            && !(s == "-0");
        is_canonical.then(|| s.parse::<i64>().ok()).flatten()
    });

    match parsed {
        Some(n) => Payload::Int(n),
        None => Payload::Str(Bytes::copy_from_slice(value)),
    }
}

pub struct Store {
    entries: RwLock<HashMap<Bytes, Item>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces any existing entry at `key`. `ttl = None` means the key never
    /// expires.
    pub async fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let item = Item {
            payload: classify(&value),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key, item);
    }

    /// Canonical text of a string/integer key. `Ok(None)` if absent or expired.
    pub async fn get(&self, key: &Bytes) -> Result<Option<Bytes>, StoreError> {
        {
            let entries = self.entries.read().await;
            if let Some(item) = entries.get(key) {
                if !item.is_expired() {
                    return match &item.payload {
                        Payload::List(_) => Err(StoreError::WrongType),
                        _ => Ok(item.scalar_text()),
                    };
                }
            } else {
                return Ok(None);
            }
        }
        self.purge_if_still_expired(key).await;
        Ok(None)
    }

    /// Lazily evicts `key` if it is present and still expired at the moment of
    /// the exclusive check (a concurrent write may have re-armed it).
    async fn purge_if_still_expired(&self, key: &Bytes) {
        let mut entries = self.entries.write().await;
        if matches!(entries.get(key), Some(item) if item.is_expired()) {
            entries.remove(key);
        }
    }

    /// Removes each key that is present and not logically expired. Returns the
    /// exact number removed.
    pub async fn delete_many(&self, keys: &[Bytes]) -> usize {
        let mut entries = self.entries.write().await;
        let mut count = 0;
        for key in keys {
            if matches!(entries.get(key), Some(item) if !item.is_expired()) {
                entries.remove(key);
                count += 1;
            }
        }
        count
    }

    /// Returns a mutable handle to `key`'s list payload, creating an empty
    /// list if absent, coercing a scalar into a single-element list (TTL
    /// preserved) otherwise. A still-live list is returned as-is.
    fn list_slot<'a>(entries: &'a mut HashMap<Bytes, Item>, key: &Bytes) -> &'a mut LinkedList {
        let needs_fresh = matches!(entries.get(key), None) || matches!(entries.get(key), Some(item) if item.is_expired());
        if needs_fresh {
            entries.insert(
                key.clone(),
                Item {
                    payload: Payload::List(LinkedList::new()),
                    expires_at: None,
                },
            );
        }

        let item = entries.get_mut(key).expect("just ensured present");
        if !matches!(item.payload, Payload::List(_)) {
            let text = item.scalar_text().expect("non-list payload has scalar text");
            let mut list = LinkedList::new();
            list.push_back(text);
            item.payload = Payload::List(list);
        }

        match &mut item.payload {
            Payload::List(list) => list,
            _ => unreachable!("payload was just coerced to a list"),
        }
    }

    /// Appends each value to the tail, in order. Returns the post-push length.
    pub async fn rpush(&self, key: &Bytes, values: Vec<Bytes>) -> i64 {
        let mut entries = self.entries.write().await;
        let list = Self::list_slot(&mut entries, key);
        for value in values {
            list.push_back(value);
        }
        list.len() as i64
    }

    /// Inserts each value at the head, in order, so pushing `v1..vk` leaves
    /// the list starting `vk, .., v1, <prior head>..`.
    pub async fn lpush(&self, key: &Bytes, values: Vec<Bytes>) -> i64 {
        let mut entries = self.entries.write().await;
        let list = Self::list_slot(&mut entries, key);
        for value in values {
            list.push_front(value);
        }
        list.len() as i64
    }

    /// Inclusive, negative-index-normalized slice. `Ok(None)` if absent or
    /// expired.
    pub async fn lrange(
        &self,
        key: &Bytes,
        start: isize,
        stop: isize,
    ) -> Result<Option<Vec<Bytes>>, StoreError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            None => Ok(None),
            Some(item) if item.is_expired() => Ok(None),
            Some(item) => match &item.payload {
                Payload::List(list) => Ok(Some(list.range(start, stop))),
                _ => Err(StoreError::WrongType),
            },
        }
    }

    /// Length of the list at `key`. `Ok(None)` if absent or expired.
    pub async fn list_len(&self, key: &Bytes) -> Result<Option<i64>, StoreError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            None => Ok(None),
            Some(item) if item.is_expired() => Ok(None),
            Some(item) => match &item.payload {
                Payload::List(list) => Ok(Some(list.len() as i64)),
                _ => Err(StoreError::WrongType),
            },
        }
    }

    /// One sweeper tick: collect expired keys under a read lock, then remove
    /// each one under a write lock, re-checking expiry so a concurrent `set`
    /// that re-armed the key is not undone. Returns the number evicted.
    pub async fn sweep_once(&self) -> usize {
        let expired: Vec<Bytes> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, item)| item.expires_at.is_some() && item.is_expired())
                .map(|(key, _)| key.clone())
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in &expired {
            if matches!(entries.get(key), Some(item) if item.is_expired()) {
                entries.remove(key);
                removed += 1;
            }
        }
        removed
    }
}

/// Runs the expiry sweeper until `shutdown` fires: one `sweep_once` per tick
/// of `interval`, logging how many keys each tick evicted.
pub async fn run_sweeper(store: Arc<Store>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = store.sweep_once().await;
                tracing::debug!(evicted, "sweeper tick");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
