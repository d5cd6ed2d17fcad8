//! Sharded concurrent map with ordered multi-key locking.
//!
//! Keys are distributed over a power-of-two number of shards by a
//! 32-bit FNV-1a hash of the key bytes. Each shard pairs a `HashMap`
//! with a `parking_lot::RwLock`; the map's total entry count is kept in
//! a shared atomic so `len` never has to touch the shards.
//!
//! Two access styles exist:
//!
//! - **Per-op primitives** (`get`, `put`, `remove`, ...) briefly lock
//!   only the owning shard. The TTL table uses these.
//! - **[`ShardedMap::lock`]** acquires every shard covering the given
//!   write/read key sets in ascending shard-index order and returns a
//!   [`MapGuard`] through which all keyed access flows while held.
//!   The stable ordering is the deadlock-freedom invariant: every
//!   multi-shard caller goes through this routine. Dropping the guard
//!   releases the shards in the same index order.

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Minimum shard count; requested capacities round up to a power of
/// two.
const MIN_SHARDS: usize = 16;

/// 32-bit FNV-1a over `data`.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    const PRIME: u32 = 16_777_619;
    let mut hash: u32 = 2_166_136_261;
    for &byte in data {
        hash = hash.wrapping_mul(PRIME);
        hash ^= u32::from(byte);
    }
    hash
}

type Shard<V> = RwLock<HashMap<Bytes, V>>;

/// A map partitioned into independently locked shards.
#[derive(Debug)]
pub struct ShardedMap<V> {
    shards: Vec<Shard<V>>,
    mask: u32,
    len: AtomicUsize,
}

impl<V> ShardedMap<V> {
    /// Create a map with the smallest power-of-two shard count that is
    /// at least `capacity` (minimum 16).
    pub fn new(capacity: usize) -> Self {
        let count = capacity.max(MIN_SHARDS).next_power_of_two();
        let shards = (0..count).map(|_| RwLock::new(HashMap::new())).collect();
        Self {
            shards,
            mask: (count - 1) as u32,
            len: AtomicUsize::new(0),
        }
    }

    /// Number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index owning `key`.
    #[inline]
    pub fn index_of(&self, key: &[u8]) -> usize {
        (fnv1a_32(key) & self.mask) as usize
    }

    /// Total entry count across all shards.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns true when no shard holds an entry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`, locking only its shard.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        self.shards[self.index_of(key)].read().get(key).cloned()
    }

    /// Returns true when `key` exists.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.shards[self.index_of(key)].read().contains_key(key)
    }

    /// Insert or overwrite. Returns true when the key was newly
    /// inserted.
    pub fn put(&self, key: Bytes, value: V) -> bool {
        let inserted = self.shards[self.index_of(&key)]
            .write()
            .insert(key, value)
            .is_none();
        if inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Insert only when absent. Returns true on insertion.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> bool {
        let mut shard = self.shards[self.index_of(&key)].write();
        if shard.contains_key(&key[..]) {
            return false;
        }
        shard.insert(key, value);
        self.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Overwrite only when present. Returns true on overwrite.
    pub fn put_if_exists(&self, key: Bytes, value: V) -> bool {
        let mut shard = self.shards[self.index_of(&key)].write();
        match shard.get_mut(&key[..]) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &[u8]) -> Option<V> {
        let removed = self.shards[self.index_of(key)].write().remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Visit every entry, shard by shard under that shard's read lock.
    /// Stops when `consumer` returns false.
    pub fn for_each(&self, mut consumer: impl FnMut(&Bytes, &V) -> bool) {
        for shard in &self.shards {
            let shard = shard.read();
            for (key, value) in shard.iter() {
                if !consumer(key, value) {
                    return;
                }
            }
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.write();
            self.len.fetch_sub(shard.len(), Ordering::Relaxed);
            shard.clear();
        }
    }

    /// Acquire shard locks for the union of `write_keys` and
    /// `read_keys`.
    ///
    /// Shard indices are deduplicated and locked in ascending order; a
    /// shard touched by any write key gets the write lock even when
    /// read keys also map to it. The returned guard is the only way to
    /// reach entries for the covered keys while locks are held.
    pub fn lock(&self, write_keys: &[Bytes], read_keys: &[Bytes]) -> MapGuard<'_, V> {
        let write_indices: BTreeSet<usize> =
            write_keys.iter().map(|k| self.index_of(k)).collect();
        let mut indices = write_indices.clone();
        indices.extend(read_keys.iter().map(|k| self.index_of(k)));

        let mut slots = BTreeMap::new();
        for index in indices {
            let slot = if write_indices.contains(&index) {
                Slot::Write(self.shards[index].write())
            } else {
                Slot::Read(self.shards[index].read())
            };
            slots.insert(index, slot);
        }
        MapGuard { map: self, slots }
    }
}

enum Slot<'a, V> {
    Read(RwLockReadGuard<'a, HashMap<Bytes, V>>),
    Write(RwLockWriteGuard<'a, HashMap<Bytes, V>>),
}

/// Shard locks held for one dispatch, with keyed access routed through
/// the held guards.
///
/// Mutating methods require the key's shard to have been write-locked;
/// using them on a read-locked or uncovered shard is a command-table
/// bug and panics (the dispatcher's panic boundary turns that into an
/// error reply instead of taking the server down).
pub struct MapGuard<'a, V> {
    map: &'a ShardedMap<V>,
    slots: BTreeMap<usize, Slot<'a, V>>,
}

impl<'a, V> MapGuard<'a, V> {
    fn slot(&self, key: &[u8]) -> &Slot<'a, V> {
        self.slots
            .get(&self.map.index_of(key))
            .expect("shard not locked for key")
    }

    fn write_slot(&mut self, key: &[u8]) -> &mut RwLockWriteGuard<'a, HashMap<Bytes, V>> {
        let index = self.map.index_of(key);
        match self.slots.get_mut(&index) {
            Some(Slot::Write(shard)) => shard,
            Some(Slot::Read(_)) => panic!("write operation on read-locked shard"),
            None => panic!("shard not locked for key"),
        }
    }

    /// Look up `key` in its locked shard.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        match self.slot(key) {
            Slot::Read(shard) => shard.get(key),
            Slot::Write(shard) => shard.get(key),
        }
    }

    /// Mutable access to the value under `key`.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.write_slot(key).get_mut(key)
    }

    /// Returns true when `key` exists.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        match self.slot(key) {
            Slot::Read(shard) => shard.contains_key(key),
            Slot::Write(shard) => shard.contains_key(key),
        }
    }

    /// Insert or overwrite. Returns true when newly inserted.
    pub fn put(&mut self, key: Bytes, value: V) -> bool {
        let inserted = self.write_slot(&key).insert(key, value).is_none();
        if inserted {
            self.map.len.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Insert only when absent. Returns true on insertion.
    pub fn put_if_absent(&mut self, key: Bytes, value: V) -> bool {
        let shard = self.write_slot(&key);
        if shard.contains_key(&key[..]) {
            return false;
        }
        shard.insert(key, value);
        self.map.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Overwrite only when present. Returns true on overwrite.
    pub fn put_if_exists(&mut self, key: Bytes, value: V) -> bool {
        match self.write_slot(&key).get_mut(&key[..]) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let removed = self.write_slot(key).remove(key);
        if removed.is_some() {
            self.map.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn capacity_rounds_to_power_of_two() {
        assert_eq!(ShardedMap::<u8>::new(0).shard_count(), 16);
        assert_eq!(ShardedMap::<u8>::new(16).shard_count(), 16);
        assert_eq!(ShardedMap::<u8>::new(17).shard_count(), 32);
        assert_eq!(ShardedMap::<u8>::new(1000).shard_count(), 1024);
    }

    #[test]
    fn fnv1a_is_stable_and_spreads() {
        assert_eq!(fnv1a_32(b"foo"), fnv1a_32(b"foo"));
        let map = ShardedMap::<u8>::new(64);
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000 {
            seen.insert(map.index_of(format!("key:{i}").as_bytes()));
        }
        assert!(seen.len() > 32, "keys collapsed onto {} shards", seen.len());
    }

    #[test]
    fn primitives_maintain_count() {
        let map = ShardedMap::new(16);
        assert!(map.put(b("a"), 1));
        assert!(!map.put(b("a"), 2));
        assert!(map.put_if_absent(b("b"), 3));
        assert!(!map.put_if_absent(b("b"), 4));
        assert!(map.put_if_exists(b("b"), 5));
        assert!(!map.put_if_exists(b("c"), 6));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(b"b".as_ref()), Some(5));
        assert_eq!(map.remove(b"a".as_ref()), Some(2));
        assert_eq!(map.remove(b"a".as_ref()), None);
        assert_eq!(map.len(), 1);
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn guard_routes_access_through_held_shards() {
        let map = ShardedMap::new(16);
        let key = b("k");
        {
            let mut guard = map.lock(&[key.clone()], &[]);
            assert!(guard.put(key.clone(), 7));
            assert_eq!(guard.get(&key[..]), Some(&7));
            *guard.get_mut(&key[..]).unwrap() = 8;
        }
        assert_eq!(map.get(&key[..]), Some(8));

        let guard = map.lock(&[], &[key.clone()]);
        assert!(guard.contains_key(&key[..]));
    }

    #[test]
    #[should_panic(expected = "write operation on read-locked shard")]
    fn guard_rejects_writes_through_read_locks() {
        let map: ShardedMap<u8> = ShardedMap::new(16);
        let key = b("k");
        let mut guard = map.lock(&[], &[key.clone()]);
        guard.put(key, 1);
    }

    #[test]
    fn write_wins_when_read_and_write_share_a_shard() {
        let map: ShardedMap<u8> = ShardedMap::new(16);
        let key = b("shared");
        // Same key in both sets: the single shard must be write-locked.
        let mut guard = map.lock(&[key.clone()], &[key.clone()]);
        assert!(guard.put(key, 1));
    }

    #[test]
    fn opposite_lock_orders_do_not_deadlock() {
        let map = Arc::new(ShardedMap::<u64>::new(16));
        // Two keys on (very likely) different shards, locked in
        // opposite argument order from two threads, many times. The
        // ascending shard ordering inside lock() must prevent deadlock.
        let k1 = b("alpha");
        let k2 = b("beta");

        let mut handles = Vec::new();
        for flip in [false, true] {
            let map = Arc::clone(&map);
            let (a, b) = if flip {
                (k2.clone(), k1.clone())
            } else {
                (k1.clone(), k2.clone())
            };
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    let mut guard = map.lock(&[a.clone(), b.clone()], &[]);
                    guard.put(a.clone(), i);
                    guard.put(b.clone(), i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn concurrent_counting_is_exact() {
        let map = Arc::new(ShardedMap::<u8>::new(64));
        let mut handles = Vec::new();
        for t in 0..8 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    map.put(b(&format!("t{t}:k{i}")), 0);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), 8 * 500);
    }
}
