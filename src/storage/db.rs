//! The keyspace: data table, TTL table, and expiration wiring.
//!
//! [`Db`] owns two sharded maps with the same sharding scheme: the data
//! table (`key -> Value`) and the TTL table (`key -> absolute expiry in
//! epoch milliseconds`), plus the timing wheel that drives active
//! expiration. The TTL table is authoritative for "does this key have
//! an expiry"; the wheel only holds the deferred deletion callback.
//!
//! Commands never touch the data table directly. The dispatcher calls
//! [`Db::view`] with the command's write/read key sets, which takes the
//! shard locks in the ordered multi-key protocol and returns a
//! [`DbView`]; all data access flows through the view while the locks
//! are held. TTL-table accesses lock their own shard per operation and
//! are only ever leaf-level, so they cannot participate in a deadlock
//! cycle.

use crate::storage::now_ms;
use crate::storage::sharded::{MapGuard, ShardedMap};
use crate::storage::timewheel::TimeWheel;
use crate::types::Value;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shard-count request for the data table.
const DATA_SHARDS: usize = 1 << 10;
/// Shard-count request for the TTL table.
const TTL_SHARDS: usize = 1 << 6;

/// Tick period of the expiration wheel.
const WHEEL_TICK: Duration = Duration::from_millis(200);
/// Slot count of the expiration wheel (one revolution = 12 minutes).
const WHEEL_SLOTS: usize = 3600;

/// Task key under which a data key's expiration callback is scheduled.
fn expire_task_key(key: &[u8]) -> Bytes {
    let mut task_key = BytesMut::with_capacity(7 + key.len());
    task_key.put_slice(b"expire:");
    task_key.put_slice(key);
    task_key.freeze()
}

/// The in-memory keyspace.
#[derive(Debug)]
pub struct Db {
    data: ShardedMap<Value>,
    ttl: ShardedMap<u64>,
    wheel: TimeWheel,
}

impl Db {
    /// Create the keyspace and start its expiration wheel. Must be
    /// called from within a tokio runtime.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: ShardedMap::new(DATA_SHARDS),
            ttl: ShardedMap::new(TTL_SHARDS),
            wheel: TimeWheel::start(WHEEL_TICK, WHEEL_SLOTS),
        })
    }

    /// Number of live keys (expired-but-unswept keys included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stop the expiration wheel. Pending callbacks are abandoned.
    pub fn shutdown(&self) {
        self.wheel.stop();
    }

    /// Acquire the ordered shard locks for a command's key sets and
    /// return the access view.
    pub fn view<'a>(
        self: &'a Arc<Self>,
        write_keys: &[Bytes],
        read_keys: &[Bytes],
    ) -> DbView<'a> {
        DbView {
            db: self,
            guard: self.data.lock(write_keys, read_keys),
        }
    }

    /// Visit every key/value pair, shard by shard under read locks.
    /// Only for commands that hold no multi-key locks of their own.
    pub fn for_each_key(&self, consumer: impl FnMut(&Bytes, &Value) -> bool) {
        self.data.for_each(consumer);
    }

    /// Absolute expiry of `key` in epoch milliseconds, if one is set.
    pub fn expiry_ms(&self, key: &[u8]) -> Option<u64> {
        self.ttl.get(key)
    }

    /// Returns true when `key` has an expiry in the past.
    pub fn is_expired(&self, key: &[u8]) -> bool {
        matches!(self.ttl.get(key), Some(at) if now_ms() >= at)
    }

    /// Set `key` to expire at the wall-clock instant `at_ms`.
    ///
    /// Updates the TTL table and (re)schedules the wheel callback. The
    /// caller is expected to hold the key's data-shard write lock, the
    /// way EXPIRE-family descriptors declare the key.
    pub fn expire_at(self: &Arc<Self>, key: &Bytes, at_ms: u64) {
        self.ttl.put(key.clone(), at_ms);
        self.wheel
            .schedule_at(at_ms, expire_task_key(key), self.expire_callback(key.clone()));
    }

    /// Set `key` to expire after `delay`.
    pub fn expire_after(self: &Arc<Self>, key: &Bytes, delay: Duration) {
        let at_ms = now_ms().saturating_add(delay.as_millis() as u64);
        self.ttl.put(key.clone(), at_ms);
        self.wheel
            .schedule(delay, expire_task_key(key), self.expire_callback(key.clone()));
    }

    /// Drop any expiry on `key`: remove the TTL row and cancel the
    /// wheel task. Returns true when a TTL row existed.
    pub fn persist(&self, key: &[u8]) -> bool {
        let removed = self.ttl.remove(key).is_some();
        self.wheel.cancel(expire_task_key(key));
        removed
    }

    /// The deferred deletion job for `key`.
    ///
    /// Re-checks the TTL table under the key's write lock before
    /// deleting: an EXPIRE may have extended the TTL (or a PERSIST
    /// removed it) between scheduling and firing.
    fn expire_callback(self: &Arc<Self>, key: Bytes) -> impl FnOnce() + Send + 'static {
        let db = Arc::clone(self);
        move || {
            let mut view = db.view(&[key.clone()], &[]);
            let Some(at_ms) = db.ttl.get(&key) else {
                return;
            };
            if now_ms() >= at_ms {
                debug!(key = %String::from_utf8_lossy(&key), "expired key deleted");
                view.remove(&key);
            }
        }
    }

    /// Queue an immediate sweep of `key`, used by lazy expiration on
    /// read paths that only hold read locks.
    fn queue_removal(self: &Arc<Self>, key: &[u8]) {
        let key = Bytes::copy_from_slice(key);
        self.wheel.schedule(
            Duration::ZERO,
            expire_task_key(&key),
            self.expire_callback(key.clone()),
        );
    }
}

/// Keyed access to the data table while a command's shard locks are
/// held. Every read applies the lazy expiration check: a key whose TTL
/// has passed reads as absent and is deleted (immediately on write
/// paths, via a queued sweep on read paths).
pub struct DbView<'a> {
    db: &'a Arc<Db>,
    guard: MapGuard<'a, Value>,
}

impl DbView<'_> {
    /// The owning keyspace, for TTL and expiry operations.
    pub fn db(&self) -> &Arc<Db> {
        self.db
    }

    /// The value stored under `key`, unless absent or expired.
    pub fn entry(&self, key: &[u8]) -> Option<&Value> {
        if self.db.is_expired(key) {
            self.db.queue_removal(key);
            return None;
        }
        self.guard.get(key)
    }

    /// Mutable access to the value under `key`, unless absent or
    /// expired. Requires the key's shard to be write-locked; an
    /// expired entry is removed on the spot.
    pub fn entry_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        if self.db.is_expired(key) {
            if self.guard.remove(key).is_some() {
                self.db.persist(key);
            }
            return None;
        }
        self.guard.get_mut(key)
    }

    /// Returns true when `key` exists and has not expired.
    pub fn exists(&self, key: &[u8]) -> bool {
        if self.db.is_expired(key) {
            self.db.queue_removal(key);
            return false;
        }
        self.guard.contains_key(key)
    }

    /// Insert or overwrite. Returns true when the key was newly
    /// inserted.
    pub fn put(&mut self, key: Bytes, value: Value) -> bool {
        self.guard.put(key, value)
    }

    /// Insert only when the key is absent. Returns true on insertion.
    pub fn put_if_absent(&mut self, key: Bytes, value: Value) -> bool {
        self.guard.put_if_absent(key, value)
    }

    /// Overwrite only when the key exists. Returns true on overwrite.
    pub fn put_if_exists(&mut self, key: Bytes, value: Value) -> bool {
        self.guard.put_if_exists(key, value)
    }

    /// Remove `key` and any expiry it had, returning the stored value.
    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        let removed = self.guard.remove(key);
        if removed.is_some() {
            self.db.persist(key);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn put_get_remove_round_trip() {
        let db = Db::new();
        let key = b("k");
        {
            let mut view = db.view(&[key.clone()], &[]);
            assert!(view.put(key.clone(), Value::str("v")));
            assert!(!view.put(key.clone(), Value::str("v2")));
        }
        {
            let view = db.view(&[], &[key.clone()]);
            match view.entry(&key) {
                Some(Value::Str(data)) => assert_eq!(data.as_ref(), b"v2"),
                other => panic!("unexpected entry: {other:?}"),
            }
            assert!(view.exists(&key));
        }
        {
            let mut view = db.view(&[key.clone()], &[]);
            assert!(view.remove(&key).is_some());
            assert!(view.remove(&key).is_none());
        }
        assert_eq!(db.len(), 0);
    }

    #[tokio::test]
    async fn conditional_puts() {
        let db = Db::new();
        let key = b("k");
        let mut view = db.view(&[key.clone()], &[]);
        assert!(!view.put_if_exists(key.clone(), Value::str("x")));
        assert!(view.put_if_absent(key.clone(), Value::str("a")));
        assert!(!view.put_if_absent(key.clone(), Value::str("b")));
        assert!(view.put_if_exists(key.clone(), Value::str("c")));
        match view.entry(&key) {
            Some(Value::Str(data)) => assert_eq!(data.as_ref(), b"c"),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent_on_write_paths() {
        let db = Db::new();
        let key = b("k");
        db.view(&[key.clone()], &[]).put(key.clone(), Value::str("v"));
        // Expiry already in the past: the TTL table wins immediately,
        // no wheel tick needed.
        db.ttl.put(key.clone(), now_ms().saturating_sub(10));

        let mut view = db.view(&[key.clone()], &[]);
        assert!(view.entry_mut(&key).is_none());
        drop(view);

        assert_eq!(db.len(), 0);
        assert!(db.expiry_ms(&key).is_none());
    }

    #[tokio::test]
    async fn wheel_removes_expired_key() {
        let db = Db::new();
        let key = b("k");
        db.view(&[key.clone()], &[]).put(key.clone(), Value::str("v"));
        db.expire_after(&key, Duration::from_millis(50));
        assert!(db.expiry_ms(&key).is_some());

        // One wheel revolution past the deadline.
        sleep(Duration::from_millis(600)).await;
        assert_eq!(db.len(), 0, "wheel did not sweep the expired key");
        assert!(db.expiry_ms(&key).is_none());
    }

    #[tokio::test]
    async fn persist_defuses_scheduled_expiry() {
        let db = Db::new();
        let key = b("k");
        db.view(&[key.clone()], &[]).put(key.clone(), Value::str("v"));
        db.expire_after(&key, Duration::from_millis(100));
        assert!(db.persist(&key));
        assert!(!db.persist(&key));

        sleep(Duration::from_millis(600)).await;
        assert_eq!(db.len(), 1, "persisted key was still deleted");
    }

    #[tokio::test]
    async fn extending_ttl_survives_stale_callback() {
        let db = Db::new();
        let key = b("k");
        db.view(&[key.clone()], &[]).put(key.clone(), Value::str("v"));
        db.expire_after(&key, Duration::from_millis(100));
        // Extend before the first deadline fires. The schedule()
        // replacement semantics drop the earlier wheel task, and the
        // double-check against the TTL table covers the rest.
        db.expire_after(&key, Duration::from_secs(60));

        sleep(Duration::from_millis(600)).await;
        assert_eq!(db.len(), 1, "extended key was deleted early");
    }
}
