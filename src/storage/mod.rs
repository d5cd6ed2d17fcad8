//! In-memory storage: sharded keyspace, TTL table, and timing wheel.

mod db;
mod sharded;
mod timewheel;

pub use db::{Db, DbView};
pub use sharded::{fnv1a_32, MapGuard, ShardedMap};
pub use timewheel::TimeWheel;

pub(crate) use timewheel::panic_message;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
