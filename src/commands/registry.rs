//! Command table: name -> descriptor registry.
//!
//! Each descriptor carries the executor, the key-extraction function
//! used for lock acquisition, an arity rule, and read/write tags. The
//! table is built once at startup and read-only afterwards.
//!
//! Arity counts every token including the command name: `arity >= 0`
//! requires exactly that many tokens, `arity < 0` at least `|arity|`.

use crate::error::Result;
use crate::protocol::Frame;
use crate::storage::{Db, DbView};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

bitflags::bitflags! {
    /// Read/write tags on a command descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u8 {
        /// Command only reads the keyspace
        const READ = 1 << 0;
        /// Command mutates the keyspace
        const WRITE = 1 << 1;
    }
}

/// Extracts the (write keys, read keys) a command will touch, from its
/// arguments (command name excluded).
pub type KeysFn = fn(&[Bytes]) -> (Vec<Bytes>, Vec<Bytes>);

/// Executor for commands that run under dispatcher-acquired shard
/// locks.
pub type SyncExec = fn(&mut DbView<'_>, &[Bytes]) -> Result<Frame>;

/// Executor for commands that manage their own locking (blocking pops,
/// multi-phase moves): they receive the keyspace handle and take
/// per-iteration locks themselves.
pub type SelfLockingExec =
    fn(Arc<Db>, Vec<Bytes>) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>>;

/// How a command executes.
pub enum Handler {
    /// The dispatcher extracts keys, acquires ordered shard locks, and
    /// runs the executor under them.
    Locked {
        /// Key extraction for lock acquisition
        keys: KeysFn,
        /// The executor
        exec: SyncExec,
    },
    /// The executor acquires fine-grained locks itself.
    SelfLocking {
        /// The executor
        exec: SelfLockingExec,
    },
}

/// A command descriptor.
pub struct Command {
    /// Lowercase command name
    pub name: &'static str,
    /// Token-count rule (see module docs)
    pub arity: i32,
    /// Read/write tags
    pub flags: CommandFlags,
    /// Execution strategy
    pub handler: Handler,
}

impl Command {
    /// Descriptor for a dispatcher-locked command.
    pub const fn locked(
        name: &'static str,
        exec: SyncExec,
        keys: KeysFn,
        arity: i32,
        flags: CommandFlags,
    ) -> Self {
        Self {
            name,
            arity,
            flags,
            handler: Handler::Locked { keys, exec },
        }
    }

    /// Descriptor for a self-locking command.
    pub const fn self_locking(
        name: &'static str,
        exec: SelfLockingExec,
        arity: i32,
        flags: CommandFlags,
    ) -> Self {
        Self {
            name,
            arity,
            flags,
            handler: Handler::SelfLocking { exec },
        }
    }

    /// Check `token_count` (command name included) against the arity
    /// rule.
    pub fn validate_arity(&self, token_count: usize) -> bool {
        if self.arity >= 0 {
            token_count == self.arity as usize
        } else {
            token_count >= (-self.arity) as usize
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("flags", &self.flags)
            .finish()
    }
}

/// The process-wide name -> descriptor registry.
#[derive(Debug, Default)]
pub struct CommandTable {
    commands: HashMap<&'static str, Command>,
}

impl CommandTable {
    /// Build the table with every supported command registered.
    pub fn new() -> Self {
        let mut table = Self {
            commands: HashMap::new(),
        };
        super::strings::register(&mut table);
        super::keys::register(&mut table);
        super::lists::register(&mut table);
        super::blocking::register(&mut table);
        super::hashes::register(&mut table);
        super::sets::register(&mut table);
        super::bitmap::register(&mut table);
        table
    }

    /// Register one descriptor.
    pub fn register(&mut self, command: Command) {
        self.commands.insert(command.name, command);
    }

    /// Look up a descriptor by lowercase name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true when no commands are registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// Shared key extractors; command modules add specialized ones next to
// their executors.

/// No keys: the executor touches the keyspace through per-shard
/// primitives only.
pub(crate) fn no_keys(_args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), Vec::new())
}

/// Write lock on the first argument.
pub(crate) fn write_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone()], Vec::new())
}

/// Read lock on the first argument.
pub(crate) fn read_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), vec![args[0].clone()])
}

/// Write locks on every argument.
pub(crate) fn write_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.to_vec(), Vec::new())
}

/// Read locks on every argument.
pub(crate) fn read_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_rules() {
        let exact = Command::locked("get", |_, _| Ok(Frame::Null), read_first_key, 2, CommandFlags::READ);
        assert!(exact.validate_arity(2));
        assert!(!exact.validate_arity(1));
        assert!(!exact.validate_arity(3));

        let at_least = Command::locked("mget", |_, _| Ok(Frame::Null), read_all_keys, -2, CommandFlags::READ);
        assert!(at_least.validate_arity(2));
        assert!(at_least.validate_arity(9));
        assert!(!at_least.validate_arity(1));
    }

    #[test]
    fn table_covers_the_command_surface() {
        let table = CommandTable::new();
        for name in [
            "set", "get", "strlen", "append", "mset", "msetnx", "mget", "getdel", "incr",
            "decr", "incrby", "decrby", "incrbyfloat", "getex", "setrange", "getrange",
            "exists", "del", "keys", "expire", "expireat", "pexpire", "pexpireat",
            "expiretime", "pexpiretime", "ttl", "pttl", "persist",
            "lpush", "lpushx", "rpush", "rpushx", "lpop", "rpop", "blpop", "brpop", "llen",
            "lindex", "lrange", "linsert", "lrem", "lset", "ltrim", "lmove", "blmove",
            "lmpop", "blmpop",
            "hset", "hsetnx", "hget", "hgetall", "hexists", "hlen", "hkeys", "hdel",
            "hincrby", "hincrbyfloat", "hmget", "hstrlen", "hvals", "hrandfield",
            "sadd", "smembers", "scard", "srem", "sdiff", "sdiffstore", "sunion",
            "sunionstore", "sinter", "sinterstore", "sintercard", "sismember",
            "smismember", "smove", "srandmember", "spop",
            "setbit", "getbit", "bitcount", "bitpos", "bitop",
        ] {
            assert!(table.get(name).is_some(), "missing command: {name}");
        }
        // PING/AUTH/INFO are dispatched ahead of the table.
        assert!(table.get("ping").is_none());
    }
}
