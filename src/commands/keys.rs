//! Generic key commands: existence, deletion, glob matching, and the
//! EXPIRE family.

use super::registry::{
    no_keys, read_all_keys, read_first_key, write_all_keys, write_first_key, Command,
    CommandFlags, CommandTable,
};
use super::{arity_error, first_key, parse_i64, parse_ttl_ms, upper};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::{now_ms, DbView};
use bytes::Bytes;
use regex::Regex;

/// EXISTS key [key ...] — repeats count.
fn exists(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let count = args.iter().filter(|key| view.exists(key)).count();
    Ok(Frame::Integer(count as i64))
}

/// DEL key [key ...] — returns the count actually removed.
fn del(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let count = args.iter().filter(|key| view.remove(key).is_some()).count();
    Ok(Frame::Integer(count as i64))
}

/// Compile a glob pattern (`*` `?` `[...]` with `\` escapes) into an
/// anchored regex. Regex metacharacters that globs treat literally are
/// escaped.
pub(super) fn compile_pattern(src: &[u8]) -> Result<Regex> {
    let src = String::from_utf8_lossy(src);
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len() + 2);
    out.push('^');

    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        if ch == b'\\' {
            if i == bytes.len() - 1 {
                return Err(CommandError::InvalidPattern.into());
            }
            out.push('\\');
            out.push(bytes[i + 1] as char);
            i += 2;
            continue;
        }
        match ch {
            // '^' is literal except as a set negation right after '['.
            b'^' => {
                let negates = i >= 1 && bytes[i - 1] == b'[' && (i < 2 || bytes[i - 2] != b'\\');
                if negates {
                    out.push('^');
                } else {
                    out.push_str(r"\^");
                }
            }
            b'+' | b')' | b'$' | b'.' | b'{' | b'}' | b'|' => {
                out.push('\\');
                out.push(ch as char);
            }
            b'*' => out.push_str(".*"),
            b'?' => out.push('.'),
            _ => out.push(ch as char),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out).map_err(|_| CommandError::InvalidPattern.into())
}

/// KEYS pattern — walks the keyspace shard by shard; expired keys are
/// filtered out at match time.
fn keys(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let pattern = compile_pattern(&args[0])?;
    let db = view.db().clone();
    let mut matches: Vec<Bytes> = Vec::new();
    db.for_each_key(|key, _| {
        if pattern.is_match(&String::from_utf8_lossy(key)) && !db.is_expired(key) {
            matches.push(key.clone());
        }
        true
    });
    Ok(Frame::multi_bulk(matches))
}

#[derive(Clone, Copy, PartialEq)]
enum ExpirePolicy {
    /// Set unconditionally
    Default,
    /// Only when no TTL exists (NX)
    IfAbsent,
    /// Only when a TTL exists (XX)
    IfPresent,
    /// Only when the new expiry is later (GT)
    IfGreater,
    /// Only when the new expiry is earlier (LT)
    IfLess,
}

fn expire_policy(arg: &[u8]) -> ExpirePolicy {
    match upper(arg).as_str() {
        "NX" => ExpirePolicy::IfAbsent,
        "XX" => ExpirePolicy::IfPresent,
        "GT" => ExpirePolicy::IfGreater,
        "LT" => ExpirePolicy::IfLess,
        _ => ExpirePolicy::Default,
    }
}

/// Shared EXPIRE/PEXPIRE/EXPIREAT/PEXPIREAT body. `unit_ms` scales the
/// operand; `absolute` selects timestamp vs relative-delay parsing.
fn expire_generic(
    view: &mut DbView<'_>,
    args: &[Bytes],
    unit_ms: u64,
    absolute: bool,
) -> Result<Frame> {
    if args.len() > 3 {
        return Err(arity_error("expire").into());
    }
    let key = first_key(args);
    let policy = if args.len() == 3 {
        expire_policy(&args[2])
    } else {
        ExpirePolicy::Default
    };

    let old = view.db().expiry_ms(&key);
    let new_at_ms = if absolute {
        let timestamp = parse_i64(&args[1]).ok_or(CommandError::Syntax)?;
        (timestamp.max(0) as u64).saturating_mul(unit_ms)
    } else {
        now_ms().saturating_add(parse_ttl_ms(&args[1], unit_ms)?)
    };

    let apply = match policy {
        ExpirePolicy::Default => true,
        ExpirePolicy::IfAbsent => old.is_none(),
        ExpirePolicy::IfPresent => old.is_some(),
        ExpirePolicy::IfGreater => matches!(old, Some(old_at) if new_at_ms > old_at),
        ExpirePolicy::IfLess => matches!(old, Some(old_at) if new_at_ms < old_at),
    };
    if !apply {
        return Ok(Frame::Integer(0));
    }
    view.db().expire_at(&key, new_at_ms);
    Ok(Frame::Integer(1))
}

fn expire(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    expire_generic(view, args, 1000, false)
}

fn pexpire(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    expire_generic(view, args, 1, false)
}

fn expireat(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    expire_generic(view, args, 1000, true)
}

fn pexpireat(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    expire_generic(view, args, 1, true)
}

/// Shared body for the TTL-reading commands. Returns -1 for a missing
/// key and -2 for a key without a TTL; `render` maps the stored
/// absolute expiry (epoch ms) to the reply value.
fn ttl_generic(
    view: &mut DbView<'_>,
    args: &[Bytes],
    render: impl Fn(u64) -> i64,
) -> Result<Frame> {
    let key = &args[0];
    if !view.exists(key) {
        return Ok(Frame::Integer(-1));
    }
    match view.db().expiry_ms(key) {
        None => Ok(Frame::Integer(-2)),
        Some(at_ms) => Ok(Frame::Integer(render(at_ms))),
    }
}

fn expiretime(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    ttl_generic(view, args, |at_ms| (at_ms / 1000) as i64)
}

fn pexpiretime(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    ttl_generic(view, args, |at_ms| at_ms as i64)
}

fn ttl(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    ttl_generic(view, args, |at_ms| {
        (at_ms.saturating_sub(now_ms()) / 1000) as i64
    })
}

fn pttl(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    ttl_generic(view, args, |at_ms| at_ms.saturating_sub(now_ms()) as i64)
}

/// PERSIST key — drops any TTL; 1 when a TTL was removed.
fn persist(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = &args[0];
    if !view.exists(key) {
        return Ok(Frame::Integer(0));
    }
    let removed = view.db().persist(key);
    Ok(Frame::Integer(i64::from(removed)))
}

pub(super) fn register(table: &mut CommandTable) {
    const W: CommandFlags = CommandFlags::WRITE;
    const R: CommandFlags = CommandFlags::READ;

    table.register(Command::locked("exists", exists, read_all_keys, -2, R));
    table.register(Command::locked("del", del, write_all_keys, -2, W));
    table.register(Command::locked("keys", keys, no_keys, 2, R));
    table.register(Command::locked("expire", expire, write_first_key, -3, W));
    table.register(Command::locked("expireat", expireat, write_first_key, -3, W));
    table.register(Command::locked("pexpire", pexpire, write_first_key, -3, W));
    table.register(Command::locked("pexpireat", pexpireat, write_first_key, -3, W));
    table.register(Command::locked("expiretime", expiretime, read_first_key, 2, R));
    table.register(Command::locked("pexpiretime", pexpiretime, read_first_key, 2, R));
    table.register(Command::locked("ttl", ttl, read_first_key, 2, R));
    table.register(Command::locked("pttl", pttl, read_first_key, 2, R));
    table.register(Command::locked("persist", persist, write_first_key, 2, W));
}
