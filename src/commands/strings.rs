//! String command executors.

use super::registry::{
    read_all_keys, read_first_key, write_all_keys, write_first_key, Command, CommandFlags,
    CommandTable,
};
use super::{arity_error, first_key, parse_i64, parse_ttl_ms, upper};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::DbView;
use crate::types::Value;
use bigdecimal::BigDecimal;
use bytes::Bytes;
use std::str::FromStr;
use std::time::Duration;

/// The stored bytes under `key`, or None when the key is absent.
/// A non-string variant is a WRONGTYPE error.
pub(super) fn string_value(view: &DbView<'_>, key: &[u8]) -> Result<Option<Bytes>> {
    match view.entry(key) {
        None => Ok(None),
        Some(Value::Str(data)) => Ok(Some(data.clone())),
        Some(_) => Err(CommandError::WrongType.into()),
    }
}

enum SetPolicy {
    Upsert,
    Insert,
    Update,
}

enum Expiry {
    After(u64),
    At(u64),
}

/// SET key value [NX|XX] [EX sec|PX ms|EXAT ts|PXAT ts]
fn set(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let value = args[1].clone();

    let mut policy = SetPolicy::Upsert;
    let mut expiry: Option<Expiry> = None;

    let mut i = 2;
    while i < args.len() {
        match upper(&args[i]).as_str() {
            "NX" => {
                if matches!(policy, SetPolicy::Update) {
                    return Err(CommandError::Syntax.into());
                }
                policy = SetPolicy::Insert;
            }
            "XX" => {
                if matches!(policy, SetPolicy::Insert) {
                    return Err(CommandError::Syntax.into());
                }
                policy = SetPolicy::Update;
            }
            "EX" | "PX" => {
                if expiry.is_some() || i + 1 == args.len() {
                    return Err(CommandError::Syntax.into());
                }
                let unit_ms = if upper(&args[i]) == "EX" { 1000 } else { 1 };
                expiry = Some(Expiry::After(parse_ttl_ms(&args[i + 1], unit_ms)?));
                i += 1;
            }
            "EXAT" | "PXAT" => {
                if expiry.is_some() || i + 1 == args.len() {
                    return Err(CommandError::Syntax.into());
                }
                let unit_ms: u64 = if upper(&args[i]) == "EXAT" { 1000 } else { 1 };
                let timestamp = parse_i64(&args[i + 1])
                    .ok_or(CommandError::InvalidExpireTime)?;
                expiry = Some(Expiry::At((timestamp.max(0) as u64).saturating_mul(unit_ms)));
                i += 1;
            }
            _ => return Err(CommandError::Syntax.into()),
        }
        i += 1;
    }

    let stored = match policy {
        SetPolicy::Upsert => {
            view.put(key.clone(), Value::Str(value));
            true
        }
        SetPolicy::Insert => view.put_if_absent(key.clone(), Value::Str(value)),
        SetPolicy::Update => view.put_if_exists(key.clone(), Value::Str(value)),
    };

    if !stored {
        return Ok(Frame::Null);
    }
    match expiry {
        Some(Expiry::After(ms)) => view.db().expire_after(&key, Duration::from_millis(ms)),
        Some(Expiry::At(at_ms)) => view.db().expire_at(&key, at_ms),
        // A plain SET implicitly persists.
        None => {
            view.db().persist(&key);
        }
    }
    Ok(Frame::ok())
}

/// GET key
fn get(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    match string_value(view, &args[0])? {
        Some(data) => Ok(Frame::Bulk(data)),
        None => Ok(Frame::Null),
    }
}

/// STRLEN key. Missing keys and non-string values both read as 0.
fn strlen(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    match string_value(view, &args[0]) {
        Ok(Some(data)) => Ok(Frame::Integer(data.len() as i64)),
        _ => Ok(Frame::Integer(0)),
    }
}

/// APPEND key value; creates the key when missing.
fn append(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let current = string_value(view, &key)?.unwrap_or_default();
    let mut combined = Vec::with_capacity(current.len() + args[1].len());
    combined.extend_from_slice(&current);
    combined.extend_from_slice(&args[1]);
    let len = combined.len();
    view.put(key, Value::str(combined));
    Ok(Frame::Integer(len as i64))
}

/// MSET key value [key value ...]
fn mset(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() % 2 != 0 {
        return Err(arity_error("mset").into());
    }
    for pair in args.chunks_exact(2) {
        view.put(pair[0].clone(), Value::Str(pair[1].clone()));
    }
    Ok(Frame::ok())
}

/// MSETNX key value [key value ...] — all-or-nothing.
fn msetnx(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() % 2 != 0 {
        return Err(arity_error("msetnx").into());
    }
    for pair in args.chunks_exact(2) {
        if view.exists(&pair[0]) {
            return Ok(Frame::Integer(0));
        }
    }
    for pair in args.chunks_exact(2) {
        view.put(pair[0].clone(), Value::Str(pair[1].clone()));
    }
    Ok(Frame::Integer(1))
}

/// MGET key [key ...]; misses and non-string values read as null.
fn mget(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let replies = args
        .iter()
        .map(|key| match string_value(view, key) {
            Ok(Some(data)) => Frame::Bulk(data),
            _ => Frame::Null,
        })
        .collect();
    Ok(Frame::Array(replies))
}

/// GETDEL key
fn getdel(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = &args[0];
    match string_value(view, key) {
        Ok(Some(data)) => {
            view.remove(key);
            Ok(Frame::Bulk(data))
        }
        _ => Ok(Frame::Null),
    }
}

/// Shared INCR/DECR/INCRBY/DECRBY body: missing keys count from "0".
fn incr_by(view: &mut DbView<'_>, key: &Bytes, delta: i64) -> Result<Frame> {
    let current = match string_value(view, key)? {
        Some(data) => parse_i64(&data).ok_or(CommandError::NotInteger)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    view.put(key.clone(), Value::str(next.to_string()));
    Ok(Frame::Integer(next))
}

fn incr(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    incr_by(view, &args[0], 1)
}

fn decr(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    incr_by(view, &args[0], -1)
}

fn incrby(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let delta = parse_i64(&args[1]).ok_or(CommandError::DeltaNotInteger)?;
    incr_by(view, &args[0], delta)
}

fn decrby(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let delta = parse_i64(&args[1]).ok_or(CommandError::DeltaNotInteger)?;
    incr_by(view, &args[0], delta.wrapping_neg())
}

/// INCRBYFLOAT key increment — arbitrary-precision decimal; the stored
/// representation is the canonical decimal string.
fn incrbyfloat(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let delta = parse_decimal(&args[1]).ok_or(CommandError::NotFloat)?;
    let current = match string_value(view, &key)? {
        Some(data) => parse_decimal(&data).ok_or(CommandError::NotFloat)?,
        None => BigDecimal::from(0),
    };
    let next = (current + delta).normalized();
    let text = next.to_string();
    view.put(key, Value::str(text.clone()));
    Ok(Frame::bulk(text))
}

fn parse_decimal(data: &[u8]) -> Option<BigDecimal> {
    BigDecimal::from_str(std::str::from_utf8(data).ok()?.trim()).ok()
}

/// GETEX key [EX sec|PX ms|EXAT ts|PXAT ts|PERSIST]
fn getex(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() > 3 {
        return Err(arity_error("getex").into());
    }
    let key = first_key(args);
    let Some(data) = string_value(view, &key)? else {
        return Ok(Frame::Null);
    };

    if args.len() == 3 {
        match upper(&args[1]).as_str() {
            "EX" => {
                let ms = parse_ttl_ms(&args[2], 1000)?;
                view.db().expire_after(&key, Duration::from_millis(ms));
            }
            "PX" => {
                let ms = parse_ttl_ms(&args[2], 1)?;
                view.db().expire_after(&key, Duration::from_millis(ms));
            }
            "EXAT" => {
                let ts = parse_i64(&args[2]).ok_or(CommandError::InvalidExpireTime)?;
                view.db().expire_at(&key, (ts.max(0) as u64).saturating_mul(1000));
            }
            "PXAT" => {
                let ts = parse_i64(&args[2]).ok_or(CommandError::InvalidExpireTime)?;
                view.db().expire_at(&key, ts.max(0) as u64);
            }
            _ => return Err(CommandError::Syntax.into()),
        }
    } else if args.len() == 2 {
        if upper(&args[1]) != "PERSIST" {
            return Err(CommandError::Syntax.into());
        }
        view.db().persist(&key);
    }

    Ok(Frame::Bulk(data))
}

/// SETRANGE key offset value — zero-pads up to `offset`.
fn setrange(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let offset = parse_i64(&args[1]).ok_or(CommandError::NotInteger)?;
    if offset < 0 {
        return Err(CommandError::OffsetOutOfRange.into());
    }
    let offset = offset as usize;
    let patch = &args[2];

    let mut data = string_value(view, &key)?
        .map(|b| b.to_vec())
        .unwrap_or_default();
    if data.len() < offset {
        data.resize(offset, 0);
    }
    for (i, &byte) in patch.iter().enumerate() {
        let index = offset + i;
        if index < data.len() {
            data[index] = byte;
        } else {
            data.push(byte);
        }
    }
    let len = data.len();
    view.put(key, Value::str(data));
    Ok(Frame::Integer(len as i64))
}

/// GETRANGE key start end — clamps indices; start > end reads empty.
fn getrange(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let Some(data) = string_value(view, &args[0])? else {
        return Err(CommandError::NoSuchKey.into());
    };
    let start_arg = parse_i64(&args[1]).ok_or(CommandError::Syntax)?;
    let end_arg = parse_i64(&args[2]).ok_or(CommandError::Syntax)?;

    let len = data.len() as i64;
    let clamp = |index: i64| -> i64 {
        if index > 0 {
            index.min(len)
        } else if index < 0 {
            if -index > len {
                0
            } else {
                len + index
            }
        } else {
            0
        }
    };
    let start = clamp(start_arg);
    let end = clamp(end_arg);
    if start > end {
        return Ok(Frame::bulk(""));
    }
    let from = start as usize;
    let to = ((end + 1) as usize).min(data.len());
    if from >= to {
        return Ok(Frame::bulk(""));
    }
    Ok(Frame::Bulk(data.slice(from..to)))
}

pub(super) fn register(table: &mut CommandTable) {
    const W: CommandFlags = CommandFlags::WRITE;
    const R: CommandFlags = CommandFlags::READ;

    table.register(Command::locked("set", set, write_first_key, -3, W));
    table.register(Command::locked("get", get, read_first_key, 2, R));
    table.register(Command::locked("strlen", strlen, read_first_key, 2, R));
    table.register(Command::locked("append", append, write_first_key, 3, W));
    table.register(Command::locked("mset", mset, write_all_keys, -3, W));
    table.register(Command::locked("msetnx", msetnx, write_all_keys, -3, W));
    table.register(Command::locked("mget", mget, read_all_keys, -2, R));
    table.register(Command::locked("getdel", getdel, write_first_key, 2, W));
    table.register(Command::locked("incr", incr, write_first_key, 2, W));
    table.register(Command::locked("decr", decr, write_first_key, 2, W));
    table.register(Command::locked("incrby", incrby, write_first_key, 3, W));
    table.register(Command::locked("decrby", decrby, write_first_key, 3, W));
    table.register(Command::locked("incrbyfloat", incrbyfloat, write_first_key, 3, W));
    table.register(Command::locked("getex", getex, write_first_key, -2, W));
    table.register(Command::locked("setrange", setrange, write_first_key, 4, W));
    table.register(Command::locked("getrange", getrange, read_first_key, 4, R));
}
