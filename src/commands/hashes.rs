//! Hash command executors.

use super::registry::{
    read_first_key, write_first_key, Command, CommandFlags, CommandTable,
};
use super::{arity_error, first_key, lower, parse_i64};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::DbView;
use crate::types::{Hash, Value};
use bigdecimal::BigDecimal;
use bytes::Bytes;
use std::str::FromStr;

fn hash_value<'v>(view: &'v DbView<'_>, key: &[u8]) -> Result<Option<&'v Hash>> {
    match view.entry(key) {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(CommandError::WrongType.into()),
    }
}

fn hash_value_mut<'v>(view: &'v mut DbView<'_>, key: &[u8]) -> Result<Option<&'v mut Hash>> {
    match view.entry_mut(key) {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(CommandError::WrongType.into()),
    }
}

/// HSET key field value [field value ...] — counts newly created
/// fields only.
fn hset(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() % 2 != 1 {
        return Err(arity_error("hset").into());
    }
    let key = first_key(args);
    let mut inserted = 0i64;
    match hash_value_mut(view, &key)? {
        Some(hash) => {
            for pair in args[1..].chunks_exact(2) {
                inserted += i64::from(hash.insert(pair[0].clone(), pair[1].clone()));
            }
        }
        None => {
            let mut hash = Hash::new();
            for pair in args[1..].chunks_exact(2) {
                inserted += i64::from(hash.insert(pair[0].clone(), pair[1].clone()));
            }
            view.put(key, Value::Hash(hash));
        }
    }
    Ok(Frame::Integer(inserted))
}

/// HSETNX key field value — 1 only when the field was absent.
fn hsetnx(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    match hash_value_mut(view, &key)? {
        Some(hash) => {
            if hash.contains(&args[1]) {
                return Ok(Frame::Integer(0));
            }
            hash.insert(args[1].clone(), args[2].clone());
        }
        None => {
            let mut hash = Hash::new();
            hash.insert(args[1].clone(), args[2].clone());
            view.put(key, Value::Hash(hash));
        }
    }
    Ok(Frame::Integer(1))
}

/// HGET key field
fn hget(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    match hash_value(view, &args[0])?.and_then(|hash| hash.get(&args[1])) {
        Some(value) => Ok(Frame::Bulk(value.clone())),
        None => Ok(Frame::Null),
    }
}

/// HGETALL key — field, value, field, value, ...
fn hgetall(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let Some(hash) = hash_value(view, &args[0])? else {
        return Ok(Frame::empty_array());
    };
    let mut items = Vec::with_capacity(hash.len() * 2);
    hash.for_each(|field, value| {
        items.push(field.clone());
        items.push(value.clone());
        true
    });
    Ok(Frame::multi_bulk(items))
}

/// HEXISTS key field
fn hexists(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let exists = hash_value(view, &args[0])?.is_some_and(|hash| hash.contains(&args[1]));
    Ok(Frame::Integer(i64::from(exists)))
}

/// HLEN key
fn hlen(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let len = hash_value(view, &args[0])?.map_or(0, Hash::len);
    Ok(Frame::Integer(len as i64))
}

/// HKEYS key
fn hkeys(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let Some(hash) = hash_value(view, &args[0])? else {
        return Ok(Frame::empty_array());
    };
    let mut fields = Vec::with_capacity(hash.len());
    hash.for_each(|field, _| {
        fields.push(field.clone());
        true
    });
    Ok(Frame::multi_bulk(fields))
}

/// HVALS key
fn hvals(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let Some(hash) = hash_value(view, &args[0])? else {
        return Ok(Frame::empty_array());
    };
    let mut values = Vec::with_capacity(hash.len());
    hash.for_each(|_, value| {
        values.push(value.clone());
        true
    });
    Ok(Frame::multi_bulk(values))
}

/// HDEL key field [field ...] — deletes the hash key when its last
/// field goes.
fn hdel(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let Some(hash) = hash_value_mut(view, &key)? else {
        return Ok(Frame::Integer(0));
    };
    let mut deleted = 0i64;
    for field in &args[1..] {
        deleted += i64::from(hash.remove(field).is_some());
    }
    if hash.is_empty() {
        view.remove(&key);
    }
    Ok(Frame::Integer(deleted))
}

/// HINCRBY key field increment — creates hash and field as needed.
fn hincrby(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let increment = parse_i64(&args[2]).ok_or(CommandError::Syntax)?;
    let key = first_key(args);
    let field = args[1].clone();

    match hash_value_mut(view, &key)? {
        Some(hash) => {
            let current = match hash.get(&field) {
                Some(value) => parse_i64(value).ok_or(CommandError::HashNotInteger)?,
                None => 0,
            };
            let next = current.checked_add(increment).ok_or(CommandError::Overflow)?;
            hash.insert(field, Bytes::from(next.to_string()));
            Ok(Frame::Integer(next))
        }
        None => {
            let mut hash = Hash::new();
            hash.insert(field, Bytes::from(increment.to_string()));
            view.put(key, Value::Hash(hash));
            Ok(Frame::Integer(increment))
        }
    }
}

/// HINCRBYFLOAT key field increment — arbitrary-precision decimal.
fn hincrbyfloat(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let increment = parse_hash_decimal(&args[2]).ok_or(CommandError::Syntax)?;
    let key = first_key(args);
    let field = args[1].clone();

    match hash_value_mut(view, &key)? {
        Some(hash) => {
            let current = match hash.get(&field) {
                Some(value) => parse_hash_decimal(value).ok_or(CommandError::HashNotFloat)?,
                None => BigDecimal::from(0),
            };
            let next = (current + increment).normalized();
            let text = next.to_string();
            hash.insert(field, Bytes::from(text.clone()));
            Ok(Frame::bulk(text))
        }
        None => {
            let text = increment.normalized().to_string();
            let mut hash = Hash::new();
            hash.insert(field, Bytes::from(text.clone()));
            view.put(key, Value::Hash(hash));
            Ok(Frame::bulk(text))
        }
    }
}

fn parse_hash_decimal(data: &[u8]) -> Option<BigDecimal> {
    BigDecimal::from_str(std::str::from_utf8(data).ok()?.trim()).ok()
}

/// HMGET key field [field ...] — per-field nulls for misses; a missing
/// key yields all nulls.
fn hmget(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let hash = hash_value(view, &args[0])?;
    let replies = args[1..]
        .iter()
        .map(|field| match hash.and_then(|h| h.get(field)) {
            Some(value) => Frame::Bulk(value.clone()),
            None => Frame::Null,
        })
        .collect();
    Ok(Frame::Array(replies))
}

/// HSTRLEN key field
fn hstrlen(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let len = hash_value(view, &args[0])?
        .and_then(|hash| hash.get(&args[1]))
        .map_or(0, Bytes::len);
    Ok(Frame::Integer(len as i64))
}

/// HRANDFIELD key [count [WITHVALUES]] — count > 0 distinct, count < 0
/// with replacement, count == 0 empty.
fn hrandfield(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() > 3 {
        return Err(arity_error("hrandfield").into());
    }
    let count = if args.len() >= 2 {
        parse_i64(&args[1]).ok_or(CommandError::NotInteger)?
    } else {
        1
    };
    if count == 0 {
        return Ok(Frame::empty_array());
    }
    let with_values = match args.len() {
        3 if lower(&args[2]) == "withvalues" => true,
        3 => return Err(CommandError::Syntax.into()),
        _ => false,
    };

    let Some(hash) = hash_value(view, &args[0])? else {
        return Ok(Frame::empty_array());
    };
    let fields = if count > 0 {
        hash.random_fields(count as usize)
    } else {
        hash.random_fields_repeating((-count) as usize)
    };

    let mut items = Vec::with_capacity(fields.len() * 2);
    for field in fields {
        if with_values {
            let value = hash.get(&field).cloned().unwrap_or_default();
            items.push(field);
            items.push(value);
        } else {
            items.push(field);
        }
    }
    Ok(Frame::multi_bulk(items))
}

pub(super) fn register(table: &mut CommandTable) {
    const W: CommandFlags = CommandFlags::WRITE;
    const R: CommandFlags = CommandFlags::READ;

    table.register(Command::locked("hset", hset, write_first_key, -4, W));
    table.register(Command::locked("hsetnx", hsetnx, write_first_key, 4, W));
    table.register(Command::locked("hget", hget, read_first_key, 3, R));
    table.register(Command::locked("hgetall", hgetall, read_first_key, 2, R));
    table.register(Command::locked("hexists", hexists, read_first_key, 3, R));
    table.register(Command::locked("hlen", hlen, read_first_key, 2, R));
    table.register(Command::locked("hkeys", hkeys, read_first_key, 2, R));
    table.register(Command::locked("hdel", hdel, write_first_key, -3, W));
    table.register(Command::locked("hincrby", hincrby, write_first_key, 4, W));
    table.register(Command::locked("hincrbyfloat", hincrbyfloat, write_first_key, 4, W));
    table.register(Command::locked("hmget", hmget, read_first_key, -3, R));
    table.register(Command::locked("hstrlen", hstrlen, read_first_key, 3, R));
    table.register(Command::locked("hvals", hvals, read_first_key, 2, R));
    table.register(Command::locked("hrandfield", hrandfield, read_first_key, -2, R));
}
