//! List command executors (the non-blocking ones; the B-prefixed
//! variants live in `blocking`).

use super::registry::{
    read_first_key, write_first_key, Command, CommandFlags, CommandTable,
};
use super::{arity_error, first_key, lower, parse_i64, upper};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::DbView;
use crate::types::{List, Value};
use bytes::Bytes;

/// Borrow the list under `key`; None when absent, WRONGTYPE on a
/// different variant.
pub(super) fn list_value<'v>(view: &'v DbView<'_>, key: &[u8]) -> Result<Option<&'v List>> {
    match view.entry(key) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType.into()),
    }
}

/// Mutable variant of [`list_value`].
pub(super) fn list_value_mut<'v>(
    view: &'v mut DbView<'_>,
    key: &[u8],
) -> Result<Option<&'v mut List>> {
    match view.entry_mut(key) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType.into()),
    }
}

/// Whether a push targets the head or the tail.
#[derive(Clone, Copy, PartialEq)]
pub(super) enum End {
    Left,
    Right,
}

impl End {
    /// Parse a LEFT/RIGHT token.
    pub(super) fn parse(arg: &[u8]) -> Option<End> {
        match lower(arg).as_str() {
            "left" => Some(End::Left),
            "right" => Some(End::Right),
            _ => None,
        }
    }
}

/// Shared LPUSH/RPUSH/LPUSHX/RPUSHX body.
fn push(view: &mut DbView<'_>, args: &[Bytes], end: End, create: bool) -> Result<Frame> {
    let key = first_key(args);
    match list_value_mut(view, &key)? {
        Some(list) => {
            for value in &args[1..] {
                match end {
                    End::Left => list.push_front(value.clone()),
                    End::Right => list.push_back(value.clone()),
                }
            }
            Ok(Frame::Integer(list.len() as i64))
        }
        None if create => {
            let list = List::from_values(args[1..].iter().cloned());
            let len = list.len();
            view.put(key, Value::List(list));
            Ok(Frame::Integer(len as i64))
        }
        None => Ok(Frame::Integer(0)),
    }
}

fn lpush(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    push(view, args, End::Left, true)
}

fn lpushx(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    push(view, args, End::Left, false)
}

fn rpush(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    push(view, args, End::Right, true)
}

fn rpushx(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    push(view, args, End::Right, false)
}

/// Shared LPOP/RPOP body: the reply is always a multi-bulk, and
/// popping the list empty deletes the key.
fn pop(view: &mut DbView<'_>, args: &[Bytes], end: End, cmd: &'static str) -> Result<Frame> {
    if args.len() > 2 {
        return Err(arity_error(cmd).into());
    }
    let count = if args.len() == 2 {
        parse_i64(&args[1]).ok_or(CommandError::Syntax)?
    } else {
        1
    };

    let key = first_key(args);
    let Some(list) = list_value_mut(view, &key)? else {
        return Ok(Frame::Null);
    };
    let count = count.min(list.len() as i64);
    let mut values = Vec::new();
    for _ in 0..count.max(0) {
        let popped = match end {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        };
        match popped {
            Some(value) => values.push(value),
            None => break,
        }
    }
    if list.is_empty() {
        view.remove(&key);
    }
    Ok(Frame::multi_bulk(values))
}

fn lpop(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    pop(view, args, End::Left, "lpop")
}

fn rpop(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    pop(view, args, End::Right, "rpop")
}

/// LLEN key
fn llen(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    match list_value(view, &args[0])? {
        Some(list) => Ok(Frame::Integer(list.len() as i64)),
        None => Ok(Frame::Integer(0)),
    }
}

/// LINDEX key index — negative indices count from the tail;
/// out-of-range reads null.
fn lindex(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let index = parse_i64(&args[1]).ok_or(CommandError::Syntax)?;
    let Some(list) = list_value(view, &args[0])? else {
        return Ok(Frame::Null);
    };
    let len = list.len() as i64;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        return Ok(Frame::Null);
    }
    match list.get(index as usize) {
        Some(value) => Ok(Frame::Bulk(value.clone())),
        None => Ok(Frame::Null),
    }
}

/// Resolve a possibly-negative range endpoint against `len`: clamps
/// below to 0, errors when at or past the end.
fn adjust_index(len: i64, index: i64) -> std::result::Result<i64, ()> {
    let index = if index < 0 { len + index } else { index };
    if index < 0 {
        return Ok(0);
    }
    if index >= len {
        return Err(());
    }
    Ok(index)
}

/// LRANGE key start stop — inclusive range; out-of-range indices clamp
/// rather than error.
fn lrange(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let start_arg = parse_i64(&args[1]).ok_or(CommandError::Syntax)?;
    let stop_arg = parse_i64(&args[2]).ok_or(CommandError::Syntax)?;

    let Some(list) = list_value(view, &args[0])? else {
        return Ok(Frame::empty_array());
    };
    let len = list.len() as i64;
    if len == 0 {
        return Ok(Frame::empty_array());
    }

    let Ok(start) = adjust_index(len, start_arg) else {
        return Ok(Frame::empty_array());
    };
    let stop = adjust_index(len, stop_arg).unwrap_or(len - 1);
    if start > stop {
        return Ok(Frame::empty_array());
    }

    let mut values = Vec::with_capacity((stop - start + 1) as usize);
    list.for_each(|index, value| {
        let index = index as i64;
        if index > stop {
            return false;
        }
        if index >= start {
            values.push(value.clone());
        }
        true
    });
    Ok(Frame::multi_bulk(values))
}

/// LINSERT key BEFORE|AFTER pivot element — -1 when the pivot is
/// absent, 0 when the key is.
fn linsert(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let position = match lower(&args[1]).as_str() {
        "before" => 0usize,
        "after" => 1usize,
        _ => return Err(CommandError::Syntax.into()),
    };
    let Some(list) = list_value_mut(view, &args[0])? else {
        return Ok(Frame::Integer(0));
    };
    let Some(pivot) = list.position(&args[2]) else {
        return Ok(Frame::Integer(-1));
    };
    list.insert(pivot + position, args[3].clone());
    Ok(Frame::Integer(list.len() as i64))
}

/// LREM key count element — count > 0 head-to-tail, count < 0
/// tail-to-head, count == 0 removes all.
fn lrem(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let count = parse_i64(&args[1]).ok_or(CommandError::Syntax)?;
    let element = &args[2];

    let key = first_key(args);
    let Some(list) = list_value_mut(view, &key)? else {
        return Ok(Frame::Integer(0));
    };
    let removed = if count == 0 {
        list.remove_all(element)
    } else if count > 0 {
        list.remove_from_head(element, count as usize)
    } else {
        list.remove_from_tail(element, (-count) as usize)
    };
    if list.is_empty() {
        view.remove(&key);
    }
    Ok(Frame::Integer(removed as i64))
}

/// LSET key index element — out-of-range (or missing key) errors.
fn lset(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let index = parse_i64(&args[1]).ok_or(CommandError::Syntax)?;
    let Some(list) = list_value_mut(view, &args[0])? else {
        return Err(CommandError::IndexOutOfRange.into());
    };
    let len = list.len() as i64;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        return Err(CommandError::IndexOutOfRange.into());
    }
    list.set(index as usize, args[2].clone());
    Ok(Frame::ok())
}

/// LTRIM key start stop — keeps the inclusive range; a range that
/// covers nothing deletes the key.
fn ltrim(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let start_arg = parse_i64(&args[1]).ok_or(CommandError::Syntax)?;
    let stop_arg = parse_i64(&args[2]).ok_or(CommandError::Syntax)?;

    let key = first_key(args);
    let Some(list) = list_value_mut(view, &key)? else {
        return Err(CommandError::NoSuchKey.into());
    };
    let len = list.len() as i64;

    let Ok(start) = adjust_index(len, start_arg) else {
        view.remove(&key);
        return Ok(Frame::ok());
    };
    let stop = adjust_index(len, stop_arg).unwrap_or(len - 1);
    if start > stop {
        view.remove(&key);
        return Ok(Frame::ok());
    }

    for _ in 0..start {
        list.pop_front();
    }
    for _ in 0..(len - 1 - stop) {
        list.pop_back();
    }
    Ok(Frame::ok())
}

/// Move one element between two (possibly identical) list keys; both
/// keys are expected to be write-locked. Returns None when the source
/// is missing.
pub(super) fn move_between(
    view: &mut DbView<'_>,
    src: &Bytes,
    dst: &Bytes,
    src_end: End,
    dst_end: End,
) -> Result<Option<Bytes>> {
    // Validate the destination type up front so the pop is not lost to
    // a WRONGTYPE on the push side.
    if src != dst {
        list_value(view, dst)?;
    }

    let value = match list_value_mut(view, src)? {
        Some(list) => {
            let value = match src_end {
                End::Left => list.pop_front(),
                End::Right => list.pop_back(),
            };
            let emptied = list.is_empty();
            match value {
                Some(value) => {
                    if emptied {
                        view.remove(src);
                    }
                    value
                }
                None => return Ok(None),
            }
        }
        None => return Ok(None),
    };

    match list_value_mut(view, dst)? {
        Some(list) => match dst_end {
            End::Left => list.push_front(value.clone()),
            End::Right => list.push_back(value.clone()),
        },
        None => {
            let mut list = List::new();
            match dst_end {
                End::Left => list.push_front(value.clone()),
                End::Right => list.push_back(value.clone()),
            }
            view.put(dst.clone(), Value::List(list));
        }
    }
    Ok(Some(value))
}

/// LMOVE source destination LEFT|RIGHT LEFT|RIGHT — atomic under the
/// two-key write lock.
fn lmove(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let src_end = End::parse(&args[2]).ok_or(CommandError::Syntax)?;
    let dst_end = End::parse(&args[3]).ok_or(CommandError::Syntax)?;
    match move_between(view, &args[0], &args[1], src_end, dst_end)? {
        Some(value) => Ok(Frame::Bulk(value)),
        None => Ok(Frame::Null),
    }
}

fn lmove_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone(), args[1].clone()], Vec::new())
}

/// Parsed form of `numkeys key [key ...] LEFT|RIGHT [COUNT count]`,
/// shared by LMPOP and BLMPOP (which prefixes a timeout).
pub(super) struct MpopArgs {
    pub keys: Vec<Bytes>,
    pub end: End,
    pub count: usize,
}

pub(super) fn parse_mpop(args: &[Bytes]) -> Result<Option<MpopArgs>> {
    let numkeys = parse_i64(&args[0]).ok_or(CommandError::Syntax)?;
    if numkeys <= 0 {
        return Ok(None);
    }
    let numkeys = numkeys as usize;
    if args.len() < numkeys + 2 {
        return Err(CommandError::Syntax.into());
    }
    let keys = args[1..1 + numkeys].to_vec();
    let end = End::parse(&args[1 + numkeys]).ok_or(CommandError::Syntax)?;

    let rest = &args[2 + numkeys..];
    let count = match rest.len() {
        0 => 1,
        2 if upper(&rest[0]) == "COUNT" => {
            let count = parse_i64(&rest[1]).ok_or(CommandError::Syntax)?;
            if count <= 0 {
                return Ok(None);
            }
            count as usize
        }
        _ => return Err(CommandError::Syntax.into()),
    };
    Ok(Some(MpopArgs { keys, end, count }))
}

/// Pop up to `count` elements from one end of the list under `key`,
/// deleting the key when emptied. None when the key is absent.
pub(super) fn pop_many(
    view: &mut DbView<'_>,
    key: &Bytes,
    end: End,
    count: usize,
) -> Result<Option<Vec<Bytes>>> {
    let Some(list) = list_value_mut(view, key)? else {
        return Ok(None);
    };
    let count = count.min(list.len());
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let popped = match end {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        };
        match popped {
            Some(value) => values.push(value),
            None => break,
        }
    }
    if list.is_empty() {
        view.remove(key);
    }
    Ok(Some(values))
}

/// The `[key, [values...]]` reply shape of LMPOP/BLMPOP.
pub(super) fn mpop_reply(key: &Bytes, values: Vec<Bytes>) -> Frame {
    Frame::Array(vec![Frame::Bulk(key.clone()), Frame::multi_bulk(values)])
}

/// LMPOP numkeys key [key ...] LEFT|RIGHT [COUNT count] — pops from
/// the first non-empty list only. Declares no extractor and locks one
/// key at a time itself.
fn lmpop(
    db: std::sync::Arc<crate::storage::Db>,
    args: Vec<Bytes>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let Some(parsed) = parse_mpop(&args)? else {
            return Ok(Frame::Null);
        };
        for key in &parsed.keys {
            let mut view = db.view(std::slice::from_ref(key), &[]);
            if let Some(values) = pop_many(&mut view, key, parsed.end, parsed.count)? {
                return Ok(mpop_reply(key, values));
            }
        }
        Ok(Frame::Null)
    })
}

pub(super) fn register(table: &mut CommandTable) {
    const W: CommandFlags = CommandFlags::WRITE;
    const R: CommandFlags = CommandFlags::READ;

    table.register(Command::locked("lpush", lpush, write_first_key, -2, W));
    table.register(Command::locked("lpushx", lpushx, write_first_key, -2, W));
    table.register(Command::locked("rpush", rpush, write_first_key, -2, W));
    table.register(Command::locked("rpushx", rpushx, write_first_key, -2, W));
    table.register(Command::locked("lpop", lpop, write_first_key, -2, W));
    table.register(Command::locked("rpop", rpop, write_first_key, -2, W));
    table.register(Command::locked("llen", llen, read_first_key, 2, R));
    table.register(Command::locked("lindex", lindex, read_first_key, 3, R));
    table.register(Command::locked("lrange", lrange, read_first_key, 4, R));
    table.register(Command::locked("linsert", linsert, write_first_key, 5, W));
    table.register(Command::locked("lrem", lrem, write_first_key, 4, W));
    table.register(Command::locked("lset", lset, write_first_key, 4, W));
    table.register(Command::locked("ltrim", ltrim, write_first_key, 4, W));
    table.register(Command::locked("lmove", lmove, lmove_keys, 5, W));
    table.register(Command::self_locking("lmpop", lmpop, -2, W));
}
