//! Set command executors.

use super::registry::{
    read_all_keys, read_first_key, write_first_key, Command, CommandFlags, CommandTable,
};
use super::{arity_error, first_key, parse_i64, upper};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::DbView;
use crate::types::{Set, Value};
use bytes::Bytes;

fn set_value<'v>(view: &'v DbView<'_>, key: &[u8]) -> Result<Option<&'v Set>> {
    match view.entry(key) {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(CommandError::WrongType.into()),
    }
}

fn set_value_mut<'v>(view: &'v mut DbView<'_>, key: &[u8]) -> Result<Option<&'v mut Set>> {
    match view.entry_mut(key) {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(CommandError::WrongType.into()),
    }
}

/// Copy out the sets under `keys`; a missing key reads as the empty
/// set. The copies feed the combination operators, so no payload
/// aliasing crosses shards.
fn collect_sets(view: &DbView<'_>, keys: &[Bytes]) -> Result<Vec<Set>> {
    keys.iter()
        .map(|key| Ok(set_value(view, key)?.cloned().unwrap_or_default()))
        .collect()
}

/// SADD key member [member ...] — counts only new members.
fn sadd(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let mut added = 0i64;
    match set_value_mut(view, &key)? {
        Some(set) => {
            for member in &args[1..] {
                added += i64::from(set.add(member.clone()));
            }
        }
        None => {
            let mut set = Set::new();
            for member in &args[1..] {
                added += i64::from(set.add(member.clone()));
            }
            view.put(key, Value::Set(set));
        }
    }
    Ok(Frame::Integer(added))
}

/// SMEMBERS key
fn smembers(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    match set_value(view, &args[0])? {
        Some(set) => Ok(Frame::multi_bulk(set.members())),
        None => Ok(Frame::empty_array()),
    }
}

/// SCARD key
fn scard(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let len = set_value(view, &args[0])?.map_or(0, Set::len);
    Ok(Frame::Integer(len as i64))
}

/// SREM key member [member ...] — deletes the key when emptied.
fn srem(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let Some(set) = set_value_mut(view, &key)? else {
        return Ok(Frame::Integer(0));
    };
    let mut removed = 0i64;
    for member in &args[1..] {
        removed += i64::from(set.remove(member));
    }
    if set.is_empty() {
        view.remove(&key);
    }
    Ok(Frame::Integer(removed))
}

/// Apply a set combinator over source keys and reply with the
/// resulting members.
fn combine(
    view: &DbView<'_>,
    keys: &[Bytes],
    op: impl Fn(&[&Set]) -> Set,
) -> Result<Frame> {
    let sets = collect_sets(view, keys)?;
    let refs: Vec<&Set> = sets.iter().collect();
    Ok(Frame::multi_bulk(op(&refs).members()))
}

/// Apply a set combinator and store the result at `args[0]`. The
/// destination is always overwritten; overwriting clears any TTL.
fn combine_store(
    view: &mut DbView<'_>,
    args: &[Bytes],
    op: impl Fn(&[&Set]) -> Set,
) -> Result<Frame> {
    let dest = first_key(args);
    let sets = collect_sets(view, &args[1..])?;
    let refs: Vec<&Set> = sets.iter().collect();
    let result = op(&refs);
    let len = result.len();
    let inserted = view.put(dest.clone(), Value::Set(result));
    if !inserted {
        view.db().persist(&dest);
    }
    Ok(Frame::Integer(len as i64))
}

fn sdiff(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    combine(view, args, Set::diff)
}

fn sdiffstore(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    combine_store(view, args, Set::diff)
}

fn sunion(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    combine(view, args, Set::union)
}

fn sunionstore(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    combine_store(view, args, Set::union)
}

fn sinter(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    combine(view, args, Set::intersect)
}

fn sinterstore(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    combine_store(view, args, Set::intersect)
}

/// SINTERCARD numkeys key [key ...] [LIMIT limit] — LIMIT 0 means
/// unlimited.
fn sintercard(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let numkeys = parse_i64(&args[0]).ok_or(CommandError::Syntax)?;
    if numkeys < 0 {
        return Err(CommandError::Syntax.into());
    }
    let numkeys = numkeys as usize;

    let (keys, limit) = if args.len() == numkeys + 1 {
        (&args[1..], 0usize)
    } else if args.len() == numkeys + 3 {
        if upper(&args[args.len() - 2]) != "LIMIT" {
            return Err(CommandError::Syntax.into());
        }
        let limit = parse_i64(&args[args.len() - 1]).ok_or(CommandError::Syntax)?;
        if limit < 0 {
            return Err(CommandError::Syntax.into());
        }
        (&args[1..args.len() - 2], limit as usize)
    } else {
        return Err(CommandError::Syntax.into());
    };

    let sets = collect_sets(view, keys)?;
    let refs: Vec<&Set> = sets.iter().collect();
    let cardinality = Set::intersect(&refs).len();
    let reply = if limit == 0 {
        cardinality
    } else {
        cardinality.min(limit)
    };
    Ok(Frame::Integer(reply as i64))
}

/// SISMEMBER key member
fn sismember(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let contains = set_value(view, &args[0])?.is_some_and(|set| set.contains(&args[1]));
    Ok(Frame::Integer(i64::from(contains)))
}

/// SMISMEMBER key member [member ...] — one 0/1 per member, in order.
fn smismember(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let set = set_value(view, &args[0])?;
    let replies = args[1..]
        .iter()
        .map(|member| {
            Frame::Integer(i64::from(set.is_some_and(|s| s.contains(member))))
        })
        .collect();
    Ok(Frame::Array(replies))
}

/// SMOVE source destination member — no-op returning 0 when the
/// source lacks the member; atomic under the two-key write lock.
fn smove(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let src = first_key(args);
    let dst = args[1].clone();
    let member = args[2].clone();

    // Type-check both ends before mutating either.
    if set_value(view, &src)?.is_none() {
        return Ok(Frame::Integer(0));
    }
    if src != dst {
        set_value(view, &dst)?;
    }

    let emptied = match set_value_mut(view, &src)? {
        Some(set) => {
            if !set.remove(&member) {
                return Ok(Frame::Integer(0));
            }
            set.is_empty()
        }
        None => return Ok(Frame::Integer(0)),
    };
    if emptied {
        view.remove(&src);
    }

    match set_value_mut(view, &dst)? {
        Some(set) => {
            set.add(member);
        }
        None => {
            view.put(dst, Value::Set(Set::from_members([member])));
        }
    }
    Ok(Frame::Integer(1))
}

fn smove_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone(), args[1].clone()], Vec::new())
}

/// SRANDMEMBER key [count] — count > 0 distinct, count < 0 with
/// replacement.
fn srandmember(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() > 2 {
        return Err(arity_error("srandmember").into());
    }
    let count = if args.len() == 2 {
        parse_i64(&args[1]).ok_or(CommandError::Syntax)?
    } else {
        1
    };
    let Some(set) = set_value(view, &args[0])? else {
        return Ok(Frame::Null);
    };
    let members = if count >= 0 {
        set.random_members(count as usize)
    } else {
        set.random_members_repeating((-count) as usize)
    };
    Ok(Frame::multi_bulk(members))
}

/// SPOP key [count] — removes and returns distinct members.
fn spop(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() > 2 {
        return Err(arity_error("spop").into());
    }
    let count = if args.len() == 2 {
        parse_i64(&args[1]).ok_or(CommandError::Syntax)?
    } else {
        1
    };
    if count < 0 {
        return Err(CommandError::CountOutOfRange.into());
    }

    let key = first_key(args);
    let Some(set) = set_value_mut(view, &key)? else {
        return Ok(Frame::Null);
    };
    let members = set.random_members(count as usize);
    for member in &members {
        set.remove(member);
    }
    if set.is_empty() {
        view.remove(&key);
    }
    Ok(Frame::multi_bulk(members))
}

fn store_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone()], args[1..].to_vec())
}

fn sintercard_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    // numkeys limits the key range; trailing LIMIT tokens are not keys.
    let numkeys = parse_i64(&args[0]).unwrap_or(0).max(0) as usize;
    let end = (1 + numkeys).min(args.len());
    (Vec::new(), args[1..end].to_vec())
}

pub(super) fn register(table: &mut CommandTable) {
    const W: CommandFlags = CommandFlags::WRITE;
    const R: CommandFlags = CommandFlags::READ;

    table.register(Command::locked("sadd", sadd, write_first_key, -2, W));
    table.register(Command::locked("smembers", smembers, read_first_key, 2, R));
    table.register(Command::locked("scard", scard, read_first_key, 2, R));
    table.register(Command::locked("srem", srem, write_first_key, -2, W));
    table.register(Command::locked("sdiff", sdiff, read_all_keys, -2, R));
    table.register(Command::locked("sdiffstore", sdiffstore, store_keys, -3, W));
    table.register(Command::locked("sunion", sunion, read_all_keys, -2, R));
    table.register(Command::locked("sunionstore", sunionstore, store_keys, -3, W));
    table.register(Command::locked("sinter", sinter, read_all_keys, -2, R));
    table.register(Command::locked("sinterstore", sinterstore, store_keys, -3, W));
    table.register(Command::locked("sintercard", sintercard, sintercard_keys, -3, R));
    table.register(Command::locked("sismember", sismember, read_first_key, 3, R));
    table.register(Command::locked("smismember", smismember, read_first_key, -3, R));
    table.register(Command::locked("smove", smove, smove_keys, 4, W));
    table.register(Command::locked("srandmember", srandmember, read_first_key, -2, R));
    table.register(Command::locked("spop", spop, write_first_key, -2, W));
}
