//! Bitmap command executors.
//!
//! Bitmaps live in `Str` values; every command here views the stored
//! bytes through [`Bitmap`] and writes the buffer back as a string.

use super::registry::{read_first_key, write_first_key, Command, CommandFlags, CommandTable};
use super::strings::string_value;
use super::{arity_error, first_key, lower, parse_i64, upper};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::DbView;
use crate::types::{Bitmap, Value};
use bytes::Bytes;

/// Offsets are valid in `[0, 2^33)`.
fn check_offset(arg: &[u8]) -> Result<u64> {
    match parse_i64(arg) {
        Some(offset) if offset >= 0 && offset < (2i64 << 32) => Ok(offset as u64),
        _ => Err(CommandError::BitOffset.into()),
    }
}

/// Parse a bit operand that must be exactly 0 or 1.
fn parse_bit(arg: &[u8], err: CommandError) -> Result<bool> {
    match arg {
        b"1" => Ok(true),
        b"0" => Ok(false),
        _ => Err(err.into()),
    }
}

/// SETBIT key offset value — returns the previous bit.
fn setbit(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let key = first_key(args);
    let offset = check_offset(&args[1])?;
    let value = parse_bit(&args[2], CommandError::BitValue)?;

    let mut bitmap = match string_value(view, &key)? {
        Some(data) => Bitmap::from_bytes(&data),
        None => Bitmap::new(),
    };
    let old = bitmap.get_bit(offset);
    bitmap.set_bit(offset, value);
    view.put(key, Value::Str(bitmap.into_bytes()));
    Ok(Frame::Integer(i64::from(old)))
}

/// GETBIT key offset — out-of-range and missing keys read 0.
fn getbit(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let offset = check_offset(&args[1])?;
    let Some(data) = string_value(view, &args[0])? else {
        return Ok(Frame::Integer(0));
    };
    let bitmap = Bitmap::from_bytes(&data);
    Ok(Frame::Integer(i64::from(bitmap.get_bit(offset))))
}

/// Byte vs bit indexing for BITCOUNT/BITPOS ranges.
fn parse_range_unit(arg: &[u8]) -> Result<bool> {
    match lower(arg).as_str() {
        "byte" => Ok(true),
        "bit" => Ok(false),
        _ => Err(CommandError::Syntax.into()),
    }
}

/// BITCOUNT key [start end [BYTE|BIT]] — defaults to byte indexing;
/// negative indices count from the end.
fn bitcount(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() > 4 || args.len() == 2 {
        return Err(arity_error("bitcount").into());
    }
    let mut begin = 0i64;
    let mut end = 0i64;
    if args.len() >= 3 {
        begin = parse_i64(&args[1]).ok_or(CommandError::NotInteger)?;
        end = parse_i64(&args[2]).ok_or(CommandError::NotInteger)?;
    }
    let byte_mode = if args.len() == 4 {
        parse_range_unit(&args[3])?
    } else {
        true
    };

    let Some(data) = string_value(view, &args[0])? else {
        return Ok(Frame::Integer(0));
    };
    let bitmap = Bitmap::from_bytes(&data);
    if args.len() == 1 {
        begin = 0;
        end = if byte_mode {
            bitmap.byte_size() - 1
        } else {
            bitmap.bit_size() - 1
        };
    }

    let mut count = 0i64;
    if byte_mode {
        bitmap.for_each_byte(begin, end, |_, byte| {
            count += i64::from(byte.count_ones());
            true
        });
    } else {
        bitmap.for_each_bit(begin, end, |_, bit| {
            count += i64::from(bit);
            true
        });
    }
    Ok(Frame::Integer(count))
}

/// BITPOS key bit [start [end [BYTE|BIT]]] — -1 when bit 1 is not
/// found; 0 for bit 0 on a missing key.
fn bitpos(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    if args.len() > 5 {
        return Err(arity_error("bitpos").into());
    }
    let target = parse_bit(&args[1], CommandError::BitArgument)?;
    let byte_mode = if args.len() == 5 {
        parse_range_unit(&args[4])?
    } else {
        true
    };

    let Some(data) = string_value(view, &args[0])? else {
        return Ok(Frame::Integer(if target { -1 } else { 0 }));
    };
    let bitmap = Bitmap::from_bytes(&data);

    let mut start = 0i64;
    if args.len() >= 3 {
        start = parse_i64(&args[2]).ok_or(CommandError::NotInteger)?;
    }
    let mut end = bitmap.byte_size() - 1;
    if args.len() >= 4 {
        end = parse_i64(&args[3]).ok_or(CommandError::NotInteger)?;
    }
    if byte_mode {
        start *= 8;
        end = (end + 1) * 8 - 1;
    }

    let mut found = -1i64;
    bitmap.for_each_bit(start, end, |offset, bit| {
        if bit == target {
            found = offset;
            return false;
        }
        true
    });
    Ok(Frame::Integer(found))
}

/// Combine two operands byte-wise; the shorter one is zero-extended.
fn op_bytes(lhs: &[u8], rhs: &[u8], op: fn(u8, u8) -> u8) -> Vec<u8> {
    let len = lhs.len().max(rhs.len());
    (0..len)
        .map(|i| {
            op(
                lhs.get(i).copied().unwrap_or(0),
                rhs.get(i).copied().unwrap_or(0),
            )
        })
        .collect()
}

/// BITOP AND|OR|XOR|NOT destkey key [key ...] — NOT admits exactly one
/// source; the result length (longest source) is returned.
fn bitop(view: &mut DbView<'_>, args: &[Bytes]) -> Result<Frame> {
    let op_name = upper(&args[0]);
    let op: Option<fn(u8, u8) -> u8> = match op_name.as_str() {
        "AND" => Some(|a, b| a & b),
        "OR" => Some(|a, b| a | b),
        "XOR" => Some(|a, b| a ^ b),
        "NOT" => None,
        _ => return Err(CommandError::Syntax.into()),
    };
    if op.is_none() && args.len() > 3 {
        return Err(arity_error("bitop").into());
    }

    let dest = args[1].clone();
    let first = string_value(view, &args[2])?.unwrap_or_default();

    let Some(op) = op else {
        if first.is_empty() {
            return Ok(Frame::Integer(0));
        }
        let inverted: Vec<u8> = first.iter().map(|&b| !b).collect();
        let len = inverted.len();
        view.put(dest, Value::str(inverted));
        return Ok(Frame::Integer(len as i64));
    };

    let mut result = first.to_vec();
    for key in &args[3..] {
        let operand = string_value(view, key)?.unwrap_or_default();
        result = op_bytes(&result, &operand, op);
    }
    if result.is_empty() {
        return Ok(Frame::Integer(0));
    }
    let len = result.len();
    view.put(dest, Value::str(result));
    Ok(Frame::Integer(len as i64))
}

fn bitop_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[1].clone()], args[2..].to_vec())
}

pub(super) fn register(table: &mut CommandTable) {
    const W: CommandFlags = CommandFlags::WRITE;
    const R: CommandFlags = CommandFlags::READ;

    table.register(Command::locked("setbit", setbit, write_first_key, 4, W));
    table.register(Command::locked("getbit", getbit, read_first_key, 3, R));
    table.register(Command::locked("bitcount", bitcount, read_first_key, -2, R));
    table.register(Command::locked("bitpos", bitpos, read_first_key, -3, R));
    table.register(Command::locked("bitop", bitop, bitop_keys, -4, W));
}
