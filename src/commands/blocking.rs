//! Blocking list commands: BLPOP, BRPOP, BLMOVE, BLMPOP.
//!
//! These declare no key extractor; the dispatcher acquires no locks
//! for them. After a locked immediate pass over the candidate keys,
//! they poll: each probe takes a single-key write lock through the
//! standard protocol, so blocked clients never starve other commands.
//! A timeout of 0 disables the deadline.

use super::lists::{list_value_mut, move_between, mpop_reply, parse_mpop, pop_many, End};
use super::parse_i64;
use super::registry::{Command, CommandFlags, CommandTable};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::Db;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often a blocked command re-probes its candidate keys.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

type BoxedReply = Pin<Box<dyn Future<Output = Result<Frame>> + Send>>;

/// Parse the trailing timeout operand (whole seconds; 0 = forever)
/// into an optional deadline.
fn parse_timeout(arg: &[u8]) -> Result<Option<Instant>> {
    let seconds = parse_i64(arg).ok_or(CommandError::TimeoutNotInteger)?;
    if seconds < 0 {
        return Err(CommandError::TimeoutNegative.into());
    }
    if seconds == 0 {
        return Ok(None);
    }
    Ok(Some(Instant::now() + Duration::from_secs(seconds as u64)))
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(at) if Instant::now() >= at)
}

/// Probe one key under its write lock; pop one element when the list
/// is non-empty. The `[key, value]` reply on success.
fn try_pop(db: &Arc<Db>, key: &Bytes, end: End) -> Result<Option<Frame>> {
    let mut view = db.view(std::slice::from_ref(key), &[]);
    let Some(list) = list_value_mut(&mut view, key)? else {
        return Ok(None);
    };
    let value = match end {
        End::Left => list.pop_front(),
        End::Right => list.pop_back(),
    };
    let emptied = list.is_empty();
    match value {
        Some(value) => {
            if emptied {
                view.remove(key);
            }
            Ok(Some(Frame::Array(vec![
                Frame::Bulk(key.clone()),
                Frame::Bulk(value),
            ])))
        }
        None => Ok(None),
    }
}

/// Shared BLPOP/BRPOP body.
async fn bpop(db: Arc<Db>, args: Vec<Bytes>, end: End) -> Result<Frame> {
    let deadline = parse_timeout(&args[args.len() - 1])?;
    let keys = &args[..args.len() - 1];

    // Immediate pass: type errors surface here.
    for key in keys {
        if let Some(reply) = try_pop(&db, key, end)? {
            return Ok(reply);
        }
    }

    // Poll round-robin until data appears or the deadline passes.
    // Probes that hit a wrong-typed key are skipped, not fatal.
    loop {
        if deadline_passed(deadline) {
            return Ok(Frame::Null);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        for key in keys {
            if let Ok(Some(reply)) = try_pop(&db, key, end) {
                return Ok(reply);
            }
        }
    }
}

fn blpop(db: Arc<Db>, args: Vec<Bytes>) -> BoxedReply {
    Box::pin(bpop(db, args, End::Left))
}

fn brpop(db: Arc<Db>, args: Vec<Bytes>) -> BoxedReply {
    Box::pin(bpop(db, args, End::Right))
}

/// BLMOVE source destination LEFT|RIGHT LEFT|RIGHT timeout
fn blmove(db: Arc<Db>, args: Vec<Bytes>) -> BoxedReply {
    Box::pin(async move {
        let src = args[0].clone();
        let dst = args[1].clone();
        let (Some(src_end), Some(dst_end)) = (End::parse(&args[2]), End::parse(&args[3]))
        else {
            return Err(CommandError::Syntax.into());
        };
        let seconds = parse_i64(&args[4]).ok_or(CommandError::Syntax)?;
        if seconds < 0 {
            return Err(CommandError::TimeoutNegative.into());
        }
        let deadline =
            (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds as u64));

        // Immediate attempt under the two-key write lock.
        {
            let mut view = db.view(&[src.clone(), dst.clone()], &[]);
            if let Some(value) = move_between(&mut view, &src, &dst, src_end, dst_end)? {
                return Ok(Frame::Bulk(value));
            }
        }

        // Poll the source; once an element appears, land it in the
        // destination under that key's own lock.
        loop {
            if deadline_passed(deadline) {
                return Ok(Frame::Null);
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let popped = {
                let mut view = db.view(std::slice::from_ref(&src), &[]);
                match list_value_mut(&mut view, &src) {
                    Ok(Some(list)) => {
                        let value = match src_end {
                            End::Left => list.pop_front(),
                            End::Right => list.pop_back(),
                        };
                        let emptied = list.is_empty();
                        if let Some(value) = value {
                            if emptied {
                                view.remove(&src);
                            }
                            Some(value)
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            };

            if let Some(value) = popped {
                let mut view = db.view(std::slice::from_ref(&dst), &[]);
                match list_value_mut(&mut view, &dst)? {
                    Some(list) => match dst_end {
                        End::Left => list.push_front(value.clone()),
                        End::Right => list.push_back(value.clone()),
                    },
                    None => {
                        let mut list = crate::types::List::new();
                        match dst_end {
                            End::Left => list.push_front(value.clone()),
                            End::Right => list.push_back(value.clone()),
                        }
                        view.put(dst.clone(), crate::types::Value::List(list));
                    }
                }
                return Ok(Frame::Bulk(value));
            }
        }
    })
}

/// BLMPOP timeout numkeys key [key ...] LEFT|RIGHT [COUNT count]
fn blmpop(db: Arc<Db>, args: Vec<Bytes>) -> BoxedReply {
    Box::pin(async move {
        let deadline = parse_timeout(&args[0])?;
        let Some(parsed) = parse_mpop(&args[1..])? else {
            return Ok(Frame::Null);
        };

        // Immediate pass.
        for key in &parsed.keys {
            let mut view = db.view(std::slice::from_ref(key), &[]);
            if let Some(values) = pop_many(&mut view, key, parsed.end, parsed.count)? {
                return Ok(mpop_reply(key, values));
            }
        }

        loop {
            if deadline_passed(deadline) {
                return Ok(Frame::Null);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            for key in &parsed.keys {
                let mut view = db.view(std::slice::from_ref(key), &[]);
                if let Ok(Some(values)) = pop_many(&mut view, key, parsed.end, parsed.count) {
                    return Ok(mpop_reply(key, values));
                }
            }
        }
    })
}

pub(super) fn register(table: &mut CommandTable) {
    const W: CommandFlags = CommandFlags::WRITE;

    table.register(Command::self_locking("blpop", blpop, -3, W));
    table.register(Command::self_locking("brpop", brpop, -3, W));
    table.register(Command::self_locking("blmove", blmove, 6, W));
    table.register(Command::self_locking("blmpop", blmpop, -5, W));
}
