//! RPUSH, LPUSH, LPOP, LRANGE, LLEN, BLPOP.

use super::ExecCtx;
use crate::error::KvError;
use crate::protocol::RespFrame;
use bytes::Bytes;
use std::future::poll_fn;
use std::future::Future;
use std::pin::Pin;
use std::task::Poll;
use std::time::{Duration, Instant};

pub async fn rpush(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let key = args[0].clone();
    let n = args.len() - 1;
    let len = ctx.store.rpush(&key, args[1..].to_vec()).await?;
    ctx.waiters.notify(&key, n);
    Ok(RespFrame::Integer(len as i64))
}

pub async fn lpush(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let key = args[0].clone();
    let n = args.len() - 1;
    let len = ctx.store.lpush(&key, args[1..].to_vec()).await?;
    ctx.waiters.notify(&key, n);
    Ok(RespFrame::Integer(len as i64))
}

pub async fn lpop(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let key = &args[0];
    if args.len() == 1 {
        return match ctx.store.lpop(key, 1).await? {
            Some(mut v) if !v.is_empty() => Ok(RespFrame::bulk(v.remove(0))),
            _ => Ok(RespFrame::NullBulkString),
        };
    }
    let count: i64 = std::str::from_utf8(&args[1])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(KvError::NotAnInteger)?;
    if count < 0 {
        return Err(KvError::Generic(
            "value is out of range, must be positive".into(),
        ));
    }
    match ctx.store.lpop(key, count as usize).await? {
        Some(v) => Ok(RespFrame::array_of_bulks(v)),
        None => Ok(RespFrame::NullArray),
    }
}

pub async fn lrange(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let start: i64 = parse_i64(&args[1])?;
    let stop: i64 = parse_i64(&args[2])?;
    let values = ctx.store.lrange(&args[0], start, stop).await?;
    Ok(RespFrame::array_of_bulks(values))
}

pub async fn llen(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let len = ctx.store.llen(&args[0]).await?;
    Ok(RespFrame::Integer(len as i64))
}

fn parse_i64(raw: &Bytes) -> Result<i64, KvError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(KvError::NotAnInteger)
}

/// Blocks until an element is available on any of `keys`, or `timeout_secs`
/// (0 meaning forever) elapses.
pub async fn blpop(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let timeout_secs: f64 = std::str::from_utf8(args.last().unwrap())
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(KvError::NotAnInteger)?;
    if timeout_secs < 0.0 {
        return Err(KvError::NegativeTimeout);
    }
    let keys: Vec<Bytes> = args[..args.len() - 1].to_vec();
    let deadline = if timeout_secs == 0.0 {
        None
    } else {
        Some(Instant::now() + Duration::from_secs_f64(timeout_secs))
    };

    loop {
        if let Some(found) = try_pop_first(ctx, &keys).await? {
            return Ok(RespFrame::array_of_bulks(found));
        }

        // Register before re-checking so a push landing between the first
        // check above and this point can't be missed.
        let mut handles: Vec<_> = keys.iter().map(|k| ctx.waiters.register(k.clone())).collect();

        if let Some(found) = try_pop_first(ctx, &keys).await? {
            for h in &handles {
                ctx.waiters.unregister(h);
            }
            return Ok(RespFrame::array_of_bulks(found));
        }

        let wait_for_any = poll_fn(|cx| {
            for h in handles.iter_mut() {
                if Pin::new(h.receiver_mut()).poll(cx).is_ready() {
                    return Poll::Ready(());
                }
            }
            Poll::Pending
        });

        let timed_out = match deadline {
            None => {
                wait_for_any.await;
                false
            }
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                tokio::select! {
                    _ = wait_for_any => false,
                    _ = tokio::time::sleep(remaining) => true,
                }
            }
        };

        for h in &handles {
            ctx.waiters.unregister(h);
        }

        if timed_out {
            return Ok(RespFrame::NullArray);
        }
        // Otherwise a waiter fired; loop back to re-check — the race may
        // have already been lost to another waiter, which is fine.
    }
}

async fn try_pop_first(ctx: &ExecCtx<'_>, keys: &[Bytes]) -> Result<Option<[Bytes; 2]>, KvError> {
    for key in keys {
        if let Some(mut popped) = ctx.store.lpop(key, 1).await? {
            if let Some(v) = popped.pop() {
                return Ok(Some([key.clone(), v]));
            }
        }
    }
    Ok(None)
}
