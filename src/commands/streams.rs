//! XADD, XRANGE, XREAD, XINFO STREAM.

use super::ExecCtx;
use crate::error::KvError;
use crate::protocol::RespFrame;
use crate::store::stream::{parse_range_token, IdSpec, StreamEntry, StreamId};
use bytes::Bytes;
use indexmap::IndexMap;
use std::future::poll_fn;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::task::Poll;
use std::time::Duration;

pub async fn xadd(ctx: &ExecCtx<'_>, mut args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let key = args.remove(0);
    let id_token = args.remove(0);
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(KvError::SyntaxError);
    }
    let id_spec = IdSpec::from_str(std::str::from_utf8(&id_token)?)?;
    let mut fields = IndexMap::new();
    for pair in args.chunks(2) {
        fields.insert(pair[0].clone(), pair[1].clone());
    }
    let id = ctx.store.xadd(&key, id_spec, fields).await?;
    ctx.waiters.notify(&key, 1);
    Ok(RespFrame::bulk(id.to_string()))
}

pub async fn xrange(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let key = &args[0];
    let start = parse_range_token(std::str::from_utf8(&args[1])?, true)?;
    let end = parse_range_token(std::str::from_utf8(&args[2])?, false)?;
    let entries = ctx.store.xrange(key, start, end).await?;
    Ok(RespFrame::Array(entries.into_iter().map(encode_entry).collect()))
}

pub async fn xinfo(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let sub = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    if sub != "STREAM" {
        return Err(KvError::SyntaxError);
    }
    match ctx.store.xinfo(&args[1]).await? {
        None => Err(KvError::Generic("no such key".into())),
        Some((len, last_id, first, last)) => Ok(RespFrame::Array(vec![
            RespFrame::bulk("length"),
            RespFrame::Integer(len as i64),
            RespFrame::bulk("last-generated-id"),
            RespFrame::bulk(last_id.to_string()),
            RespFrame::bulk("first-entry"),
            first.map(encode_entry).unwrap_or(RespFrame::NullArray),
            RespFrame::bulk("last-entry"),
            last.map(encode_entry).unwrap_or(RespFrame::NullArray),
        ])),
    }
}

fn encode_entry(entry: StreamEntry) -> RespFrame {
    let mut flat = Vec::with_capacity(entry.fields.len() * 2);
    for (f, v) in entry.fields {
        flat.push(RespFrame::bulk(f));
        flat.push(RespFrame::bulk(v));
    }
    RespFrame::Array(vec![RespFrame::bulk(entry.id.to_string()), RespFrame::Array(flat)])
}

fn encode_xread_reply(results: Vec<(Bytes, Vec<StreamEntry>)>) -> RespFrame {
    RespFrame::Array(
        results
            .into_iter()
            .map(|(key, entries)| {
                RespFrame::Array(vec![
                    RespFrame::bulk(key),
                    RespFrame::Array(entries.into_iter().map(encode_entry).collect()),
                ])
            })
            .collect(),
    )
}

/// `XREAD [BLOCK ms] STREAMS key [key ...] id [id ...]`. The `$` cursor
/// resolves once, at the moment the command is received — not on every
/// re-check while blocked.
pub async fn xread(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let mut iter = args.into_iter().peekable();

    let block_ms = if iter
        .peek()
        .is_some_and(|t| t.eq_ignore_ascii_case(b"BLOCK"))
    {
        iter.next();
        let ms_tok = iter.next().ok_or(KvError::SyntaxError)?;
        let ms: i64 = std::str::from_utf8(&ms_tok)?
            .parse()
            .map_err(|_| KvError::SyntaxError)?;
        if ms < 0 {
            return Err(KvError::SyntaxError);
        }
        Some(ms as u64)
    } else {
        None
    };

    let streams_tok = iter.next().ok_or(KvError::SyntaxError)?;
    if !streams_tok.eq_ignore_ascii_case(b"STREAMS") {
        return Err(KvError::SyntaxError);
    }

    let rest: Vec<Bytes> = iter.collect();
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(KvError::UnbalancedXread);
    }
    let n = rest.len() / 2;
    let keys = rest[..n].to_vec();
    let id_tokens = &rest[n..];

    let mut afters = Vec::with_capacity(n);
    for (key, tok) in keys.iter().zip(id_tokens) {
        let after = if tok.as_ref() == b"$" {
            ctx.store.xlast_id(key).await?
        } else {
            StreamId::from_str(std::str::from_utf8(tok)?)?
        };
        afters.push(after);
    }

    loop {
        if let Some(reply) = try_read(ctx, &keys, &afters).await? {
            return Ok(reply);
        }

        let Some(ms) = block_ms else {
            return Ok(RespFrame::NullArray);
        };

        let mut handles: Vec<_> = keys.iter().map(|k| ctx.waiters.register(k.clone())).collect();

        if let Some(reply) = try_read(ctx, &keys, &afters).await? {
            for h in &handles {
                ctx.waiters.unregister(h);
            }
            return Ok(reply);
        }

        let wait_for_any = poll_fn(|cx| {
            for h in handles.iter_mut() {
                if Pin::new(h.receiver_mut()).poll(cx).is_ready() {
                    return Poll::Ready(());
                }
            }
            Poll::Pending
        });

        let timed_out = if ms == 0 {
            wait_for_any.await;
            false
        } else {
            tokio::select! {
                _ = wait_for_any => false,
                _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
            }
        };

        for h in &handles {
            ctx.waiters.unregister(h);
        }

        if timed_out {
            return Ok(RespFrame::NullArray);
        }
    }
}

async fn try_read(
    ctx: &ExecCtx<'_>,
    keys: &[Bytes],
    afters: &[StreamId],
) -> Result<Option<RespFrame>, KvError> {
    let mut results = Vec::new();
    for (key, after) in keys.iter().zip(afters) {
        let entries = ctx.store.xread_one(key, *after).await?;
        if !entries.is_empty() {
            results.push((key.clone(), entries));
        }
    }
    if results.is_empty() {
        Ok(None)
    } else {
        Ok(Some(encode_xread_reply(results)))
    }
}
