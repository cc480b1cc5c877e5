//! SET, GET, INCR, TYPE.

use super::ExecCtx;
use crate::error::KvError;
use crate::protocol::RespFrame;
use bytes::Bytes;
use std::time::Duration;

pub async fn set(ctx: &ExecCtx<'_>, mut args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let value = args.remove(1);
    let key = args.remove(0);

    let ttl = match args.len() {
        0 => None,
        2 => {
            let opt = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
            if opt != "PX" {
                return Err(KvError::SyntaxError);
            }
            let ms: i64 = std::str::from_utf8(&args[1])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(KvError::NotAnInteger)?;
            if ms <= 0 {
                return Err(KvError::InvalidExpire);
            }
            Some(Duration::from_millis(ms as u64))
        }
        _ => return Err(KvError::SyntaxError),
    };

    ctx.store.set(key, value, ttl).await;
    Ok(RespFrame::SimpleString("OK".into()))
}

pub async fn get(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    match ctx.store.get(&args[0]).await? {
        Some(v) => Ok(RespFrame::bulk(v)),
        None => Ok(RespFrame::NullBulkString),
    }
}

pub async fn incr(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let next = ctx.store.incr(&args[0]).await?;
    Ok(RespFrame::Integer(next))
}

pub async fn type_of(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let name = ctx.store.type_of(&args[0]).await;
    Ok(RespFrame::SimpleString(name.into()))
}
