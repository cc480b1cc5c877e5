//! PING, ECHO, INFO.

use super::ExecCtx;
use crate::config::Role;
use crate::error::KvError;
use crate::protocol::RespFrame;
use bytes::Bytes;
use std::sync::atomic::Ordering;

pub fn ping(mut args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    match args.pop() {
        None => Ok(RespFrame::SimpleString("PONG".into())),
        Some(msg) => Ok(RespFrame::bulk(msg)),
    }
}

pub fn echo(mut args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    Ok(RespFrame::bulk(args.remove(0)))
}

pub fn info(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let section = args
        .first()
        .map(|b| String::from_utf8_lossy(b).to_ascii_lowercase());
    match section.as_deref() {
        None | Some("default") | Some("replication") | Some("all") => {
            let role = match ctx.config.role {
                Role::Master => "master",
                Role::Replica => "slave",
            };
            let offset = match ctx.replica_offset {
                Some(counter) => counter.load(Ordering::SeqCst),
                None => ctx.replicas.master_offset(),
            };
            let body = format!(
                "# Replication\r\nrole:{role}\r\nmaster_replid:{}\r\nmaster_repl_offset:{offset}\r\n",
                ctx.config.replication_id
            );
            Ok(RespFrame::bulk(Bytes::from(body)))
        }
        Some(_) => Ok(RespFrame::bulk(Bytes::new())),
    }
}
