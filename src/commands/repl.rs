//! REPLCONF, PSYNC, WAIT.

use super::{ExecCtx, RouteOutcome};
use crate::config::EMPTY_RDB;
use crate::error::KvError;
use crate::protocol::{encode_full_resync_to_vec, FullResyncReply, RespFrame};
use bytes::Bytes;
use std::time::Duration;

/// `listening-port`/`capa` (handshake bookkeeping from a would-be replica)
/// reply `+OK`. `ACK` is consumed upstream by the replica registry's
/// dedicated ack-reader and never reaches ordinary dispatch in practice,
/// but is accepted silently here too in case it does.
pub fn replconf(_ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RouteOutcome, KvError> {
    let sub = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match sub.as_str() {
        "LISTENING-PORT" | "CAPA" | "GETACK" => {
            Ok(RouteOutcome::Reply(RespFrame::SimpleString("OK".into())))
        }
        "ACK" => Ok(RouteOutcome::NoReply),
        _ => Err(KvError::SyntaxError),
    }
}

/// `PSYNC ? -1`: always a full resync at this scope (no backlog, so
/// partial resync is never offered). Builds the FULLRESYNC + RDB bytes for
/// the connection loop to write before handing the socket off.
pub fn psync(ctx: &ExecCtx<'_>, _args: Vec<Bytes>) -> Result<RouteOutcome, KvError> {
    let reply = FullResyncReply {
        replication_id: ctx.config.replication_id.clone(),
        offset: ctx.replicas.master_offset(),
        rdb: Bytes::from_static(EMPTY_RDB),
    };
    Ok(RouteOutcome::BecomeReplica(encode_full_resync_to_vec(&reply)))
}

pub async fn wait(ctx: &ExecCtx<'_>, args: Vec<Bytes>) -> Result<RespFrame, KvError> {
    let numreplicas: usize = std::str::from_utf8(&args[0])?
        .parse()
        .map_err(|_| KvError::NotAnInteger)?;
    let timeout_ms: u64 = std::str::from_utf8(&args[1])?
        .parse()
        .map_err(|_| KvError::NotAnInteger)?;
    let count = ctx
        .replicas
        .wait_for_replication(numreplicas, Duration::from_millis(timeout_ms))
        .await;
    Ok(RespFrame::Integer(count as i64))
}
