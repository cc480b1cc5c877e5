//! MULTI, EXEC, DISCARD.

use super::ExecCtx;
use crate::error::KvError;
use crate::protocol::RespFrame;

pub fn multi(ctx: &ExecCtx<'_>) -> RespFrame {
    ctx.tx_table.begin(ctx.session_id);
    RespFrame::SimpleString("OK".into())
}

pub fn discard(ctx: &ExecCtx<'_>) -> Result<RespFrame, KvError> {
    if ctx.tx_table.discard(ctx.session_id) {
        Ok(RespFrame::SimpleString("OK".into()))
    } else {
        Err(KvError::DiscardWithoutMulti)
    }
}

/// Replays the queued commands in order through the same dispatch and
/// propagation path as ordinary requests. A queued command that errors
/// becomes an error entry in the result array; the rest still run.
pub async fn exec(ctx: &mut ExecCtx<'_>) -> Result<RespFrame, KvError> {
    let Some(queued) = ctx.tx_table.take_for_exec(ctx.session_id) else {
        return Err(KvError::ExecWithoutMulti);
    };
    let mut results = Vec::with_capacity(queued.len());
    for cmd in queued {
        results.push(super::run_queued(ctx, cmd).await);
    }
    Ok(RespFrame::Array(results))
}
