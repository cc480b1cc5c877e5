//! Command parsing and the name→handler dispatch table.

mod conn;
mod list;
mod repl;
mod streams;
mod string;
mod tx;

use crate::config::ServerConfig;
use crate::error::KvError;
use crate::protocol::RespFrame;
use crate::replication::ReplicaRegistry;
use crate::store::Store;
use crate::transaction::{QueuedCommand, TxTable};
use bytes::Bytes;
use std::sync::atomic::AtomicU64;

/// Everything a command handler needs, threaded in explicitly rather than
/// reached for through module-level statics.
pub struct ExecCtx<'a> {
    pub store: &'a Store,
    pub waiters: &'a crate::blocking::WaiterRegistry,
    pub tx_table: &'a TxTable,
    pub replicas: &'a ReplicaRegistry,
    pub config: &'a ServerConfig,
    /// Tracks the replica's own consumed-byte offset; `None` on a master.
    pub replica_offset: Option<&'a AtomicU64>,
    pub session_id: u64,
}

impl<'a> ExecCtx<'a> {
    pub fn is_master(&self) -> bool {
        self.config.role == crate::config::Role::Master
    }
}

bitflags::bitflags! {
    /// Properties of a command relevant to dispatch, independent of any
    /// particular invocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct CommandFlags: u8 {
        /// Runs even inside a MULTI block instead of being queued.
        const BYPASSES_QUEUE = 1 << 0;
        /// Propagated verbatim to attached replicas after a successful
        /// master-side execution.
        const IS_WRITE       = 1 << 1;
    }
}

/// Static properties of a command: arity bounds (excluding the command
/// name itself) plus its dispatch flags.
struct CommandMeta {
    min_args: usize,
    max_args: Option<usize>,
    flags: CommandFlags,
}

fn meta_for(name_upper: &str) -> Option<CommandMeta> {
    use CommandFlags as F;
    let m = |min, max, flags| {
        Some(CommandMeta {
            min_args: min,
            max_args: max,
            flags,
        })
    };
    match name_upper {
        "PING" => m(0, Some(1), F::empty()),
        "ECHO" => m(1, Some(1), F::empty()),
        "SET" => m(2, Some(4), F::IS_WRITE),
        "GET" => m(1, Some(1), F::empty()),
        "INCR" => m(1, Some(1), F::IS_WRITE),
        "TYPE" => m(1, Some(1), F::empty()),
        "RPUSH" => m(2, None, F::IS_WRITE),
        "LPUSH" => m(2, None, F::IS_WRITE),
        "LPOP" => m(1, Some(2), F::IS_WRITE),
        "LRANGE" => m(3, Some(3), F::empty()),
        "LLEN" => m(1, Some(1), F::empty()),
        "BLPOP" => m(2, None, F::empty()),
        "XADD" => m(4, None, F::IS_WRITE),
        "XRANGE" => m(3, Some(3), F::empty()),
        "XREAD" => m(3, None, F::empty()),
        "XINFO" => m(2, Some(2), F::empty()),
        "MULTI" => m(0, Some(0), F::BYPASSES_QUEUE),
        "EXEC" => m(0, Some(0), F::BYPASSES_QUEUE),
        "DISCARD" => m(0, Some(0), F::BYPASSES_QUEUE),
        "INFO" => m(0, Some(1), F::empty()),
        "REPLCONF" => m(1, None, F::BYPASSES_QUEUE),
        "PSYNC" => m(2, Some(2), F::BYPASSES_QUEUE),
        "WAIT" => m(2, Some(2), F::BYPASSES_QUEUE),
        _ => None,
    }
}

/// The outcome of routing one client request, used by the connection loop
/// to decide what to send and whether to hand the socket off.
pub enum RouteOutcome {
    Reply(RespFrame),
    /// PSYNC succeeded: the connection loop must write these raw bytes
    /// (the FULLRESYNC line plus RDB body) then hand the socket off to be
    /// registered as a replica.
    BecomeReplica(Vec<u8>),
    /// No reply should be written (REPLCONF ACK on the master side).
    NoReply,
}

/// Entry point used by the connection loop for a single incoming client
/// frame: resolves the handler, applies the transaction-queue gate, and —
/// for a master — propagates writes to attached replicas.
pub async fn handle_incoming(
    ctx: &mut ExecCtx<'_>,
    name_upper: &str,
    args: Vec<Bytes>,
) -> RouteOutcome {
    let Some(meta) = meta_for(name_upper) else {
        return RouteOutcome::Reply(RespFrame::Error(
            KvError::UnknownCommand(name_upper.to_ascii_lowercase()).to_string(),
        ));
    };
    if args.len() < meta.min_args || meta.max_args.is_some_and(|max| args.len() > max) {
        return RouteOutcome::Reply(RespFrame::Error(
            KvError::WrongArity(name_upper.to_ascii_lowercase()).to_string(),
        ));
    }

    if ctx.tx_table.is_in_transaction(ctx.session_id) && !meta.flags.contains(CommandFlags::BYPASSES_QUEUE) {
        ctx.tx_table.enqueue(
            ctx.session_id,
            QueuedCommand {
                name: name_upper.to_string(),
                args,
            },
        );
        return RouteOutcome::Reply(RespFrame::SimpleString("QUEUED".into()));
    }

    dispatch_and_propagate(ctx, &meta, name_upper, args).await
}

/// Runs one command's handler and, on a master, propagates it to replicas
/// if it's a write that completed without error. Used both for the normal
/// per-request path and for each command replayed by EXEC.
async fn dispatch_and_propagate(
    ctx: &mut ExecCtx<'_>,
    meta: &CommandMeta,
    name_upper: &str,
    args: Vec<Bytes>,
) -> RouteOutcome {
    let result = execute(ctx, name_upper, args.clone()).await;

    if ctx.is_master() && meta.flags.contains(CommandFlags::IS_WRITE) && result.is_ok() {
        ctx.replicas.propagate(name_upper, &args).await;
    }

    match result {
        Ok(outcome) => outcome,
        Err(e) => RouteOutcome::Reply(RespFrame::Error(e.to_string())),
    }
}

/// Used by EXEC to run a queued command through the same propagation
/// logic, producing a single reply frame (errors become error entries
/// rather than aborting the rest of the transaction).
pub(crate) async fn run_queued(ctx: &mut ExecCtx<'_>, cmd: QueuedCommand) -> RespFrame {
    let name_upper = cmd.name.to_ascii_uppercase();
    let Some(meta) = meta_for(&name_upper) else {
        return RespFrame::Error(KvError::UnknownCommand(cmd.name.to_ascii_lowercase()).to_string());
    };
    match dispatch_and_propagate(ctx, &meta, &name_upper, cmd.args).await {
        RouteOutcome::Reply(frame) => frame,
        RouteOutcome::NoReply | RouteOutcome::BecomeReplica(_) => RespFrame::NullBulkString,
    }
}

/// The silent-dispatch path used by the replica-side master link: runs the
/// handler, suppresses any reply, and never propagates (a replica doesn't
/// have replicas of its own in this design).
pub async fn execute_silent(ctx: &mut ExecCtx<'_>, name_upper: &str, args: Vec<Bytes>) {
    if let Err(e) = execute(ctx, name_upper, args).await {
        tracing::warn!("replica-side apply of {name_upper} failed: {e}");
    }
}

async fn execute(
    ctx: &mut ExecCtx<'_>,
    name_upper: &str,
    args: Vec<Bytes>,
) -> Result<RouteOutcome, KvError> {
    let reply = match name_upper {
        "PING" => conn::ping(args)?,
        "ECHO" => conn::echo(args)?,
        "INFO" => conn::info(ctx, args)?,
        "SET" => string::set(ctx, args).await?,
        "GET" => string::get(ctx, args).await?,
        "INCR" => string::incr(ctx, args).await?,
        "TYPE" => string::type_of(ctx, args).await?,
        "RPUSH" => list::rpush(ctx, args).await?,
        "LPUSH" => list::lpush(ctx, args).await?,
        "LPOP" => list::lpop(ctx, args).await?,
        "LRANGE" => list::lrange(ctx, args).await?,
        "LLEN" => list::llen(ctx, args).await?,
        "BLPOP" => return list::blpop(ctx, args).await.map(RouteOutcome::Reply),
        "XADD" => streams::xadd(ctx, args).await?,
        "XRANGE" => streams::xrange(ctx, args).await?,
        "XREAD" => return streams::xread(ctx, args).await.map(RouteOutcome::Reply),
        "XINFO" => streams::xinfo(ctx, args).await?,
        "MULTI" => tx::multi(ctx),
        "EXEC" => return tx::exec(ctx).await.map(RouteOutcome::Reply),
        "DISCARD" => tx::discard(ctx)?,
        "REPLCONF" => return repl::replconf(ctx, args),
        "PSYNC" => return repl::psync(ctx, args),
        "WAIT" => repl::wait(ctx, args).await?,
        other => return Err(KvError::UnknownCommand(other.to_ascii_lowercase())),
    };
    Ok(RouteOutcome::Reply(reply))
}
