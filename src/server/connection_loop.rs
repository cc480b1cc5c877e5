//! One task per client connection: read a frame, dispatch it, write the
//! reply, repeat. A successful `PSYNC` diverts the socket out of this loop
//! entirely — it is split in two and handed to the replica registry plus a
//! dedicated ack-reader task, per §4.7's "single reader task per replica"
//! requirement.

use crate::commands::{self, ExecCtx, RouteOutcome};
use crate::protocol::{RespCodec, RespFrame, encode_to_vec};
use crate::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, info, warn};

pub async fn handle_connection(socket: TcpStream, addr: SocketAddr, state: Arc<ServerState>) {
    let session_id = state.next_session_id();
    debug!("accepted connection from {addr} (session {session_id})");
    let mut framed = Framed::new(socket, RespCodec);

    loop {
        let frame = match framed.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("connection {session_id} from {addr}: framing error: {e}");
                break;
            }
            None => break,
        };

        let Some(args) = frame.as_command_args() else {
            let err = RespFrame::Error(
                "ERR Protocol error: expected array of bulk strings".to_string(),
            );
            if write_reply(framed.get_mut(), &err).await.is_err() {
                break;
            }
            continue;
        };
        if args.is_empty() {
            continue;
        }

        let name_upper = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let rest = args[1..].to_vec();

        let replica_offset = match state.config.role {
            crate::config::Role::Replica => Some(&state.replica_offset),
            crate::config::Role::Master => None,
        };
        let mut ctx = ExecCtx {
            store: &state.store,
            waiters: &state.waiters,
            tx_table: &state.tx_table,
            replicas: &state.replicas,
            config: &state.config,
            replica_offset,
            session_id,
        };

        match commands::handle_incoming(&mut ctx, &name_upper, rest).await {
            RouteOutcome::Reply(reply) => {
                if write_reply(framed.get_mut(), &reply).await.is_err() {
                    break;
                }
            }
            RouteOutcome::NoReply => {}
            RouteOutcome::BecomeReplica(handshake_bytes) => {
                if framed.get_mut().write_all(&handshake_bytes).await.is_err() {
                    break;
                }
                info!("connection {session_id} from {addr} promoted to replica");
                become_replica(framed, state, session_id, addr);
                return;
            }
        }
    }

    state.tx_table.remove_session(session_id);
    debug!("connection {session_id} from {addr} closed");
}

async fn write_reply(stream: &mut TcpStream, reply: &RespFrame) -> std::io::Result<()> {
    stream.write_all(&encode_to_vec(reply)).await
}

/// Splits the now-replica socket into a write half (owned by the replica
/// registry for propagation) and a read half (owned by a dedicated
/// ack-reader task), per the registry/reader split in §4.8's design notes.
fn become_replica(
    framed: Framed<TcpStream, RespCodec>,
    state: Arc<ServerState>,
    session_id: u64,
    addr: SocketAddr,
) {
    let FramedParts { io, read_buf, .. } = framed.into_parts();
    let (read_half, write_half) = io.into_split();

    state.replicas.add(session_id, write_half);
    state.tx_table.remove_session(session_id);

    tokio::spawn(run_ack_reader(read_half, read_buf, state, session_id, addr));
}

/// Drains `REPLCONF ACK <offset>` frames from the replica's socket for the
/// lifetime of the connection. Any other frame arriving on this side is
/// ignored, per §4.8: propagation and acks are independent directions on
/// the same socket, never conflated.
async fn run_ack_reader(
    read_half: OwnedReadHalf,
    leftover: bytes::BytesMut,
    state: Arc<ServerState>,
    session_id: u64,
    addr: SocketAddr,
) {
    let mut parts = FramedParts::new(read_half, RespCodec);
    parts.read_buf = leftover;
    let mut framed = Framed::from_parts(parts);

    loop {
        match framed.next().await {
            Some(Ok(frame)) => {
                if let Some(args) = frame.as_command_args() {
                    if args.len() >= 3
                        && args[0].eq_ignore_ascii_case(b"REPLCONF")
                        && args[1].eq_ignore_ascii_case(b"ACK")
                    {
                        if let Ok(text) = std::str::from_utf8(&args[2]) {
                            if let Ok(offset) = text.parse::<u64>() {
                                state.replicas.update_ack(session_id, offset);
                            }
                        }
                    }
                }
            }
            Some(Err(e)) => {
                warn!("replica {addr} (session {session_id}): ack stream error: {e}");
                break;
            }
            None => break,
        }
    }

    state.replicas.remove(session_id);
    info!("replica {addr} (session {session_id}) disconnected");
}
