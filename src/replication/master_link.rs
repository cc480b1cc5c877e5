//! The replica-side connection to a configured master: handshake, RDB
//! ingest, then silent, offset-tracked command streaming.

use crate::commands::{self, ExecCtx};
use crate::protocol::{RespCodec, RespFrame};
use crate::server::ServerState;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, FramedParts};
use tracing::{info, warn};

/// Reads raw lines/exact-byte chunks off a `TcpStream` during the
/// handshake, before any frame boundary can be assumed to align with a
/// full RESP value (the RDB bulk famously doesn't).
struct HandshakeReader<'a> {
    stream: &'a mut TcpStream,
    buf: BytesMut,
}

impl<'a> HandshakeReader<'a> {
    fn new(stream: &'a mut TcpStream) -> Self {
        HandshakeReader {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn fill_more(&mut self) -> std::io::Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "master closed connection during handshake",
            ));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn read_line(&mut self) -> std::io::Result<Bytes> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos).freeze();
                let _ = self.buf.split_to(2);
                return Ok(line);
            }
            self.fill_more().await?;
        }
    }

    async fn read_exact_bytes(&mut self, n: usize) -> std::io::Result<Bytes> {
        while self.buf.len() < n {
            self.fill_more().await?;
        }
        Ok(self.buf.split_to(n).freeze())
    }
}

async fn send_command(stream: &mut TcpStream, parts: &[&str]) -> std::io::Result<()> {
    let frame =
        RespFrame::array_of_bulks(parts.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())));
    let encoded = crate::protocol::encode_to_vec(&frame);
    stream.write_all(&encoded).await
}

/// Connects to `master_addr`, performs the handshake, and then streams
/// commands forever, applying each silently. Logs and returns on any
/// failure rather than crashing the process; there is no reconnect loop.
pub async fn run_master_link(master_addr: SocketAddr, listening_port: u16, state: Arc<ServerState>) {
    if let Err(e) = run(master_addr, listening_port, &state).await {
        warn!("master link to {master_addr} failed: {e}");
    }
}

async fn run(
    master_addr: SocketAddr,
    listening_port: u16,
    state: &Arc<ServerState>,
) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(master_addr).await?;
    info!("connected to master at {master_addr}, starting handshake");

    let leftover = {
        let mut hs = HandshakeReader::new(&mut stream);

        send_command(hs.stream, &["PING"]).await?;
        expect_prefix(&hs.read_line().await?, b"+PONG")?;

        let port_str = listening_port.to_string();
        send_command(hs.stream, &["REPLCONF", "listening-port", &port_str]).await?;
        expect_prefix(&hs.read_line().await?, b"+OK")?;

        send_command(hs.stream, &["REPLCONF", "capa", "psync2"]).await?;
        expect_prefix(&hs.read_line().await?, b"+OK")?;

        send_command(hs.stream, &["PSYNC", "?", "-1"]).await?;
        expect_prefix(&hs.read_line().await?, b"+FULLRESYNC")?;

        let bulk_header = hs.read_line().await?;
        let len: usize = std::str::from_utf8(&bulk_header)
            .ok()
            .and_then(|s| s.strip_prefix('$'))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| protocol_error("malformed RDB bulk header"))?;
        let _rdb = hs.read_exact_bytes(len).await?;
        info!("full resync complete, {len} byte RDB snapshot ingested");

        std::mem::take(&mut hs.buf)
    };

    // Hand off to a Framed codec for the streaming phase, seeding it with
    // whatever bytes were already buffered past the RDB body.
    let mut parts = FramedParts::new(stream, RespCodec);
    parts.read_buf = leftover;
    let mut framed = Framed::from_parts(parts);

    stream_commands(&mut framed, state).await
}

fn expect_prefix(line: &[u8], prefix: &[u8]) -> std::io::Result<()> {
    if line.starts_with(prefix) {
        Ok(())
    } else {
        Err(protocol_error(&format!(
            "expected {:?}, got {:?}",
            String::from_utf8_lossy(prefix),
            String::from_utf8_lossy(line)
        )))
    }
}

fn protocol_error(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

async fn stream_commands(
    framed: &mut Framed<TcpStream, RespCodec>,
    state: &Arc<ServerState>,
) -> std::io::Result<()> {
    loop {
        let Some(result) = framed.next().await else {
            return Err(protocol_error("master link closed"));
        };
        let frame = result.map_err(|e| protocol_error(&e.to_string()))?;
        let encoded_len = crate::protocol::encode_to_vec(&frame).len() as u64;

        let Some(args) = frame.as_command_args() else {
            warn!("master sent a non-array frame; ignoring");
            continue;
        };
        if args.is_empty() {
            continue;
        }
        let name_upper = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let rest = args[1..].to_vec();

        if name_upper == "REPLCONF" && rest.first().is_some_and(|s| s.eq_ignore_ascii_case(b"GETACK"))
        {
            let offset_before = state.replica_offset.load(Ordering::SeqCst);
            let ack = RespFrame::array_of_bulks(["REPLCONF", "ACK", &offset_before.to_string()]);
            let encoded = crate::protocol::encode_to_vec(&ack);
            framed.get_mut().write_all(&encoded).await?;
            state.replica_offset.fetch_add(encoded_len, Ordering::SeqCst);
            continue;
        }

        let mut ctx = ExecCtx {
            store: &state.store,
            waiters: &state.waiters,
            tx_table: &state.tx_table,
            replicas: &state.replicas,
            config: &state.config,
            replica_offset: Some(&state.replica_offset),
            session_id: 0,
        };
        commands::execute_silent(&mut ctx, &name_upper, rest).await;
        state.replica_offset.fetch_add(encoded_len, Ordering::SeqCst);
    }
}
