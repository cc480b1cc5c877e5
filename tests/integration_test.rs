//! End-to-end tests: spin up a real server on an ephemeral-ish port and
//! drive it with raw `TcpStream`s, asserting on parsed RESP frames (and,
//! for replication, on the exact propagated bytes).

use bytes::{Bytes, BytesMut};
use respkv::config::ServerConfig;
use respkv::protocol::{RespFrame, RespCodec, encode_to_vec};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, Framed};

static NEXT_PORT: AtomicU16 = AtomicU16::new(0);

fn next_port() -> u16 {
    19000 + NEXT_PORT.fetch_add(1, Ordering::Relaxed)
}

/// Starts a server on its own port (optionally as a replica of `master`)
/// and waits until its listener is accepting connections.
async fn spawn_server(master: Option<SocketAddr>) -> SocketAddr {
    let port = next_port();
    let mut args = vec!["--port".to_string(), port.to_string()];
    if let Some(master) = master {
        args.push("--replicaof".to_string());
        args.push(format!("{} {}", master.ip(), master.port()));
    }
    let config = ServerConfig::from_args(args).expect("valid launch args");
    tokio::spawn(async move {
        let _ = respkv::server::run(config).await;
    });

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    for _ in 0..200 {
        if TcpStream::connect(addr).await.is_ok() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server on {addr} never came up");
}

/// A RESP-framed client, for sending hand-built command arrays and
/// asserting on parsed reply frames.
struct Client {
    framed: Framed<TcpStream, RespCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Client {
            framed: Framed::new(stream, RespCodec),
        }
    }

    async fn cmd(&mut self, parts: &[&str]) -> RespFrame {
        self.send(parts).await;
        self.reply().await
    }

    async fn send(&mut self, parts: &[&str]) {
        let frame =
            RespFrame::array_of_bulks(parts.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())));
        let encoded = encode_to_vec(&frame);
        self.framed.get_mut().write_all(&encoded).await.unwrap();
    }

    async fn reply(&mut self) -> RespFrame {
        self.framed
            .next()
            .await
            .expect("connection closed before a reply arrived")
            .expect("framing error")
    }

    async fn try_reply(&mut self, timeout: Duration) -> Option<RespFrame> {
        tokio::time::timeout(timeout, self.framed.next())
            .await
            .ok()
            .map(|opt| opt.expect("connection closed").expect("framing error"))
    }
}

fn bulk(s: &str) -> RespFrame {
    RespFrame::bulk(Bytes::copy_from_slice(s.as_bytes()))
}

#[tokio::test]
async fn ping_and_echo() {
    let addr = spawn_server(None).await;
    let mut c = Client::connect(addr).await;
    assert_eq!(c.cmd(&["PING"]).await, RespFrame::SimpleString("PONG".into()));
    assert_eq!(c.cmd(&["ECHO", "hi"]).await, bulk("hi"));
}

#[tokio::test]
async fn set_get_incr_type_and_ttl() {
    let addr = spawn_server(None).await;
    let mut c = Client::connect(addr).await;

    assert_eq!(c.cmd(&["SET", "k", "0"]).await, RespFrame::SimpleString("OK".into()));
    assert_eq!(c.cmd(&["INCR", "k"]).await, RespFrame::Integer(1));
    assert_eq!(c.cmd(&["INCR", "k"]).await, RespFrame::Integer(2));
    assert_eq!(c.cmd(&["GET", "k"]).await, bulk("2"));
    assert_eq!(c.cmd(&["TYPE", "k"]).await, RespFrame::SimpleString("string".into()));

    assert_eq!(c.cmd(&["SET", "bad", "abc"]).await, RespFrame::SimpleString("OK".into()));
    let err = c.cmd(&["INCR", "bad"]).await;
    assert_eq!(err, RespFrame::Error("ERR value is not an integer or out of range".into()));

    c.cmd(&["SET", "ttl", "v", "PX", "80"]).await;
    assert_eq!(c.cmd(&["GET", "ttl"]).await, bulk("v"));
    tokio::time::sleep(Duration::from_millis(160)).await;
    assert_eq!(c.cmd(&["GET", "ttl"]).await, RespFrame::NullBulkString);
    assert_eq!(c.cmd(&["TYPE", "ttl"]).await, RespFrame::SimpleString("none".into()));
}

#[tokio::test]
async fn list_fifo_and_lrange() {
    let addr = spawn_server(None).await;
    let mut c = Client::connect(addr).await;

    assert_eq!(c.cmd(&["RPUSH", "l", "a", "b", "c"]).await, RespFrame::Integer(3));
    assert_eq!(
        c.cmd(&["LRANGE", "l", "0", "10"]).await,
        RespFrame::Array(vec![bulk("a"), bulk("b"), bulk("c")])
    );
    assert_eq!(
        c.cmd(&["LRANGE", "l", "-2", "-1"]).await,
        RespFrame::Array(vec![bulk("b"), bulk("c")])
    );
    assert_eq!(c.cmd(&["LPOP", "l"]).await, bulk("a"));
    assert_eq!(
        c.cmd(&["LPOP", "l", "5"]).await,
        RespFrame::Array(vec![bulk("b"), bulk("c")])
    );
    assert_eq!(c.cmd(&["TYPE", "l"]).await, RespFrame::SimpleString("none".into()));
    assert_eq!(c.cmd(&["LPOP", "l"]).await, RespFrame::NullBulkString);
}

#[tokio::test]
async fn blpop_timeout_fires_within_bounds() {
    let addr = spawn_server(None).await;
    let mut c = Client::connect(addr).await;

    let start = std::time::Instant::now();
    let reply = c.cmd(&["BLPOP", "nope", "0.4"]).await;
    let elapsed = start.elapsed();

    assert_eq!(reply, RespFrame::NullArray);
    assert!(elapsed >= Duration::from_millis(350), "fired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "fired too late: {elapsed:?}");
}

#[tokio::test]
async fn blpop_fairness_wakes_exactly_min_m_n() {
    let addr = spawn_server(None).await;

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let mut c = Client::connect(addr).await;
        c.send(&["BLPOP", "fair", "5"]).await;
        waiters.push(c);
    }
    // Give the BLPOPs time to register as waiters before the push.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut pusher = Client::connect(addr).await;
    assert_eq!(pusher.cmd(&["RPUSH", "fair", "x", "y"]).await, RespFrame::Integer(2));

    let mut woken = 0;
    let mut still_blocked = 0;
    for w in waiters.iter_mut() {
        match w.try_reply(Duration::from_millis(300)).await {
            Some(RespFrame::Array(_)) => woken += 1,
            _ => still_blocked += 1,
        }
    }
    assert_eq!(woken, 2);
    assert_eq!(still_blocked, 1);
}

#[tokio::test]
async fn streams_xadd_xrange_xread() {
    let addr = spawn_server(None).await;
    let mut c = Client::connect(addr).await;

    assert_eq!(c.cmd(&["XADD", "s", "1-0", "f", "v1"]).await, bulk("1-0"));
    assert_eq!(c.cmd(&["XADD", "s", "2-0", "f", "v2"]).await, bulk("2-0"));

    let err = c.cmd(&["XADD", "s", "1-0", "f", "v3"]).await;
    assert_eq!(
        err,
        RespFrame::Error(
            "ERR The ID specified in XADD is equal or smaller than the target stream top item"
                .into()
        )
    );

    let range = c.cmd(&["XRANGE", "s", "-", "+"]).await;
    match range {
        RespFrame::Array(entries) => assert_eq!(entries.len(), 2),
        other => panic!("expected array, got {other:?}"),
    }

    let read = c.cmd(&["XREAD", "STREAMS", "s", "1-0"]).await;
    match read {
        RespFrame::Array(streams) => {
            assert_eq!(streams.len(), 1);
            if let RespFrame::Array(pair) = &streams[0] {
                if let RespFrame::Array(entries) = &pair[1] {
                    assert_eq!(entries.len(), 1);
                } else {
                    panic!("expected entries array");
                }
            } else {
                panic!("expected [key, entries] pair");
            }
        }
        other => panic!("expected array, got {other:?}"),
    }

    assert_eq!(c.cmd(&["XREAD", "STREAMS", "s", "$"]).await, RespFrame::NullArray);
}

#[tokio::test]
async fn multi_exec_and_discard() {
    let addr = spawn_server(None).await;
    let mut c = Client::connect(addr).await;

    assert_eq!(c.cmd(&["MULTI"]).await, RespFrame::SimpleString("OK".into()));
    assert_eq!(c.cmd(&["SET", "k", "100"]).await, RespFrame::SimpleString("QUEUED".into()));
    assert_eq!(c.cmd(&["INCR", "k"]).await, RespFrame::SimpleString("QUEUED".into()));
    assert_eq!(c.cmd(&["GET", "k"]).await, RespFrame::SimpleString("QUEUED".into()));

    let result = c.cmd(&["EXEC"]).await;
    assert_eq!(
        result,
        RespFrame::Array(vec![
            RespFrame::SimpleString("OK".into()),
            RespFrame::Integer(101),
            bulk("101"),
        ])
    );
    assert_eq!(c.cmd(&["GET", "k"]).await, bulk("101"));

    let err = c.cmd(&["EXEC"]).await;
    assert_eq!(err, RespFrame::Error("ERR EXEC without MULTI".into()));

    assert_eq!(c.cmd(&["MULTI"]).await, RespFrame::SimpleString("OK".into()));
    assert_eq!(c.cmd(&["SET", "untouched", "v"]).await, RespFrame::SimpleString("QUEUED".into()));
    assert_eq!(c.cmd(&["DISCARD"]).await, RespFrame::SimpleString("OK".into()));
    assert_eq!(c.cmd(&["GET", "untouched"]).await, RespFrame::NullBulkString);
}

/// A bare-bones replica handshake that never runs the real `MasterLink`
/// silent-apply loop: it just drives the PSYNC protocol far enough to
/// attach to the registry, then decodes propagated frames off the socket.
struct MockReplica {
    stream: TcpStream,
    buf: BytesMut,
}

impl MockReplica {
    async fn connect(master: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(master).await.unwrap();
        let mut buf = BytesMut::new();

        send_inline(&mut stream, &["PING"]).await;
        read_line(&mut stream, &mut buf).await;

        send_inline(&mut stream, &["REPLCONF", "listening-port", "0"]).await;
        read_line(&mut stream, &mut buf).await;

        send_inline(&mut stream, &["REPLCONF", "capa", "psync2"]).await;
        read_line(&mut stream, &mut buf).await;

        send_inline(&mut stream, &["PSYNC", "?", "-1"]).await;
        let fullresync = read_line(&mut stream, &mut buf).await;
        assert!(fullresync.starts_with("+FULLRESYNC"));

        let bulk_header = read_line(&mut stream, &mut buf).await;
        let len: usize = bulk_header.strip_prefix('$').unwrap().parse().unwrap();
        read_exact_buffered(&mut stream, &mut buf, len).await;

        MockReplica { stream, buf }
    }

    /// Reads and decodes the next frame the master propagates, returning
    /// the frame and the exact byte length it was encoded as (which, since
    /// RESP encoding is canonical for the shapes in play, equals the
    /// number of raw bytes the master actually sent for it).
    async fn next_frame(&mut self) -> (RespFrame, usize) {
        loop {
            let mut codec = RespCodec;
            if let Some(frame) = codec.decode(&mut self.buf).unwrap() {
                let len = encode_to_vec(&frame).len();
                return (frame, len);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "master closed connection unexpectedly");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn send_ack(&mut self, offset: u64) {
        send_inline(&mut self.stream, &["REPLCONF", "ACK", &offset.to_string()]).await;
    }
}

async fn send_inline(stream: &mut TcpStream, parts: &[&str]) {
    let frame = RespFrame::array_of_bulks(parts.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())));
    stream.write_all(&encode_to_vec(&frame)).await.unwrap();
}

async fn read_line(stream: &mut TcpStream, buf: &mut BytesMut) -> String {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos);
            let _ = buf.split_to(2);
            return String::from_utf8(line.to_vec()).unwrap();
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0);
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn read_exact_buffered(stream: &mut TcpStream, buf: &mut BytesMut, n: usize) {
    while buf.len() < n {
        let mut chunk = [0u8; 4096];
        let got = stream.read(&mut chunk).await.unwrap();
        assert!(got > 0);
        buf.extend_from_slice(&chunk[..got]);
    }
    let _ = buf.split_to(n);
}

#[tokio::test]
async fn replica_receives_exact_propagated_bytes() {
    let master = spawn_server(None).await;
    let mut replica = MockReplica::connect(master).await;

    let mut client = Client::connect(master).await;
    assert_eq!(client.cmd(&["SET", "foo", "bar"]).await, RespFrame::SimpleString("OK".into()));

    let (frame, len) = replica.next_frame().await;
    assert_eq!(
        frame,
        RespFrame::array_of_bulks([
            Bytes::from_static(b"SET"),
            Bytes::from_static(b"foo"),
            Bytes::from_static(b"bar"),
        ])
    );
    assert_eq!(len, 31);
}

#[tokio::test]
async fn wait_with_zero_replicas_returns_zero() {
    let addr = spawn_server(None).await;
    let mut c = Client::connect(addr).await;
    assert_eq!(c.cmd(&["WAIT", "1", "200"]).await, RespFrame::Integer(0));
}

#[tokio::test]
async fn wait_with_no_writes_yet_returns_replica_count_immediately() {
    let master = spawn_server(None).await;
    let mut replicas = Vec::new();
    for _ in 0..5 {
        replicas.push(MockReplica::connect(master).await);
    }

    let mut c = Client::connect(master).await;
    let start = std::time::Instant::now();
    assert_eq!(c.cmd(&["WAIT", "3", "5000"]).await, RespFrame::Integer(5));
    assert!(start.elapsed() < Duration::from_millis(500), "WAIT should return immediately");
}

#[tokio::test]
async fn wait_rendezvous_with_an_acking_replica() {
    let master = spawn_server(None).await;
    let mut replica = MockReplica::connect(master).await;

    let mut client = Client::connect(master).await;
    client.send(&["SET", "k", "v"]).await;
    assert_eq!(client.reply().await, RespFrame::SimpleString("OK".into()));
    let (_, written_len) = replica.next_frame().await;

    let replica_offset = written_len as u64;

    let wait_client_addr = master;
    let wait_task = tokio::spawn(async move {
        let mut c = Client::connect(wait_client_addr).await;
        c.cmd(&["WAIT", "1", "2000"]).await
    });

    // The master broadcasts REPLCONF GETACK * to drive WAIT; answer it.
    let (getack, _) = replica.next_frame().await;
    assert_eq!(
        getack,
        RespFrame::array_of_bulks([
            Bytes::from_static(b"REPLCONF"),
            Bytes::from_static(b"GETACK"),
            Bytes::from_static(b"*"),
        ])
    );
    replica.send_ack(replica_offset).await;

    let result = wait_task.await.unwrap();
    assert_eq!(result, RespFrame::Integer(1));
}
