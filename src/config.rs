//! Server-wide configuration: role, replication identity, and the launch
//! surface. Built once before the accept loop and threaded through as an
//! explicit `Arc`, never as module-level state.

use rand::RngCore;
use std::net::SocketAddr;

/// Generates a fresh 40-hex-character replication ID for this process. Any
/// value suffices for full-resync correctness at this scope; a random one
/// (rather than a fixed constant) is what a real instance advertises so
/// that two independently started servers never collide.
fn generate_replication_id() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The empty RDB snapshot sent verbatim on every full resync, with no
/// trailing CRLF after its bulk-length header.
pub const EMPTY_RDB: &[u8] = &[
    0x52, 0x45, 0x44, 0x49, 0x53, 0x30, 0x30, 0x31, 0x31, 0xfa, 0x09, 0x72, 0x65, 0x64, 0x69, 0x73,
    0x2d, 0x76, 0x65, 0x72, 0x05, 0x37, 0x2e, 0x32, 0x2e, 0x30, 0xfa, 0x0a, 0x72, 0x65, 0x64, 0x69,
    0x73, 0x2d, 0x62, 0x69, 0x74, 0x73, 0xc0, 0x40, 0xfa, 0x05, 0x63, 0x74, 0x69, 0x6d, 0x65, 0xc2,
    0x6d, 0x08, 0xbc, 0x65, 0xfa, 0x08, 0x75, 0x73, 0x65, 0x64, 0x2d, 0x6d, 0x65, 0x6d, 0xc2, 0xb0,
    0xc4, 0x10, 0x00, 0xfa, 0x08, 0x61, 0x6f, 0x66, 0x2d, 0x62, 0x61, 0x73, 0x65, 0xc0, 0x00, 0xff,
    0xf0, 0x6e, 0x3b, 0xfe, 0xc0, 0xff, 0x5a, 0xa2,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub role: Role,
    pub master_addr: Option<SocketAddr>,
    pub replication_id: String,
}

impl ServerConfig {
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut port: u16 = 6379;
        let mut master_addr = None;

        let mut iter = args.into_iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--port" => {
                    let value = iter.next().ok_or("--port requires a value")?;
                    port = value.parse().map_err(|_| "invalid --port value")?;
                }
                "--replicaof" => {
                    let value = iter.next().ok_or("--replicaof requires a value")?;
                    master_addr = Some(parse_replicaof(&value)?);
                }
                other => return Err(format!("unrecognized argument '{other}'")),
            }
        }

        let role = if master_addr.is_some() {
            Role::Replica
        } else {
            Role::Master
        };

        Ok(ServerConfig {
            port,
            role,
            master_addr,
            replication_id: generate_replication_id(),
        })
    }
}

fn parse_replicaof(value: &str) -> Result<SocketAddr, String> {
    let mut parts = value.split_whitespace();
    let host = parts.next().ok_or("--replicaof missing host")?;
    let port: u16 = parts
        .next()
        .ok_or("--replicaof missing port")?
        .parse()
        .map_err(|_| "invalid --replicaof port")?;
    format!("{host}:{port}")
        .parse()
        .or_else(|_| {
            // Host may be a name rather than an IP literal; resolution is
            // deferred to connect time in that case by the caller, but for
            // the common "127.0.0.1 6380" shape used in practice we expect
            // a parseable SocketAddr here.
            Err(format!("could not parse replicaof endpoint '{value}'"))
        })
}
