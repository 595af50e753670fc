// ABOUTME: Transport path selection and raw connection dialing.
// ABOUTME: Chooses between a direct TCP dial, an existing control master, or a SOCKS proxy.

mod control;
mod proxy;
mod socks;

pub use proxy::{ProxyAddress, ProxyScheme};

use crate::descriptor::ConnectionDescriptor;
use crate::env::{Environment, expand_path};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Environment variables consulted for a proxy, in order.
pub const PROXY_ENV_VARS: [&str; 2] = ["HTTP_PROXY", "ALL_PROXY"];

/// Host and port the SSH session is established with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// How the raw byte stream to the SSH server is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportPath {
    /// TCP straight to the target.
    Direct,
    /// A `direct-tcpip` channel through an already running OpenSSH control master.
    ViaControlChannel { socket: PathBuf },
    /// A SOCKS5 `CONNECT` through a proxy.
    ViaProxy { proxy: ProxyAddress },
}

impl fmt::Display for TransportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportPath::Direct => f.write_str("direct"),
            TransportPath::ViaControlChannel { socket } => {
                write!(f, "control channel {}", socket.display())
            }
            TransportPath::ViaProxy { proxy } => write!(f, "proxy {}", proxy),
        }
    }
}

/// Pick the transport path. The first applicable rule wins:
/// an explicit `SSHControlPath`, then a proxy from the environment, then direct.
pub fn select_path(
    descriptor: &ConnectionDescriptor,
    env: &dyn Environment,
) -> Result<TransportPath> {
    if let Some(template) = descriptor.get("SSHControlPath") {
        let socket = expand_path(template, env);
        let metadata = std::fs::metadata(&socket).map_err(|e| Error::ControlSocketUnavailable {
            path: socket.clone(),
            reason: e.to_string(),
        })?;
        if !metadata.file_type().is_socket() {
            return Err(Error::ControlSocketUnavailable {
                path: socket,
                reason: "not a socket".to_string(),
            });
        }
        return Ok(TransportPath::ViaControlChannel { socket });
    }

    if let Some(raw) = PROXY_ENV_VARS.iter().find_map(|var| env.var(var)) {
        let proxy = ProxyAddress::parse(&raw)?;
        return Ok(TransportPath::ViaProxy { proxy });
    }

    Ok(TransportPath::Direct)
}

/// A raw, bidirectional byte stream to an SSH server.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawStream for T {}

pub type BoxedStream = Box<dyn RawStream>;

/// Produces the raw transport for a chosen path.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        path: &TransportPath,
        target: &Target,
        timeout: Duration,
    ) -> Result<BoxedStream>;
}

/// Dials over the real network.
///
/// The whole path, including proxy or control master negotiation, is
/// bounded by the dial timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkDialer;

#[async_trait]
impl Dialer for NetworkDialer {
    async fn dial(
        &self,
        path: &TransportPath,
        target: &Target,
        timeout: Duration,
    ) -> Result<BoxedStream> {
        tracing::debug!("dialing {} via {}", target, path);
        match tokio::time::timeout(timeout, dial_path(path, target)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("dial via {} gave up after {:?}", path, timeout);
                Err(Error::DialFailed {
                    address: dial_address(path, target),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no connection within {:?}", timeout),
                    ),
                })
            }
        }
    }
}

async fn dial_path(path: &TransportPath, target: &Target) -> Result<BoxedStream> {
    match path {
        TransportPath::Direct => {
            let stream = connect_tcp(&target.host, target.port).await?;
            Ok(Box::new(stream))
        }
        TransportPath::ViaProxy { proxy } => {
            let stream = connect_tcp(&proxy.host, proxy.port).await?;
            let stream = socks::connect(stream, proxy, target).await?;
            Ok(Box::new(stream))
        }
        TransportPath::ViaControlChannel { socket } => {
            let stream = control::open_direct_tcpip(socket, target).await?;
            Ok(Box::new(stream))
        }
    }
}

/// The endpoint actually dialed for `path`.
fn dial_address(path: &TransportPath, target: &Target) -> String {
    match path {
        TransportPath::Direct => target.to_string(),
        TransportPath::ViaProxy { proxy } => Target::new(proxy.host.as_str(), proxy.port).to_string(),
        TransportPath::ViaControlChannel { socket } => socket.display().to_string(),
    }
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|source| Error::DialFailed {
            address: Target::new(host, port).to_string(),
            source,
        })?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}
