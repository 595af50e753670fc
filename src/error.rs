// ABOUTME: Error taxonomy for transport resolution.
// ABOUTME: Every variant names the resolution step that produced it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Resolution step an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Config,
    Descriptor,
    Auth,
    Trust,
    Username,
    Transport,
    Handshake,
    Channel,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Config => "config",
            Step::Descriptor => "descriptor",
            Step::Auth => "auth",
            Step::Trust => "trust",
            Step::Username => "username",
            Step::Transport => "transport",
            Step::Handshake => "handshake",
            Step::Channel => "channel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("descriptor: {0}")]
    DescriptorInvalid(String),

    #[error("auth: no usable authentication method (configured: {configured})")]
    NoUsableAuthMethod { configured: String },

    #[error("trust: cannot load known_hosts {path}: {reason}")]
    TrustStoreUnreadable { path: PathBuf, reason: String },

    #[error("username: cannot determine remote user: {0}")]
    UsernameResolutionFailed(String),

    #[error("transport: control socket {path} unavailable: {reason}")]
    ControlSocketUnavailable { path: PathBuf, reason: String },

    #[error("transport: invalid proxy address {address:?}: {reason}")]
    ProxyAddressInvalid { address: String, reason: String },

    #[error("transport: dial {address} failed: {source}")]
    DialFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport: proxy refused connection to {target}: {reason}")]
    ProxyHandshakeFailed { target: String, reason: String },

    #[error("transport: control master refused: {0}")]
    ControlChannelFailed(String),

    #[error("handshake: host key for {host} is not trusted")]
    UntrustedHost { host: String },

    #[error("handshake: all authentication methods rejected for user {user}")]
    AuthenticationRejected { user: String },

    #[error("handshake: timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("handshake: SSH protocol error: {0}")]
    Handshake(#[from] russh::Error),

    #[error("channel: cannot reach remote socket {path}: {reason}")]
    RemoteSocketUnreachable { path: String, reason: String },

    #[error("config: {0}")]
    Config(String),

    #[error("config: YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The resolution step that failed.
    pub fn step(&self) -> Step {
        match self {
            Error::DescriptorInvalid(_) => Step::Descriptor,
            Error::NoUsableAuthMethod { .. } => Step::Auth,
            Error::TrustStoreUnreadable { .. } => Step::Trust,
            Error::UsernameResolutionFailed(_) => Step::Username,
            Error::ControlSocketUnavailable { .. }
            | Error::ProxyAddressInvalid { .. }
            | Error::DialFailed { .. }
            | Error::ProxyHandshakeFailed { .. }
            | Error::ControlChannelFailed(_) => Step::Transport,
            Error::UntrustedHost { .. }
            | Error::AuthenticationRejected { .. }
            | Error::HandshakeTimeout(_)
            | Error::Handshake(_) => Step::Handshake,
            Error::RemoteSocketUnreachable { .. } => Step::Channel,
            Error::Config(_) | Error::Yaml(_) | Error::Io(_) => Step::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
