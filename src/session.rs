// ABOUTME: SSH client session over an already dialed transport, using russh.
// ABOUTME: Verifies the host key, runs the auth chain, and opens the remote unix socket channel.

use crate::auth::AuthMethod;
use crate::error::{Error, Result};
use crate::transport::{BoxedStream, TransportPath};
use crate::trust::TrustPolicy;
use nonempty::NonEmpty;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{ChannelStream, Disconnect};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UnixStream;

/// Everything needed to bring up a session once the transport exists.
pub struct ClientSessionConfig {
    /// Host name as given in the descriptor; used for host key lookup.
    pub host: String,
    pub port: u16,
    pub user: String,
    pub trust: Arc<TrustPolicy>,
    pub auth: NonEmpty<AuthMethod>,
    /// Bound on key exchange plus authentication.
    pub timeout: Duration,
    pub keepalive_interval: Option<Duration>,
}

impl std::fmt::Debug for ClientSessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("verifying", &self.trust.is_verifying())
            .field("auth", &self.auth.iter().map(AuthMethod::kind).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Lifecycle of a session, logged as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    RawConnected,
    Authenticating,
    Established,
    Failed,
}

/// russh handler that defers host key decisions to the trust policy.
pub(crate) struct TrustHandler {
    host: String,
    port: u16,
    trust: Arc<TrustPolicy>,
}

impl client::Handler for TrustHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.trust.accepts(&self.host, self.port, server_public_key))
    }
}

/// An authenticated SSH session.
pub struct Session {
    handle: Handle<TrustHandler>,
    host: String,
    user: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Run key exchange and authentication over `stream`.
    pub async fn establish(stream: BoxedStream, config: ClientSessionConfig) -> Result<Self> {
        let timeout = config.timeout;
        let host = config.host.clone();
        let port = config.port;

        match tokio::time::timeout(timeout, Self::establish_inner(stream, config)).await {
            Ok(Ok(session)) => {
                log_state(&host, port, SessionState::Established);
                Ok(session)
            }
            Ok(Err(e)) => {
                log_state(&host, port, SessionState::Failed);
                Err(e)
            }
            Err(_) => {
                log_state(&host, port, SessionState::Failed);
                Err(Error::HandshakeTimeout(timeout))
            }
        }
    }

    async fn establish_inner(stream: BoxedStream, config: ClientSessionConfig) -> Result<Self> {
        let ClientSessionConfig {
            host,
            port,
            user,
            trust,
            auth,
            keepalive_interval,
            ..
        } = config;

        let russh_config = Config {
            inactivity_timeout: None,
            keepalive_interval,
            ..Default::default()
        };
        let handler = TrustHandler {
            host: host.clone(),
            port,
            trust,
        };

        let mut handle = client::connect_stream(Arc::new(russh_config), stream, handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => Error::UntrustedHost {
                    host: crate::known_hosts::host_identity(&host, port),
                },
                other => Error::Handshake(other),
            })?;
        log_state(&host, port, SessionState::RawConnected);

        log_state(&host, port, SessionState::Authenticating);
        if !authenticate(&mut handle, &user, auth).await? {
            return Err(Error::AuthenticationRejected { user });
        }

        Ok(Self { handle, host, user })
    }

    /// Open a `direct-streamlocal` channel to `path` on the remote host.
    pub async fn open_unix_socket(&self, path: &str) -> Result<ChannelStream<Msg>> {
        let channel = self
            .handle
            .channel_open_direct_streamlocal(path)
            .await
            .map_err(|e| Error::RemoteSocketUnreachable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!("opened streamlocal channel to {} on {}", path, self.host);
        Ok(channel.into_stream())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Disconnect the session.
    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

fn log_state(host: &str, port: u16, state: SessionState) {
    tracing::debug!("session {}:{} -> {:?}", host, port, state);
}

/// Offer each method in order until the server accepts one.
async fn authenticate(
    handle: &mut Handle<TrustHandler>,
    user: &str,
    methods: NonEmpty<AuthMethod>,
) -> Result<bool> {
    for method in methods {
        let kind = method.kind();
        let accepted = match method {
            AuthMethod::Password(password) => {
                handle.authenticate_password(user, password).await?.success()
            }
            AuthMethod::PrivateKey { path, key } => {
                tracing::debug!("offering key {}", path.display());
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await?
                    .success()
            }
            AuthMethod::Agent(mut agent) => authenticate_with_agent(handle, user, &mut agent).await?,
        };

        if accepted {
            tracing::info!("authenticated as {} using {}", user, kind);
            return Ok(true);
        }
        tracing::debug!("{} authentication rejected for {}", kind, user);
    }
    Ok(false)
}

async fn authenticate_with_agent(
    handle: &mut Handle<TrustHandler>,
    user: &str,
    agent: &mut AgentClient<UnixStream>,
) -> Result<bool> {
    let keys = match agent.request_identities().await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("failed to list agent keys: {}", e);
            return Ok(false);
        }
    };
    if keys.is_empty() {
        tracing::debug!("SSH agent holds no keys");
        return Ok(false);
    }

    let rsa_hash = handle.best_supported_rsa_hash().await?.flatten();
    for key in keys {
        let hash_alg = if key.algorithm().is_rsa() {
            rsa_hash
        } else {
            None
        };
        let comment = key.comment().to_string();
        match handle
            .authenticate_publickey_with(user, key, hash_alg, &mut *agent)
            .await
        {
            Ok(result) if result.success() => return Ok(true),
            Ok(_) => tracing::debug!("agent key {} rejected", comment),
            Err(e) => tracing::warn!("agent signing failed for key {}: {}", comment, e),
        }
    }
    Ok(false)
}

/// A byte stream to the remote unix socket, tunnelled over SSH.
///
/// Owns the session; dropping the stream tears the tunnel down.
pub struct ResolvedStream {
    stream: ChannelStream<Msg>,
    session: Session,
    path: TransportPath,
    remote_socket: String,
}

impl ResolvedStream {
    pub(crate) fn new(
        stream: ChannelStream<Msg>,
        session: Session,
        path: TransportPath,
        remote_socket: String,
    ) -> Self {
        Self {
            stream,
            session,
            path,
            remote_socket,
        }
    }

    /// How the SSH server was reached.
    pub fn path(&self) -> &TransportPath {
        &self.path
    }

    pub fn remote_socket(&self) -> &str {
        &self.remote_socket
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for ResolvedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedStream")
            .field("session", &self.session)
            .field("path", &self.path)
            .field("remote_socket", &self.remote_socket)
            .finish()
    }
}

impl AsyncRead for ResolvedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for ResolvedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
