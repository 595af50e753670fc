// ABOUTME: Builds the ordered authentication method chain for one resolution.
// ABOUTME: Methods whose prerequisites are missing are skipped with a diagnostic.

use crate::config::DEFAULT_KEY_PATH;
use crate::descriptor::ConnectionDescriptor;
use crate::diagnostics::{Diagnostics, Notice, NoticeKind};
use crate::env::{Environment, expand_path};
use crate::error::{Error, Result};
use nonempty::NonEmpty;
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKey, decode_secret_key};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;

/// Which kind of credential an auth method produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthMethodKind {
    #[serde(rename = "agent")]
    Agent,
    #[serde(rename = "privkey")]
    PrivateKey,
    #[serde(rename = "ssh-password")]
    Password,
}

impl AuthMethodKind {
    /// Parse a configured method name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "agent" => Some(AuthMethodKind::Agent),
            "privkey" => Some(AuthMethodKind::PrivateKey),
            "ssh-password" | "password" => Some(AuthMethodKind::Password),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethodKind::Agent => "agent",
            AuthMethodKind::PrivateKey => "privkey",
            AuthMethodKind::Password => "ssh-password",
        };
        f.write_str(name)
    }
}

/// A credential source ready to be offered during the handshake.
pub enum AuthMethod {
    /// Keys held by an SSH agent; signing happens in the agent.
    Agent(AgentClient<UnixStream>),
    /// A decoded private key.
    PrivateKey { path: PathBuf, key: Arc<PrivateKey> },
    /// A literal password.
    Password(String),
}

impl AuthMethod {
    pub fn kind(&self) -> AuthMethodKind {
        match self {
            AuthMethod::Agent(_) => AuthMethodKind::Agent,
            AuthMethod::PrivateKey { .. } => AuthMethodKind::PrivateKey,
            AuthMethod::Password(_) => AuthMethodKind::Password,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Agent(_) => f.write_str("Agent(<agent>)"),
            AuthMethod::PrivateKey { path, .. } => {
                f.debug_struct("PrivateKey").field("path", path).finish()
            }
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Materialise the methods named in `sshauth` (or `default_methods`), in order.
///
/// Fails with [`Error::NoUsableAuthMethod`] when nothing usable remains.
pub async fn build_auth_chain(
    descriptor: &ConnectionDescriptor,
    default_methods: &str,
    env: &dyn Environment,
    diagnostics: &mut Diagnostics,
) -> Result<NonEmpty<AuthMethod>> {
    let configured = descriptor.get("sshauth").unwrap_or(default_methods);
    let mut methods = Vec::new();

    for name in configured.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let method = match AuthMethodKind::from_name(name) {
            Some(AuthMethodKind::Agent) => agent_method(env, diagnostics).await,
            Some(AuthMethodKind::PrivateKey) => private_key_method(descriptor, env, diagnostics),
            Some(AuthMethodKind::Password) => password_method(descriptor, diagnostics),
            None => {
                diagnostics.record(Notice::new(
                    NoticeKind::UnknownAuthMethod,
                    format!("unsupported auth method: {}", name),
                ));
                None
            }
        };
        methods.extend(method);
    }

    tracing::debug!(
        "auth chain: {:?}",
        methods.iter().map(AuthMethod::kind).collect::<Vec<_>>()
    );

    NonEmpty::from_vec(methods).ok_or_else(|| Error::NoUsableAuthMethod {
        configured: configured.to_string(),
    })
}

async fn agent_method(env: &dyn Environment, diagnostics: &mut Diagnostics) -> Option<AuthMethod> {
    let Some(socket) = env.var("SSH_AUTH_SOCK") else {
        diagnostics.record(Notice::new(
            NoticeKind::AgentNotConfigured,
            "SSH_AUTH_SOCK is not set, skipping agent authentication",
        ));
        return None;
    };

    match AgentClient::connect_uds(&socket).await {
        Ok(agent) => Some(AuthMethod::Agent(agent)),
        Err(e) => {
            diagnostics.record(Notice::new(
                NoticeKind::AgentUnavailable,
                format!("unable to connect to SSH agent at {}: {}", socket, e),
            ));
            None
        }
    }
}

fn private_key_method(
    descriptor: &ConnectionDescriptor,
    env: &dyn Environment,
    diagnostics: &mut Diagnostics,
) -> Option<AuthMethod> {
    let template = descriptor.get("keyfile").unwrap_or(DEFAULT_KEY_PATH);
    let path = expand_path(template, env);

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            diagnostics.record(Notice::new(
                NoticeKind::KeyUnreadable,
                format!("failed to read ssh key {}: {}", path.display(), e),
            ));
            return None;
        }
    };

    let parsed = String::from_utf8(bytes)
        .map_err(|e| e.to_string())
        .and_then(|text| decode_secret_key(&text, None).map_err(|e| e.to_string()));
    match parsed {
        Ok(key) => Some(AuthMethod::PrivateKey {
            path,
            key: Arc::new(key),
        }),
        Err(e) => {
            diagnostics.record(Notice::new(
                NoticeKind::KeyUnparseable,
                format!("failed to parse ssh key {}: {}", path.display(), e),
            ));
            None
        }
    }
}

fn password_method(
    descriptor: &ConnectionDescriptor,
    diagnostics: &mut Diagnostics,
) -> Option<AuthMethod> {
    match descriptor.user_password() {
        Some(password) => Some(AuthMethod::Password(password.to_string())),
        None => {
            diagnostics.record(Notice::new(
                NoticeKind::PasswordMissing,
                "missing password in userinfo of URI authority section",
            ));
            None
        }
    }
}
