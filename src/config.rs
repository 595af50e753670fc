// ABOUTME: Process-level resolver defaults loaded from YAML.
// ABOUTME: Covers timeouts, the default remote socket, and the default auth method order.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_REMOTE_SOCKET: &str = "/var/run/libvirt/libvirt-sock";
pub const DEFAULT_AUTH_METHODS: &str = "agent,privkey";
pub const DEFAULT_KEY_PATH: &str = "${HOME}/.ssh/id_rsa";
pub const DEFAULT_KNOWN_HOSTS_PATH: &str = "${HOME}/.ssh/known_hosts";
pub const DEFAULT_SSH_CONFIG_PATH: &str = "${HOME}/.ssh/config";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// Bound on the transport dial and, separately, on the SSH handshake.
    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// Remote socket used when the descriptor has no `socket` parameter.
    #[serde(default = "default_remote_socket")]
    pub remote_socket: String,

    /// Auth method order used when the descriptor has no `sshauth` parameter.
    #[serde(default = "default_auth_methods")]
    pub auth_methods: String,

    #[serde(default, with = "humantime_serde")]
    pub keepalive_interval: Option<Duration>,
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_remote_socket() -> String {
    DEFAULT_REMOTE_SOCKET.to_string()
}

fn default_auth_methods() -> String {
    DEFAULT_AUTH_METHODS.to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            dial_timeout: default_dial_timeout(),
            remote_socket: default_remote_socket(),
            auth_methods: default_auth_methods(),
            keepalive_interval: None,
        }
    }
}

impl ResolverConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn remote_socket(mut self, path: impl Into<String>) -> Self {
        self.remote_socket = path.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.dial_timeout.is_zero() {
            return Err(Error::Config("dial_timeout must be greater than zero".to_string()));
        }
        if self.remote_socket.trim().is_empty() {
            return Err(Error::Config("remote_socket cannot be empty".to_string()));
        }
        Ok(())
    }
}
