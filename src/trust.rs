// ABOUTME: Host trust policy built from the descriptor's known_hosts settings.
// ABOUTME: Either verifies presented host keys against known_hosts or accepts every key.

use crate::config::DEFAULT_KNOWN_HOSTS_PATH;
use crate::descriptor::ConnectionDescriptor;
use crate::diagnostics::{Diagnostics, Notice, NoticeKind};
use crate::env::{Environment, expand_path};
use crate::error::{Error, Result};
use crate::known_hosts::{HostKeyStatus, KnownHosts, host_identity};
use russh::keys::PublicKey;
use russh::keys::ssh_key::HashAlg;

/// How presented host keys are judged.
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// Accept only keys recorded for the host in known_hosts.
    Verify(KnownHosts),
    /// Accept every key. Opt-in and insecure.
    InsecureSkip,
}

impl TrustPolicy {
    /// Build the policy from `knownhosts`, `known_hosts_verify` and `no_verify`.
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        env: &dyn Environment,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let ignore = descriptor.get("known_hosts_verify") == Some("ignore");
        if ignore || descriptor.has_param("no_verify") {
            diagnostics.record(Notice::new(
                NoticeKind::InsecureHostKeys,
                format!(
                    "host key verification disabled for {}: any host key will be accepted",
                    descriptor.host()
                ),
            ));
            return Ok(TrustPolicy::InsecureSkip);
        }

        let template = descriptor
            .get("knownhosts")
            .unwrap_or(DEFAULT_KNOWN_HOSTS_PATH);
        let path = expand_path(template, env);
        let store = KnownHosts::load(&path)
            .map_err(|reason| Error::TrustStoreUnreadable { path, reason })?;
        tracing::debug!(
            "verifying host keys against {} ({} entries)",
            store.path().display(),
            store.len()
        );
        Ok(TrustPolicy::Verify(store))
    }

    pub fn is_verifying(&self) -> bool {
        matches!(self, TrustPolicy::Verify(_))
    }

    /// Decide whether a host presenting `key` on `port` is accepted.
    pub fn accepts(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        let store = match self {
            TrustPolicy::InsecureSkip => {
                tracing::warn!(
                    "accepting unverified host key {} for {}",
                    key.fingerprint(HashAlg::Sha256),
                    host_identity(host, port)
                );
                return true;
            }
            TrustPolicy::Verify(store) => store,
        };

        match store.check(host, port, key) {
            HostKeyStatus::Trusted => true,
            status => {
                tracing::error!(
                    "host key {} for {} rejected ({:?} in {})",
                    key.fingerprint(HashAlg::Sha256),
                    host_identity(host, port),
                    status,
                    store.path().display()
                );
                false
            }
        }
    }
}
