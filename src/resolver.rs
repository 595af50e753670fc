// ABOUTME: Resolution orchestrator: descriptor in, tunnelled remote socket stream out.
// ABOUTME: Plans offline (auth, trust, user, path), then dials, handshakes and opens the channel.

use crate::auth::{AuthMethod, AuthMethodKind, build_auth_chain};
use crate::config::ResolverConfig;
use crate::descriptor::ConnectionDescriptor;
use crate::diagnostics::{Diagnostics, Notice};
use crate::env::{Environment, ProcessEnv};
use crate::error::Result;
use crate::session::{ClientSessionConfig, ResolvedStream, Session};
use crate::transport::{Dialer, NetworkDialer, Target, TransportPath, select_path};
use crate::trust::TrustPolicy;
use crate::username::resolve_username;
use nonempty::NonEmpty;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything decided before the first network round trip.
#[derive(Debug)]
pub struct ResolutionPlan {
    pub target: Target,
    pub user: String,
    pub auth: NonEmpty<AuthMethod>,
    pub trust: TrustPolicy,
    pub path: TransportPath,
    pub remote_socket: String,
    pub diagnostics: Diagnostics,
}

impl ResolutionPlan {
    pub fn auth_kinds(&self) -> Vec<AuthMethodKind> {
        self.auth.iter().map(AuthMethod::kind).collect()
    }

    /// Serializable view without credentials.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            target: self.target.clone(),
            user: self.user.clone(),
            auth: self.auth_kinds(),
            verify_host_keys: self.trust.is_verifying(),
            known_hosts: match &self.trust {
                TrustPolicy::Verify(store) => Some(store.path().to_path_buf()),
                TrustPolicy::InsecureSkip => None,
            },
            path: self.path.clone(),
            remote_socket: self.remote_socket.clone(),
            notices: self.diagnostics.notices().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub target: Target,
    pub user: String,
    pub auth: Vec<AuthMethodKind>,
    pub verify_host_keys: bool,
    pub known_hosts: Option<PathBuf>,
    pub path: TransportPath,
    pub remote_socket: String,
    pub notices: Vec<Notice>,
}

/// Turns connection descriptors into streams to the remote unix socket.
#[derive(Clone)]
pub struct Resolver {
    config: ResolverConfig,
    env: Arc<dyn Environment>,
    dialer: Arc<dyn Dialer>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl Resolver {
    /// Resolver over the real process environment and network.
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            env: Arc::new(ProcessEnv),
            dialer: Arc::new(NetworkDialer),
        }
    }

    pub fn with_environment(mut self, env: impl Environment + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Build the auth chain, trust policy, user and transport path.
    ///
    /// Nothing here dials the target; the only socket touched is the agent's.
    pub async fn plan(&self, descriptor: &ConnectionDescriptor) -> Result<ResolutionPlan> {
        let env = self.env.as_ref();
        let mut diagnostics = Diagnostics::default();

        let target = Target::new(descriptor.host(), descriptor.ssh_port()?);
        let auth =
            build_auth_chain(descriptor, &self.config.auth_methods, env, &mut diagnostics).await?;
        let trust = TrustPolicy::from_descriptor(descriptor, env, &mut diagnostics)?;
        let user = resolve_username(descriptor, env, &mut diagnostics)?;
        let path = select_path(descriptor, env)?;
        let remote_socket = descriptor
            .get("socket")
            .unwrap_or(self.config.remote_socket.as_str())
            .to_string();

        tracing::debug!(
            "resolution plan for {}: user {}, path {}, remote socket {}",
            target,
            user,
            path,
            remote_socket
        );

        Ok(ResolutionPlan {
            target,
            user,
            auth,
            trust,
            path,
            remote_socket,
            diagnostics,
        })
    }

    /// Plan and execute in one call.
    pub async fn resolve(&self, descriptor: &ConnectionDescriptor) -> Result<ResolvedStream> {
        let plan = self.plan(descriptor).await?;
        self.execute(plan).await
    }

    /// Dial the planned path, establish the session and open the remote socket.
    pub async fn execute(&self, plan: ResolutionPlan) -> Result<ResolvedStream> {
        let ResolutionPlan {
            target,
            user,
            auth,
            trust,
            path,
            remote_socket,
            ..
        } = plan;

        let raw = self
            .dialer
            .dial(&path, &target, self.config.dial_timeout)
            .await?;

        let session = Session::establish(
            raw,
            ClientSessionConfig {
                host: target.host.clone(),
                port: target.port,
                user,
                trust: Arc::new(trust),
                auth,
                timeout: self.config.dial_timeout,
                keepalive_interval: self.config.keepalive_interval,
            },
        )
        .await?;

        let stream = match session.open_unix_socket(&remote_socket).await {
            Ok(stream) => stream,
            Err(e) => {
                session.disconnect().await.ok();
                return Err(e);
            }
        };

        tracing::info!(
            "resolved {} to {} as {} via {}",
            target,
            remote_socket,
            session.user(),
            path
        );
        Ok(ResolvedStream::new(stream, session, path, remote_socket))
    }
}
