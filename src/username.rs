// ABOUTME: Effective remote username resolution.
// ABOUTME: URI userinfo first, then the ssh config `User` for the host, then the OS account.

use crate::config::DEFAULT_SSH_CONFIG_PATH;
use crate::descriptor::ConnectionDescriptor;
use crate::diagnostics::{Diagnostics, Notice, NoticeKind};
use crate::env::{Environment, expand_path};
use crate::error::{Error, Result};
use crate::ssh_config::SshConfig;

pub fn resolve_username(
    descriptor: &ConnectionDescriptor,
    env: &dyn Environment,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    if let Some(user) = descriptor.username() {
        tracing::debug!("SSH user from descriptor: {}", user);
        return Ok(user.to_string());
    }

    if let Some(user) = user_from_ssh_config(descriptor, env, diagnostics) {
        tracing::debug!("SSH user from ssh config: {}", user);
        return Ok(user);
    }

    let user = env.os_username().ok_or_else(|| {
        Error::UsernameResolutionFailed(
            "no user in descriptor or ssh config, and the OS account name is unavailable"
                .to_string(),
        )
    })?;
    tracing::debug!("SSH user from OS account: {}", user);
    Ok(user)
}

fn user_from_ssh_config(
    descriptor: &ConnectionDescriptor,
    env: &dyn Environment,
    diagnostics: &mut Diagnostics,
) -> Option<String> {
    let template = descriptor.get("ssh_config").unwrap_or(DEFAULT_SSH_CONFIG_PATH);
    let path = expand_path(template, env);

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            diagnostics.record(Notice::new(
                NoticeKind::SshConfigUnreadable,
                format!("failed to read ssh config {}: {}", path.display(), e),
            ));
            return None;
        }
    };

    let config = SshConfig::parse(&content);
    for skipped in config.skipped() {
        diagnostics.record(Notice::new(
            NoticeKind::SshConfigSkipped,
            format!("{}: not evaluated: {}", path.display(), skipped),
        ));
    }

    config
        .get(descriptor.host(), "User")
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}
