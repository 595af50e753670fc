// ABOUTME: Diagnostics accumulator for non-fatal fallbacks during resolution.
// ABOUTME: Collects notices that never abort a resolution but should be visible to callers.

use serde::Serialize;
use tracing::Level;

/// Collects non-fatal notices while a resolution plan is built.
#[derive(Debug, Default)]
pub struct Diagnostics {
    notices: Vec<Notice>,
}

impl Diagnostics {
    /// Record a notice, logging it via tracing at its kind's level.
    pub fn record(&mut self, notice: Notice) {
        let level = notice.kind.level();
        if level == Level::ERROR {
            tracing::error!("{}", notice.message);
        } else if level == Level::WARN {
            tracing::warn!("{}", notice.message);
        } else {
            tracing::debug!("{}", notice.message);
        }
        self.notices.push(notice);
    }

    /// Get all collected notices.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn has_notices(&self) -> bool {
        !self.notices.is_empty()
    }

    /// Check whether a notice of the given kind was recorded.
    pub fn contains(&self, kind: NoticeKind) -> bool {
        self.notices.iter().any(|n| n.kind == kind)
    }
}

/// A non-fatal event observed while resolving.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Categories of non-fatal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// `SSH_AUTH_SOCK` is not set.
    AgentNotConfigured,
    /// The agent socket could not be reached.
    AgentUnavailable,
    /// The private key file could not be read.
    KeyUnreadable,
    /// The private key file was read but could not be parsed.
    KeyUnparseable,
    /// Password authentication was requested without a password.
    PasswordMissing,
    /// An authentication method name was not recognised.
    UnknownAuthMethod,
    /// The ssh config file could not be read.
    SshConfigUnreadable,
    /// The ssh config file contains a directive that is not evaluated.
    SshConfigSkipped,
    /// Host keys are accepted without verification.
    InsecureHostKeys,
}

impl NoticeKind {
    pub fn level(self) -> Level {
        match self {
            NoticeKind::AgentNotConfigured
            | NoticeKind::SshConfigUnreadable
            | NoticeKind::SshConfigSkipped => Level::DEBUG,
            NoticeKind::AgentUnavailable
            | NoticeKind::KeyUnreadable
            | NoticeKind::UnknownAuthMethod
            | NoticeKind::InsecureHostKeys => Level::WARN,
            NoticeKind::KeyUnparseable | NoticeKind::PasswordMissing => Level::ERROR,
        }
    }
}
