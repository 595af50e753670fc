// ABOUTME: Connection descriptor naming the remote host and resolution parameters.
// ABOUTME: Parses URI-like strings such as "qemu+ssh://user@host:2222/system?sshauth=agent".

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Immutable description of what to connect to.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    host: String,
    port: Option<String>,
    user: Option<String>,
    password: Option<String>,
    params: HashMap<String, String>,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params)
            .finish()
    }
}

impl ConnectionDescriptor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a parameter. The first value set for a name is kept.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.entry(name.into()).or_insert_with(|| value.into());
        self
    }

    /// Parse `scheme://[user[:password]@]host[:port][/path][?name=value&...]`.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let rest = match uri.find("://") {
            Some(pos) => &uri[pos + 3..],
            None => uri,
        };

        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(q)),
            None => (rest, None),
        };
        let authority = match rest.find('/') {
            Some(pos) => &rest[..pos],
            None => rest,
        };

        let (userinfo, hostport) = match authority.rfind('@') {
            Some(pos) => (Some(&authority[..pos]), &authority[pos + 1..]),
            None => (None, authority),
        };

        let mut descriptor = Self::default();

        if let Some(userinfo) = userinfo {
            let (user, password) = match userinfo.split_once(':') {
                Some((u, p)) => (u, Some(p)),
                None => (userinfo, None),
            };
            if !user.is_empty() {
                descriptor.user = Some(decode(user)?);
            }
            if let Some(password) = password {
                descriptor.password = Some(decode(password)?);
            }
        }

        let (host, port) = split_host_port(hostport)?;
        if host.is_empty() {
            return Err(Error::DescriptorInvalid(format!(
                "no host in {:?}",
                uri
            )));
        }
        descriptor.host = host.to_string();
        descriptor.port = port.map(str::to_string);

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                let name = decode_query(name)?;
                let value = decode_query(value)?;
                descriptor.params.entry(name).or_insert(value);
            }
        }

        Ok(descriptor)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty())
    }

    pub fn user_password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Effective SSH port; an empty port means the default.
    pub fn ssh_port(&self) -> Result<u16> {
        match self.port.as_deref() {
            None | Some("") => Ok(DEFAULT_SSH_PORT),
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| Error::DescriptorInvalid(format!("invalid port: {}", p))),
        }
    }

    /// Parameter value, if present and non-empty.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether a parameter is present at all, even with an empty value.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }
}

fn split_host_port(hostport: &str) -> Result<(&str, Option<&str>)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::DescriptorInvalid(format!("unterminated IPv6 host: {}", hostport)))?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':');
        return Ok((host, port));
    }

    Ok(match hostport.rsplit_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (hostport, None),
    })
}

fn decode(s: &str) -> Result<String> {
    urlencoding::decode(s)
        .map(|d| d.into_owned())
        .map_err(|e| Error::DescriptorInvalid(format!("bad percent-encoding in {:?}: {}", s, e)))
}

fn decode_query(s: &str) -> Result<String> {
    decode(&s.replace('+', " "))
}
