// ABOUTME: Injectable view of the process environment.
// ABOUTME: Provides variable lookup, OS account lookup, and path template expansion.

use std::collections::HashMap;
use std::path::PathBuf;

/// Read-only access to the environment a resolution runs in.
pub trait Environment: Send + Sync {
    /// Look up an environment variable. Empty values count as unset.
    fn var(&self, key: &str) -> Option<String>;

    /// Name of the OS account running the process.
    fn os_username(&self) -> Option<String>;

    fn home(&self) -> Option<String> {
        self.var("HOME")
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    fn os_username(&self) -> Option<String> {
        match whoami::fallible::username() {
            Ok(name) if !name.is_empty() => Some(name),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("OS account lookup failed: {}", e);
                None
            }
        }
    }
}

/// Fixed in-memory environment.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    vars: HashMap<String, String>,
    username: Option<String>,
}

impl StaticEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_username(mut self, name: impl Into<String>) -> Self {
        self.username = Some(name.into());
        self
    }
}

impl Environment for StaticEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn os_username(&self) -> Option<String> {
        self.username.clone()
    }
}

/// Expand a path template.
///
/// A leading `~` becomes `$HOME`, then `$VAR` and `${VAR}` are substituted.
/// Unset variables expand to the empty string.
pub fn expand_path(template: &str, env: &dyn Environment) -> PathBuf {
    let template = match template.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("$HOME{rest}"),
        _ => template.to_string(),
    };
    PathBuf::from(expand_vars(&template, env))
}

fn expand_vars(input: &str, env: &dyn Environment) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some(&(_, '{')) => {
                let rest = &input[i + 2..];
                match rest.find('}') {
                    Some(end) => {
                        let name = &rest[..end];
                        out.push_str(&env.var(name).unwrap_or_default());
                        // Skip `{`, the name, and `}`
                        for _ in 0..name.chars().count() + 2 {
                            chars.next();
                        }
                    }
                    None => out.push(c),
                }
            }
            Some(&(_, next)) if next == '_' || next.is_ascii_alphanumeric() => {
                let mut name = String::new();
                while let Some(&(_, n)) = chars.peek() {
                    if n == '_' || n.is_ascii_alphanumeric() {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&env.var(&name).unwrap_or_default());
            }
            _ => out.push(c),
        }
    }

    out
}
