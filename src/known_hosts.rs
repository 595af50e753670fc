// ABOUTME: OpenSSH known_hosts database loading and exact-match host key lookup.
// ABOUTME: Handles pattern lists, hashed hostnames, bracketed ports and @revoked markers.

use crate::host_pattern;
use aws_lc_rs::hmac;
use base64::prelude::*;
use russh::keys::PublicKey;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of looking up a presented host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// An entry for this host carries exactly this key.
    Trusted,
    /// No entry matches this host.
    Unknown,
    /// The host is known, but with different keys.
    Mismatch,
    /// The key is explicitly revoked for this host.
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    Revoked,
    CertAuthority,
}

#[derive(Debug, Clone)]
enum HostPatterns {
    List(Vec<String>),
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
}

impl HostPatterns {
    fn matches(&self, identity: &str) -> bool {
        match self {
            HostPatterns::List(patterns) => {
                host_pattern::list_matches(patterns.iter().map(String::as_str), identity)
            }
            HostPatterns::Hashed { salt, hash } => hash_host(identity, salt) == *hash,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    marker: Marker,
    patterns: HostPatterns,
    key: PublicKey,
}

/// Parsed known_hosts database.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl KnownHosts {
    /// Load and parse a known_hosts file. Any malformed entry fails the whole load.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let entries = parse(&content)?;
        debug!(
            path = %path.display(),
            count = entries.len(),
            "loaded known_hosts"
        );
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the key a host presented on the given port.
    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyStatus {
        let identity = host_identity(host, port);
        let mut host_known = false;
        let mut trusted = false;

        for entry in self.entries.iter().filter(|e| e.patterns.matches(&identity)) {
            let same_key = entry.key.key_data() == key.key_data();
            match entry.marker {
                Marker::Revoked if same_key => return HostKeyStatus::Revoked,
                Marker::Revoked | Marker::CertAuthority => {}
                Marker::None => {
                    host_known = true;
                    trusted |= same_key;
                }
            }
        }

        if trusted {
            HostKeyStatus::Trusted
        } else if host_known {
            HostKeyStatus::Mismatch
        } else {
            HostKeyStatus::Unknown
        }
    }
}

/// Identity a host is recorded under: `host` on port 22, `[host]:port` otherwise.
pub fn host_identity(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// HMAC-SHA1 of a host identity, as used by hashed known_hosts entries.
fn hash_host(identity: &str, salt: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, salt);
    hmac::sign(&key, identity.as_bytes()).as_ref().to_vec()
}

fn parse(content: &str) -> Result<Vec<Entry>, String> {
    let mut entries = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = parse_line(line).map_err(|e| format!("line {}: {}", index + 1, e))?;
        entries.push(entry);
    }

    Ok(entries)
}

fn parse_line(line: &str) -> Result<Entry, String> {
    let mut fields = line.split_whitespace();

    let mut first = fields.next().ok_or("empty entry")?;
    let marker = match first {
        "@revoked" => Marker::Revoked,
        "@cert-authority" => Marker::CertAuthority,
        m if m.starts_with('@') => return Err(format!("unknown marker {}", m)),
        _ => Marker::None,
    };
    if marker != Marker::None {
        first = fields.next().ok_or("missing host patterns")?;
    }

    let patterns = parse_patterns(first)?;
    let key_type = fields.next().ok_or("missing key type")?;
    let key_data = fields.next().ok_or("missing key data")?;

    let key = PublicKey::from_openssh(&format!("{} {}", key_type, key_data))
        .map_err(|e| format!("invalid {} key: {}", key_type, e))?;

    Ok(Entry {
        marker,
        patterns,
        key,
    })
}

fn parse_patterns(field: &str) -> Result<HostPatterns, String> {
    if let Some(hashed) = field.strip_prefix("|1|") {
        let (salt, hash) = hashed
            .split_once('|')
            .ok_or("invalid hashed hostname")?;
        let salt = BASE64_STANDARD
            .decode(salt)
            .map_err(|e| format!("invalid hashed hostname salt: {}", e))?;
        let hash = BASE64_STANDARD
            .decode(hash)
            .map_err(|e| format!("invalid hashed hostname hash: {}", e))?;
        return Ok(HostPatterns::Hashed { salt, hash });
    }

    let patterns: Vec<String> = field
        .split(',')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if patterns.is_empty() {
        return Err("empty host pattern list".to_string());
    }
    Ok(HostPatterns::List(patterns))
}
