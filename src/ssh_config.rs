// ABOUTME: Minimal OpenSSH client config reader for per-host directive lookup.
// ABOUTME: Evaluates Host blocks in file order; the first obtained value for a keyword wins.

use crate::host_pattern;

#[derive(Debug, Clone)]
struct Block {
    /// `None` for directives that precede the first `Host` line.
    patterns: Option<Vec<String>>,
    /// Lower-cased keyword and raw value.
    directives: Vec<(String, String)>,
}

impl Block {
    fn applies_to(&self, host: &str) -> bool {
        match &self.patterns {
            None => true,
            Some(patterns) => host_pattern::list_matches(patterns.iter().map(String::as_str), host),
        }
    }
}

/// Parsed ssh config.
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    blocks: Vec<Block>,
    skipped: Vec<String>,
}

impl SshConfig {
    pub fn parse(content: &str) -> Self {
        let mut config = SshConfig::default();
        let mut current = Block {
            patterns: None,
            directives: Vec::new(),
        };
        // Inside a `Match` block nothing applies until the next `Host`.
        let mut in_match = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = split_directive(line) else {
                continue;
            };
            let key = key.to_lowercase();

            match key.as_str() {
                "host" => {
                    config.blocks.push(current);
                    current = Block {
                        patterns: Some(value.split_whitespace().map(unquote).collect()),
                        directives: Vec::new(),
                    };
                    in_match = false;
                }
                "match" => {
                    config.skipped.push(format!("Match {}", value));
                    in_match = true;
                }
                "include" => config.skipped.push(format!("Include {}", value)),
                _ if in_match => {}
                _ => current.directives.push((key, unquote(value))),
            }
        }

        config.blocks.push(current);
        config
    }

    /// First value obtained for `keyword` when connecting to `host`.
    pub fn get(&self, host: &str, keyword: &str) -> Option<&str> {
        let keyword = keyword.to_lowercase();
        self.blocks
            .iter()
            .filter(|b| b.applies_to(host))
            .flat_map(|b| b.directives.iter())
            .find(|(k, _)| *k == keyword)
            .map(|(_, v)| v.as_str())
    }

    /// Directives that were seen but not evaluated (`Match`, `Include`).
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    let key_end = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let key = &line[..key_end];
    let rest = line[key_end..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
    if key.is_empty() || rest.is_empty() {
        return None;
    }
    Some((key, rest))
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}
