// ABOUTME: OpenSSH-style host pattern matching.
// ABOUTME: Supports `*` and `?` wildcards and `!` negation in comma or space separated lists.

/// Match a single wildcard pattern against a host, case-insensitively.
pub fn wildcard_match(pattern: &str, host: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let host: Vec<char> = host.to_lowercase().chars().collect();

    let (mut p, mut h) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while h < host.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == host[h]) {
            p += 1;
            h += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, h));
            p += 1;
        } else if let Some((sp, sh)) = star {
            // Let the last `*` swallow one more character
            p = sp + 1;
            h = sh + 1;
            star = Some((sp, sh + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Match a pattern list: true if any positive pattern matches and no negated one does.
pub fn list_matches<'a>(patterns: impl IntoIterator<Item = &'a str>, host: &str) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(negated, host) {
                return false;
            }
        } else if wildcard_match(pattern, host) {
            matched = true;
        }
    }
    matched
}
