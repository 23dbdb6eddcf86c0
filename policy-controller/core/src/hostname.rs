//! Hostname matching between routes and listeners.
//!
//! Listener patterns are either an exact hostname, `*` or a leading-label
//! wildcard such as `*.example.com`. A wildcard never matches the bare parent
//! domain.

/// Returns true if a route hostname is admitted by a listener pattern.
pub fn matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" || pattern.eq_ignore_ascii_case(host) {
        return true;
    }

    let Some(suffix) = pattern.strip_prefix("*.") else {
        return false;
    };

    // A wildcard route host is admitted by an equal or broader wildcard.
    let host = host.strip_prefix("*.").unwrap_or(host);
    is_subdomain_of(host, suffix)
}

fn is_subdomain_of(host: &str, domain: &str) -> bool {
    if host.len() <= domain.len() + 1 {
        return false;
    }
    let at = host.len() - domain.len();
    if !host.is_char_boundary(at) {
        return false;
    }
    let (head, tail) = host.split_at(at);
    tail.eq_ignore_ascii_case(domain) && head.ends_with('.')
}

/// Converts a hostname into a fragment usable in a resource name: `*` becomes
/// `wildcard` and any character outside `[a-z0-9.-]` becomes `-`.
pub fn to_name_fragment(host: &str) -> String {
    let host = host.to_ascii_lowercase().replace('*', "wildcard");
    host.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '-' => c,
            _ => '-',
        })
        .collect()
}
