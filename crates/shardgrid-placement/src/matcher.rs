//! Attribute matching, the innermost predicate of every filter check.
//!
//! Ordinary attribute keys compare by exact, case-sensitive string
//! equality. The IP-like keys (`_ip`, `_host_ip`, `_publish_ip`) also
//! accept wildcard patterns; a `*` matches any run of characters in the
//! textual address. There is no CIDR or numeric interpretation: literal
//! addresses are only validated syntactically when settings are built
//! (see [`crate::filters`]) and compared as strings here.
//!
//! Everything in this module is allocation-free; it runs once per rule
//! per candidate node on the scheduler's hot path.

use std::net::IpAddr;

use shardgrid_state::{ATTR_HOST, ATTR_HOST_IP, ATTR_IP, ATTR_PUBLISH_IP, DiscoveryNode};

/// Attribute keys whose values are addresses.
pub const IP_KEYS: [&str; 3] = [ATTR_IP, ATTR_HOST_IP, ATTR_PUBLISH_IP];

/// Whether `key` names an address attribute.
pub fn is_ip_key(key: &str) -> bool {
    IP_KEYS.contains(&key)
}

/// Whether a filter value is a wildcard pattern.
pub fn is_wildcard(value: &str) -> bool {
    value.contains('*')
}

/// Whether a non-wildcard filter value is a syntactically valid IPv4 or
/// IPv6 literal.
pub fn is_ip_literal(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Match one node attribute value against the values of a single rule.
pub fn matches(key: &str, node_value: &str, candidates: &[String]) -> bool {
    if is_ip_key(key) {
        candidates.iter().any(|candidate| {
            if is_wildcard(candidate) {
                simple_match(candidate, node_value)
            } else {
                candidate == node_value
            }
        })
    } else {
        candidates.iter().any(|candidate| candidate == node_value)
    }
}

/// Match a node against the values of a single rule for `key`.
///
/// `_ip` accepts either the host or the publish address and `_host`
/// either the host name or the host address. A node without the attribute
/// never matches.
pub fn node_matches(node: &DiscoveryNode, key: &str, candidates: &[String]) -> bool {
    match key {
        ATTR_IP => {
            matches(key, &node.host_address, candidates)
                || matches(key, &node.publish_address, candidates)
        }
        ATTR_HOST => {
            matches(key, &node.host_name, candidates) || matches(key, &node.host_address, candidates)
        }
        _ => node
            .attribute(key)
            .is_some_and(|value| matches(key, value, candidates)),
    }
}

/// Glob match where `*` matches any (possibly empty) run of characters.
pub fn simple_match(pattern: &str, value: &str) -> bool {
    let p = pattern.as_bytes();
    let v = value.as_bytes();
    let (mut pi, mut vi) = (0, 0);
    // Position of the last `*` seen and the value index it is anchored at.
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, vi));
            pi += 1;
        } else if pi < p.len() && p[pi] == v[vi] {
            pi += 1;
            vi += 1;
        } else if let Some((star_pi, star_vi)) = star {
            pi = star_pi + 1;
            vi = star_vi + 1;
            star = Some((star_pi, star_vi + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&b| b == b'*')
}
