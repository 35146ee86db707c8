/// Split `user@host` into its parts. Owners without a host yield `None`.
pub fn split_owner(owner: &str) -> (&str, Option<&str>) {
    match owner.split_once('@') {
        Some((user, host)) => (user, Some(host)),
        None => (owner, None),
    }
}

/// Check `owner` (`user@host`) against a user access list.
///
/// An entry `user` matches any host; `user@host` requires the host to match,
/// where a leading `*` is a suffix wildcard (`*.example.com`). A user of `*`
/// matches every user.
pub fn acl_check(entries: &[String], owner: &str) -> bool {
    let (user, host) = split_owner(owner);
    entries.iter().any(|entry| {
        let (entry_user, entry_host) = split_owner(entry);
        if entry_user != "*" && entry_user != user {
            return false;
        }
        match (entry_host, host) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(pattern), Some(host)) => host_matches(pattern, host),
        }
    })
}

fn host_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => host.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()),
        None => pattern.eq_ignore_ascii_case(host),
    }
}
