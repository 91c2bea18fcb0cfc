/// Lowercases `raw` and collapses every run of characters outside `[a-z0-9]`
/// into a single `-`.
pub fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_gap = false;
    for ch in raw.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            in_gap = false;
        } else if !in_gap {
            out.push('-');
            in_gap = true;
        }
    }
    out
}

/// Slug for a username. E-mail style names lose their `+tag` sub-address
/// first so `user+tag@example.com` and `user@example.com` share a slug.
pub fn username_slug(raw: &str) -> String {
    slug(&strip_subaddress(raw))
}

fn strip_subaddress(raw: &str) -> String {
    let Some((local, domain)) = raw.rsplit_once('@') else {
        return raw.to_string();
    };
    if local.contains('@') || domain.is_empty() {
        return raw.to_string();
    }
    let local = match local.split_once('+') {
        Some((base, _tag)) if !base.is_empty() => base,
        _ => local,
    };
    format!("{local}@{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_collapses_runs_of_separators() {
        assert_eq!(slug("My Recipe"), "my-recipe");
        assert_eq!(slug("a  --  b"), "a-b");
        assert_eq!(slug("Hello, World!!"), "hello-world-");
        assert_eq!(slug("page-1"), "page-1");
    }

    #[test]
    fn slug_replaces_non_ascii_letters() {
        assert_eq!(slug("Crème Brûlée"), "cr-me-br-l-e");
        assert_eq!(slug("日本語"), "-");
    }

    #[test]
    fn username_slug_drops_plus_tag() {
        assert_eq!(username_slug("User+tag@Gmail.com"), "user-gmail-com");
        assert_eq!(username_slug("alice"), "alice");
        assert_eq!(username_slug("+only@host.io"), "-only-host-io");
    }

    #[test]
    fn slug_never_contains_double_hyphen() {
        for raw in ["a!!!b", "--x--", "a . - _ b", "User+tag@Gmail.com", "x\u{00a0}\u{00a0}y"] {
            let out = username_slug(raw);
            assert!(!out.contains("--"), "{raw} -> {out}");
            assert!(out
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-'));
        }
    }
}
