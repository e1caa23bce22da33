//! Minimal glob matching for provider include/exclude patterns.
//!
//! Supports `*` (any run of characters except `/`), `**` (any run of
//! characters including `/`), and `?` (single character). No crate in the
//! retrieved example corpus provides glob matching, so this is hand-rolled
//! rather than pulling in an unrelated dependency.

/// Returns true if `path` matches `pattern`.
pub fn matches(pattern: &str, path: &str) -> bool {
    match_segments(pattern.as_bytes(), path.as_bytes())
}

fn match_segments(pattern: &[u8], text: &[u8]) -> bool {
    match_from(pattern, text)
}

fn match_from(pattern: &[u8], text: &[u8]) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }

    if pattern.starts_with(b"**") {
        let rest = &pattern[2..];
        let rest = if rest.first() == Some(&b'/') {
            &rest[1..]
        } else {
            rest
        };
        if match_from(rest, text) {
            return true;
        }
        for i in 0..text.len() {
            if match_from(rest, &text[i + 1..]) {
                return true;
            }
        }
        return false;
    }

    if pattern[0] == b'*' {
        let rest = &pattern[1..];
        if match_from(rest, text) {
            return true;
        }
        for i in 0..text.len() {
            if text[i] == b'/' {
                break;
            }
            if match_from(rest, &text[i + 1..]) {
                return true;
            }
        }
        return false;
    }

    if text.is_empty() {
        return false;
    }

    if pattern[0] == b'?' && text[0] != b'/' {
        return match_from(&pattern[1..], &text[1..]);
    }

    if pattern[0] == text[0] {
        return match_from(&pattern[1..], &text[1..]);
    }

    false
}

/// Applies include/exclude glob lists to a candidate path: empty include ⇒
/// everything not excluded is included; exclude always wins.
pub fn is_included(path: &str, include: &[String], exclude: &[String]) -> bool {
    if exclude.iter().any(|p| matches(p, path)) {
        return false;
    }
    if include.is_empty() {
        return true;
    }
    include.iter().any(|p| matches(p, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_segment() {
        assert!(matches("models/*.yaml", "models/org.yaml"));
        assert!(!matches("models/*.yaml", "models/nested/org.yaml"));
    }

    #[test]
    fn doublestar_crosses_segments() {
        assert!(matches("models/**/*.yaml", "models/a/b/org.yaml"));
    }

    #[test]
    fn exclude_wins_over_include() {
        assert!(!is_included(
            "models/secret.yaml",
            &["models/*.yaml".into()],
            &["models/secret.yaml".into()]
        ));
    }

    #[test]
    fn empty_include_means_everything_not_excluded() {
        assert!(is_included("anything/here.yaml", &[], &[]));
        assert!(!is_included(
            "anything/here.yaml",
            &[],
            &["anything/**".into()]
        ));
    }
}
