/// Join URL or path segments with `/`, trimming duplicate separators.
#[must_use]
pub fn join_path(parts: &[&str]) -> String {
    let mut out = String::new();
    for (index, part) in parts.iter().enumerate() {
        let part = if index == 0 {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if part.is_empty() && index > 0 {
            continue;
        }
        if index > 0 {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

/// A masterhash is 40 lowercase hex characters; an empty one is accepted as "unset".
#[must_use]
pub fn is_masterhash_valid(masterhash: &str) -> bool {
    masterhash.is_empty()
        || (masterhash.len() == 40
            && masterhash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
}

/// Compute download progress as a percentage.
#[must_use]
pub fn progress_percent(done: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (done as f32 / total as f32) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_url_segments() {
        assert_eq!(
            join_path(&["https://assets.example/", "abc", "sc/ui.sc"]),
            "https://assets.example/abc/sc/ui.sc"
        );
        assert_eq!(join_path(&["host", "/hash/", "fingerprint.json"]), "host/hash/fingerprint.json");
        assert_eq!(join_path(&["/root", "", "a"]), "/root/a");
    }

    #[test]
    fn validates_masterhash() {
        assert!(is_masterhash_valid(""));
        assert!(is_masterhash_valid("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_masterhash_valid("0123456789ABCDEF0123456789abcdef01234567"));
        assert!(!is_masterhash_valid("0123456789abcdef"));
        assert!(!is_masterhash_valid("g123456789abcdef0123456789abcdef01234567"));
    }

    #[test]
    fn calculates_progress_percent() {
        assert_eq!(progress_percent(0, 10), 0.0);
        assert_eq!(progress_percent(5, 10), 50.0);
        assert_eq!(progress_percent(10, 10), 100.0);
        assert_eq!(progress_percent(5, 0), 0.0);
    }
}
