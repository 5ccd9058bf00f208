use std::sync::OnceLock;

use regex::Regex;

/// BIB identifiers double as filesystem path segments for per-run logs, so
/// the same rule is applied at resolution time and at log-directory
/// creation time.
pub fn is_valid_bib_id(id: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-\.]+$").unwrap());
    (3..=50).contains(&id.len()) && re.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        assert!(is_valid_bib_id("client_demo"));
        assert!(is_valid_bib_id("BIB-042"));
        assert!(is_valid_bib_id("rev1.3"));
    }

    #[test]
    fn rejects_short_long_and_unsafe_ids() {
        assert!(!is_valid_bib_id("xy"));
        assert!(!is_valid_bib_id(&"a".repeat(51)));
        assert!(!is_valid_bib_id("bad/seg"));
        assert!(!is_valid_bib_id("has space"));
        assert!(!is_valid_bib_id(""));
    }
}
