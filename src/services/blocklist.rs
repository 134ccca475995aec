//! Resource blocklist for sub-resource requests.
//!
//! Patterns are unanchored regular expressions matched anywhere in the full
//! URL. A domain pattern therefore also matches a path segment or query value
//! containing the same text; `.` in a pattern matches any character.

use regex::RegexSet;

/// Verdict for a single outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Block,
    Allow,
}

/// Compiled blocklist shared by all scans.
#[derive(Debug, Clone)]
pub struct Blocklist {
    patterns: RegexSet,
}

impl Blocklist {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// Block if any pattern matches anywhere in the URL.
    pub fn check(&self, url: &str) -> Verdict {
        if self.patterns.is_match(url) {
            Verdict::Block
        } else {
            Verdict::Allow
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BLOCKLIST;

    fn defaults() -> Blocklist {
        Blocklist::new(DEFAULT_BLOCKLIST).unwrap()
    }

    #[test]
    fn blocks_tracker_subdomain() {
        assert_eq!(
            defaults().check("https://stats.doubleclick.net/x"),
            Verdict::Block
        );
    }

    #[test]
    fn allows_unrelated_url() {
        assert_eq!(defaults().check("https://example.com/app.js"), Verdict::Allow);
    }

    #[test]
    fn matches_pattern_in_query_value() {
        // Unanchored: the pattern hits a query parameter too.
        assert_eq!(
            defaults().check("https://example.com/?ref=doubleclick.net"),
            Verdict::Block
        );
    }

    #[test]
    fn dot_matches_any_character() {
        let list = Blocklist::new(["ads.example"]).unwrap();
        assert_eq!(list.check("https://adsXexample.org/"), Verdict::Block);
    }

    #[test]
    fn empty_list_allows_everything() {
        let list = Blocklist::new(Vec::<String>::new()).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.check("https://doubleclick.net/"), Verdict::Allow);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(Blocklist::new(["(unclosed"]).is_err());
    }
}
