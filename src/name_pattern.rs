//! Hostname patterns with RFC 6125 style wildcards.
//!
//! A pattern is a dot-separated list of labels. At most one `*` may appear,
//! and only in the leftmost label, either as the whole label (`*.example.com`)
//! or as part of it (`foo*.example.com`, `*bar.example.com`, `f*o.example.com`).
//! A pattern with N labels only matches candidates with exactly N labels, so a
//! wildcard never spans a dot.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::hostname_util::{is_ace_label, label_count};

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Errors produced when turning a configuration or certificate string into a
/// [`NamePattern`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamePatternError {
    #[error("hostname pattern is empty")]
    Empty,

    #[error("hostname pattern exceeds 253 bytes")]
    TooLong,

    #[error("hostname pattern has an empty label")]
    EmptyLabel,

    #[error("hostname pattern label exceeds 63 bytes")]
    LabelTooLong,

    #[error("hostname pattern contains non-ASCII bytes")]
    NonAscii,

    #[error("hostname pattern contains whitespace or control characters")]
    InvalidCharacter,

    #[error("hostname pattern has more than one wildcard")]
    MultipleWildcards,

    #[error("wildcard is only allowed in the leftmost label")]
    WildcardNotLeftmost,

    #[error("wildcard pattern needs at least one label after the wildcard label")]
    BareWildcard,
}

/// Position of the `*` inside the leftmost label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Wildcard {
    star: usize,
}

/// A validated, lower-cased hostname pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamePattern {
    name: String,
    label_count: usize,
    wildcard: Option<Wildcard>,
}

impl NamePattern {
    /// Parses and validates a hostname pattern. A single trailing dot is
    /// accepted and dropped; ASCII letters are lower-cased.
    ///
    /// ```
    /// use certmatch::NamePattern;
    ///
    /// let pattern = NamePattern::parse("*.Example.com").unwrap();
    /// assert!(pattern.matches("api.example.com"));
    /// assert!(!pattern.matches("example.com"));
    /// assert!(NamePattern::parse("api.*.example.com").is_err());
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, NamePatternError> {
        let pattern = pattern.strip_suffix('.').unwrap_or(pattern);

        if pattern.is_empty() {
            return Err(NamePatternError::Empty);
        }
        if pattern.len() > MAX_NAME_LEN {
            return Err(NamePatternError::TooLong);
        }
        if !pattern.is_ascii() {
            return Err(NamePatternError::NonAscii);
        }
        if pattern
            .bytes()
            .any(|b| b.is_ascii_control() || b.is_ascii_whitespace())
        {
            return Err(NamePatternError::InvalidCharacter);
        }

        let mut wildcard = None;
        for (i, label) in pattern.split('.').enumerate() {
            if label.is_empty() {
                return Err(NamePatternError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(NamePatternError::LabelTooLong);
            }
            let stars = label.bytes().filter(|b| *b == b'*').count();
            if stars == 0 {
                continue;
            }
            if stars > 1 || wildcard.is_some() {
                return Err(NamePatternError::MultipleWildcards);
            }
            if i != 0 {
                return Err(NamePatternError::WildcardNotLeftmost);
            }
            wildcard = label.find('*').map(|star| Wildcard { star });
        }

        let label_count = label_count(pattern);
        if wildcard.is_some() && label_count < 2 {
            return Err(NamePatternError::BareWildcard);
        }

        Ok(Self {
            name: pattern.to_ascii_lowercase(),
            label_count,
            wildcard,
        })
    }

    /// The normalized pattern text.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn label_count(&self) -> usize {
        self.label_count
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard.is_some()
    }

    /// True for `*.suffix` patterns, false for partial-label wildcards and
    /// exact names.
    pub fn is_full_label_wildcard(&self) -> bool {
        self.wildcard.is_some() && self.first_label() == "*"
    }

    /// The leftmost label, which holds the wildcard if there is one.
    pub fn first_label(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Everything after the leftmost label, or `""` for single-label names.
    pub fn suffix(&self) -> &str {
        self.name.split_once('.').map(|(_, rest)| rest).unwrap_or("")
    }

    pub fn labels(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.name.split('.')
    }

    /// Matches `candidate` against this pattern. A leading `xn--` on the
    /// candidate's wildcard-position label is detected automatically.
    pub fn matches(&self, candidate: &str) -> bool {
        matches(self, candidate, false)
    }

    fn matches_wildcard_label(&self, wildcard: Wildcard, label: &str, is_ace: bool) -> bool {
        if label.is_empty() {
            return false;
        }
        let first = self.first_label().as_bytes();
        if first.len() == 1 {
            // Full-label wildcard, allowed to match A-labels.
            return true;
        }
        if is_ace || is_ace_label(label) || !label.is_ascii() {
            return false;
        }
        let prefix = &first[..wildcard.star];
        let suffix = &first[wildcard.star + 1..];
        let label = label.as_bytes();
        label.len() >= prefix.len() + suffix.len()
            && label[..prefix.len()].eq_ignore_ascii_case(prefix)
            && label[label.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    }
}

/// Matches `candidate` against `pattern`.
///
/// `candidate_is_ace_label` lets a caller that already knows the candidate is
/// internationalized force the A-label restriction; the `xn--` prefix check is
/// applied regardless.
///
/// A candidate containing a literal `*` never matches. Comparison is ASCII
/// case-insensitive and does not allocate.
pub fn matches(pattern: &NamePattern, candidate: &str, candidate_is_ace_label: bool) -> bool {
    if candidate.contains('*') {
        return false;
    }
    let candidate = candidate.strip_suffix('.').unwrap_or(candidate);
    if candidate.is_empty() || label_count(candidate) != pattern.label_count {
        return false;
    }

    let wildcard = match pattern.wildcard {
        Some(wildcard) => wildcard,
        None => return pattern.name.eq_ignore_ascii_case(candidate),
    };

    let (first, rest) = match candidate.split_once('.') {
        Some(parts) => parts,
        None => return false,
    };
    if !rest.eq_ignore_ascii_case(pattern.suffix()) {
        return false;
    }
    pattern.matches_wildcard_label(wildcard, first, candidate_is_ace_label)
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for NamePattern {
    type Err = NamePatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> serde::Deserialize<'de> for NamePattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> NamePattern {
        NamePattern::parse(s).unwrap()
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn exact_name() {
            let p = pat("www.example.com");
            assert!(!p.is_wildcard());
            assert_eq!(p.label_count(), 3);
            assert_eq!(p.as_str(), "www.example.com");
        }

        #[test]
        fn full_label_wildcard() {
            let p = pat("*.example.com");
            assert!(p.is_wildcard());
            assert!(p.is_full_label_wildcard());
            assert_eq!(p.first_label(), "*");
            assert_eq!(p.suffix(), "example.com");
        }

        #[test]
        fn partial_wildcards() {
            for s in ["foo*.example.com", "*bar.example.com", "f*o.example.com"] {
                let p = pat(s);
                assert!(p.is_wildcard(), "{}", s);
                assert!(!p.is_full_label_wildcard(), "{}", s);
            }
        }

        #[test]
        fn lowercases_and_strips_trailing_dot() {
            assert_eq!(pat("*.Example.COM.").as_str(), "*.example.com");
        }

        #[test]
        fn single_label_suffix_wildcard() {
            assert_eq!(pat("*.com").label_count(), 2);
        }

        #[test]
        fn rejects_empty() {
            assert_eq!(NamePattern::parse(""), Err(NamePatternError::Empty));
            assert_eq!(NamePattern::parse("."), Err(NamePatternError::Empty));
        }

        #[test]
        fn rejects_empty_labels() {
            for s in ["example..com", ".example.com", "*..example.com", "a.b.."] {
                assert_eq!(
                    NamePattern::parse(s),
                    Err(NamePatternError::EmptyLabel),
                    "{}",
                    s
                );
            }
        }

        #[test]
        fn rejects_double_wildcards() {
            for s in ["**.example.com", "*.*.example.com", "*foo*.example.com"] {
                assert_eq!(
                    NamePattern::parse(s),
                    Err(NamePatternError::MultipleWildcards),
                    "{}",
                    s
                );
            }
        }

        #[test]
        fn rejects_wildcard_outside_leftmost_label() {
            for s in ["api.*.example.com", "example.*", "foo.b*r.com"] {
                assert_eq!(
                    NamePattern::parse(s),
                    Err(NamePatternError::WildcardNotLeftmost),
                    "{}",
                    s
                );
            }
        }

        #[test]
        fn rejects_bare_wildcard() {
            assert_eq!(NamePattern::parse("*"), Err(NamePatternError::BareWildcard));
            assert_eq!(NamePattern::parse("*."), Err(NamePatternError::BareWildcard));
            assert_eq!(
                NamePattern::parse("foo*"),
                Err(NamePatternError::BareWildcard)
            );
        }

        #[test]
        fn rejects_bad_characters() {
            assert_eq!(
                NamePattern::parse("exa mple.com"),
                Err(NamePatternError::InvalidCharacter)
            );
            assert_eq!(
                NamePattern::parse("example\x00.com"),
                Err(NamePatternError::InvalidCharacter)
            );
            assert_eq!(
                NamePattern::parse("caf\u{00e9}.com"),
                Err(NamePatternError::NonAscii)
            );
        }

        #[test]
        fn rejects_oversized() {
            let long_label = format!("{}.com", "a".repeat(64));
            assert_eq!(
                NamePattern::parse(&long_label),
                Err(NamePatternError::LabelTooLong)
            );
            let long_name = format!("{}.com", ["a"; 130].join("."));
            assert_eq!(NamePattern::parse(&long_name), Err(NamePatternError::TooLong));
        }

        #[test]
        fn display_round_trips() {
            for s in [
                "WWW.example.com",
                "*.Example.com.",
                "foo*.trafficserver.com",
                "*bar.trafficserver.net",
                "localhost",
            ] {
                let p = pat(s);
                assert_eq!(NamePattern::parse(&p.to_string()), Ok(p.clone()));
                assert_eq!(p.to_string().parse::<NamePattern>(), Ok(p));
            }
        }

        #[test]
        fn deserializes_through_serde() {
            let p: NamePattern =
                serde_json::from_value(serde_json::Value::String("*.Example.com".into()))
                    .unwrap();
            assert_eq!(p, pat("*.example.com"));
            assert!(serde_json::from_value::<NamePattern>(serde_json::Value::String(
                "a.*.com".into()
            ))
            .is_err());
        }
    }

    mod matches_tests {
        use super::*;

        #[test]
        fn exact_is_case_insensitive() {
            let p = pat("www.example.com");
            assert!(p.matches("www.example.com"));
            assert!(p.matches("WWW.Example.Com"));
            assert!(p.matches("www.example.com."));
            assert!(!p.matches("www.example.org"));
            assert!(!p.matches("a.www.example.com"));
        }

        #[test]
        fn literal_wildcard_in_candidate_never_matches() {
            let p = pat("*.trafficserver.org");
            assert!(!p.matches("a.*.trafficserver.org"));
            assert!(!p.matches("*.trafficserver.org"));
            // Not even against an exact pattern that happens to agree.
            assert!(!pat("www.example.com").matches("*.example.com"));
        }

        #[test]
        fn full_label_wildcard_matches_one_label() {
            let p = pat("*.trafficserver.org");
            assert!(p.matches("www.trafficserver.org"));
            assert!(p.matches("WWW.TrafficServer.org"));
            assert!(!p.matches("trafficserver.org"));
            assert!(!p.matches("a.b.trafficserver.org"));
            assert!(!p.matches("www.trafficserver.com"));
        }

        #[test]
        fn full_label_wildcard_matches_a_label() {
            let p = pat("*.trafficserver.org");
            assert!(p.matches("xn--foobar.trafficserver.org"));
            assert!(matches(&p, "xn--foobar.trafficserver.org", true));
        }

        #[test]
        fn partial_wildcard_rejects_a_label() {
            let p = pat("*bar.trafficserver.net");
            assert!(!p.matches("xn--foobar.trafficserver.net"));
            assert!(!p.matches("XN--foobar.trafficserver.net"));
            let p = pat("xn*.trafficserver.net");
            assert!(!p.matches("xn--foobar.trafficserver.net"));
        }

        #[test]
        fn ace_hint_forces_restriction() {
            let p = pat("foo*.trafficserver.com");
            assert!(p.matches("foosomething.trafficserver.com"));
            assert!(!matches(&p, "foosomething.trafficserver.com", true));
        }

        #[test]
        fn prefix_wildcard() {
            let p = pat("foo*.trafficserver.com");
            assert!(p.matches("foosomething.trafficserver.com"));
            assert!(p.matches("FOObar.trafficserver.com"));
            assert!(p.matches("foo.trafficserver.com"));
            assert!(!p.matches("barfoo.trafficserver.com"));
            assert!(!p.matches("foo.a.trafficserver.com"));
        }

        #[test]
        fn suffix_wildcard() {
            let p = pat("*bar.trafficserver.net");
            assert!(p.matches("foobar.trafficserver.net"));
            assert!(p.matches("bar.trafficserver.net"));
            assert!(!p.matches("a.bar.trafficserver.net"));
            assert!(!p.matches("barfoo.trafficserver.net"));
        }

        #[test]
        fn infix_wildcard() {
            let p = pat("f*o.example.com");
            assert!(p.matches("fo.example.com"));
            assert!(p.matches("foooo.example.com"));
            assert!(!p.matches("f.example.com"));
            assert!(!p.matches("fa.example.com"));
        }

        #[test]
        fn malformed_candidates_do_not_match() {
            let p = pat("*.example.com");
            assert!(!p.matches(""));
            assert!(!p.matches(".example.com"));
            assert!(!p.matches("a..com"));
            assert!(!p.matches("a.example..com"));
        }

        #[test]
        fn non_ascii_candidate_does_not_panic() {
            let p = pat("f*o.example.com");
            assert!(!p.matches("\u{00e9}.example.com"));
            assert!(!pat("*bar.example.com").matches("\u{00e9}bar.example.com"));
        }
    }
}
