//! C1 — Pattern Matcher.
//!
//! Compiles a route path into a [`Pattern`] and matches request paths
//! against it, either in template mode (`<name>` holes) or regex mode. The
//! DNS wildcard matcher used by the host resolver (C2) lives here too,
//! since spec.md §4.1 describes it as logically part of this component.

use std::collections::HashMap;

use crate::error::ConfigError;

/// One segment of a compiled template pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Template-mode matcher: a path split into literal and `<name>` segments.
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    segments: Vec<Segment>,
    case_sensitive: bool,
    source: String,
}

impl TemplateMatcher {
    /// Compiles `pattern`, discarding empty leading/trailing segments and
    /// validating that every `<` has a matching `>`.
    pub fn compile(pattern: &str, case_sensitive: bool) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            if raw.starts_with('<') && raw.ends_with('>') && raw.len() >= 2 {
                segments.push(Segment::Param(raw[1..raw.len() - 1].to_string()));
            } else if raw.contains('<') || raw.contains('>') {
                return Err(ConfigError::UnbalancedHole(pattern.to_string()));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }
        Ok(TemplateMatcher {
            segments,
            case_sensitive,
            source: pattern.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Matches `path`, returning the extracted (and URL-decoded) named
    /// parameters on success.
    pub fn matches(&self, path: &str) -> (bool, HashMap<String, String>) {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if path_segments.len() != self.segments.len() {
            return (false, HashMap::new());
        }

        let mut params = HashMap::new();
        for (pat, actual) in self.segments.iter().zip(path_segments.iter()) {
            match pat {
                Segment::Param(name) => {
                    let decoded = urlencoding::decode(actual)
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| (*actual).to_string());
                    params.insert(name.clone(), decoded);
                }
                Segment::Literal(lit) => {
                    let equal = if self.case_sensitive {
                        lit == actual
                    } else {
                        lit.eq_ignore_ascii_case(actual)
                    };
                    if !equal {
                        return (false, HashMap::new());
                    }
                }
            }
        }
        (true, params)
    }

    /// Structural overlap test used by route-collision detection
    /// (spec.md §4.3): two template patterns collide if there is some
    /// concrete path both would accept. A `<name>` hole accepts any literal
    /// (including another hole), so positions overlap unless both sides are
    /// literals that differ.
    pub fn structurally_overlaps(&self, other: &TemplateMatcher) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        let case_sensitive = self.case_sensitive && other.case_sensitive;
        self.segments.iter().zip(other.segments.iter()).all(|(a, b)| match (a, b) {
            (Segment::Param(_), _) | (_, Segment::Param(_)) => true,
            (Segment::Literal(x), Segment::Literal(y)) => {
                if case_sensitive {
                    x == y
                } else {
                    x.eq_ignore_ascii_case(y)
                }
            }
        })
    }
}

/// Regex-mode matcher. Named groups are never promoted into the parameter
/// map (spec.md §4.1 "Open Question" #1 in SPEC_FULL.md §9) — regex routes
/// only produce a boolean result.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: regex::Regex,
    source: String,
}

impl RegexMatcher {
    pub fn compile(pattern: &str, case_sensitive: bool) -> Result<Self, ConfigError> {
        let built = if case_sensitive {
            regex::Regex::new(pattern)?
        } else {
            regex::RegexBuilder::new(pattern).case_insensitive(true).build()?
        };
        Ok(RegexMatcher {
            regex: built,
            source: pattern.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// A compiled route pattern: template-mode and regex-mode are mutually
/// exclusive and fixed at construction (spec.md §3).
#[derive(Debug, Clone)]
pub enum Pattern {
    Template(TemplateMatcher),
    Regex(RegexMatcher),
}

impl Pattern {
    pub fn compile_template(pattern: &str, case_sensitive: bool) -> Result<Self, ConfigError> {
        Ok(Pattern::Template(TemplateMatcher::compile(pattern, case_sensitive)?))
    }

    pub fn compile_regex(pattern: &str, case_sensitive: bool) -> Result<Self, ConfigError> {
        Ok(Pattern::Regex(RegexMatcher::compile(pattern, case_sensitive)?))
    }

    pub fn matches(&self, path: &str) -> (bool, HashMap<String, String>) {
        match self {
            Pattern::Template(t) => t.matches(path),
            Pattern::Regex(r) => (r.matches(path), HashMap::new()),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Pattern::Template(t) => t.source(),
            Pattern::Regex(r) => r.source(),
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Pattern::Template(_))
    }
}

/// DNS wildcard matcher used by the host resolver (C2). Case-insensitive.
///
/// - zero `*` → equality
/// - one `*` at the start → suffix match
/// - one `*` at the end → prefix match
/// - otherwise → split on `*`; the first chunk must sit at offset 0, the
///   last chunk must sit at the tail, and the middle chunks must occur in
///   order at increasing offsets.
pub fn dns_wildcard_match(pattern: &str, subject: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let subject = subject.to_ascii_lowercase();

    if !pattern.contains('*') {
        return pattern == subject;
    }
    if pattern.starts_with('*') && pattern.matches('*').count() == 1 {
        let suffix = &pattern[1..];
        return subject.ends_with(suffix);
    }
    if pattern.ends_with('*') && pattern.matches('*').count() == 1 {
        let prefix = &pattern[..pattern.len() - 1];
        return subject.starts_with(prefix);
    }

    let chunks: Vec<&str> = pattern.split('*').collect();
    let first = chunks.first().copied().unwrap_or("");
    let last = chunks.last().copied().unwrap_or("");
    if !subject.starts_with(first) {
        return false;
    }
    if !subject.ends_with(last) {
        return false;
    }

    let mut cursor = first.len();
    for chunk in &chunks[1..chunks.len().saturating_sub(1)] {
        if chunk.is_empty() {
            continue;
        }
        match subject[cursor..].find(chunk) {
            Some(offset) => cursor += offset + chunk.len(),
            None => return false,
        }
    }
    // The tail chunk must still occur at or after the cursor we walked to.
    cursor <= subject.len() - last.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_extracts_params() {
        let m = TemplateMatcher::compile("/users/<id>/profile", true).unwrap();
        let (ok, params) = m.matches("/users/42/profile");
        assert!(ok);
        assert_eq!(params.get("id").unwrap(), "42");
    }

    #[test]
    fn template_rejects_unbalanced_hole() {
        assert!(TemplateMatcher::compile("/users/<id", true).is_err());
    }

    #[test]
    fn template_case_insensitive_literal() {
        let m = TemplateMatcher::compile("/Foo", false).unwrap();
        assert!(m.matches("/foo").0);
    }

    #[test]
    fn template_url_decodes_params() {
        let m = TemplateMatcher::compile("/search/<term>", true).unwrap();
        let (ok, params) = m.matches("/search/hello%20world");
        assert!(ok);
        assert_eq!(params.get("term").unwrap(), "hello world");
    }

    #[test]
    fn template_segment_count_mismatch_fails() {
        let m = TemplateMatcher::compile("/a/b", true).unwrap();
        assert!(!m.matches("/a").0);
    }

    #[test]
    fn structural_overlap_hole_vs_literal() {
        let a = TemplateMatcher::compile("/users/<id>", true).unwrap();
        let b = TemplateMatcher::compile("/users/42", true).unwrap();
        assert!(a.structurally_overlaps(&b));
        assert!(b.structurally_overlaps(&a));
    }

    #[test]
    fn structural_overlap_different_lengths_never_overlap() {
        let a = TemplateMatcher::compile("/a/<id>/profile", true).unwrap();
        let b = TemplateMatcher::compile("/a/profile", true).unwrap();
        assert!(!a.structurally_overlaps(&b));
    }

    #[test]
    fn regex_matches_without_capturing_params() {
        let m = RegexMatcher::compile(r"^/api/v\d+/items$", true).unwrap();
        assert!(m.matches("/api/v2/items"));
        assert!(!m.matches("/api/items"));
    }

    #[test]
    fn dns_wildcard_equality() {
        assert!(dns_wildcard_match("example.com", "EXAMPLE.com"));
        assert!(!dns_wildcard_match("example.com", "other.com"));
    }

    #[test]
    fn dns_wildcard_prefix_suffix() {
        assert!(dns_wildcard_match("*.example.com", "api.example.com"));
        assert!(dns_wildcard_match("api.*", "api.example.com"));
        assert!(!dns_wildcard_match("*.example.com", "example.com"));
    }

    #[test]
    fn dns_wildcard_mid_string_chunks_in_order() {
        assert!(dns_wildcard_match("a*b*c", "axxbyyc"));
        assert!(!dns_wildcard_match("a*b*c", "b_a_c"));
        assert!(!dns_wildcard_match("a*b*c", "axxb"));
    }
}
