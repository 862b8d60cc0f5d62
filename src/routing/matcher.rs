//! Route matching logic.
//!
//! # Responsibilities
//! - Match request paths against literal and `:param` segment patterns
//! - Match the request method (a GET route also serves HEAD)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Path matching is case-sensitive and segment-aware: `/usage` never
//!   matches `/usages`
//! - Prefix patterns report how much of the path they consumed, so mounted
//!   routers see the remainder
//! - No regex; matching is a single pass over the segments

use std::collections::BTreeMap;

use axum::http::Method;

/// What a successful match captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMatch {
    pub params: BTreeMap<String, String>,
    /// Bytes of the path consumed by the pattern.
    pub matched_len: usize,
}

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns the captured parameters if the request matches.
    fn matches(&self, method: &Method, path: &str) -> Option<PathMatch>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A path pattern such as `/tenants/:tenant/usage`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    end: bool,
}

impl PathPattern {
    /// Matches the whole path (route registration).
    pub fn exact(pattern: &str) -> Self {
        Self::parse(pattern, true)
    }

    /// Matches a leading run of segments (`use` registration and mounts).
    pub fn prefix(pattern: &str) -> Self {
        Self::parse(pattern, false)
    }

    fn parse(pattern: &str, end: bool) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            segments,
            end,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match `path`, which starts with `/`.
    pub fn match_path(&self, path: &str) -> Option<PathMatch> {
        let mut params = BTreeMap::new();
        let mut rest = path;
        let mut consumed = 0;

        for segment in &self.segments {
            let body = rest.strip_prefix('/')?;
            let len = body.find('/').unwrap_or(body.len());
            let value = &body[..len];
            if value.is_empty() {
                return None;
            }
            match segment {
                Segment::Literal(literal) if literal != value => return None,
                Segment::Literal(_) => {}
                Segment::Param(name) => {
                    params.insert(name.clone(), value.to_string());
                }
            }
            consumed += 1 + len;
            rest = &body[len..];
        }

        if self.end && !(rest.is_empty() || rest == "/") {
            return None;
        }
        Some(PathMatch {
            params,
            matched_len: consumed,
        })
    }
}

impl Matcher for PathPattern {
    fn matches(&self, _method: &Method, path: &str) -> Option<PathMatch> {
        self.match_path(path)
    }
}

/// Matches one HTTP method.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    method: Method,
}

impl MethodMatcher {
    pub fn new(method: Method) -> Self {
        Self { method }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, method: &Method, _path: &str) -> Option<PathMatch> {
        let hit = *method == self.method || (self.method == Method::GET && *method == Method::HEAD);
        hit.then(PathMatch::default)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, method: &Method, path: &str) -> Option<PathMatch> {
        let mut combined = PathMatch::default();
        for matcher in &self.matchers {
            let found = matcher.matches(method, path)?;
            combined.params.extend(found.params);
            combined.matched_len = combined.matched_len.max(found.matched_len);
        }
        Some(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern_with_params() {
        let pattern = PathPattern::exact("/tenants/:tenant/usage");

        let found = pattern.match_path("/tenants/acme/usage").unwrap();
        assert_eq!(found.params.get("tenant").map(String::as_str), Some("acme"));
        assert!(pattern.match_path("/tenants/acme/usage/").is_some());

        assert!(pattern.match_path("/tenants/acme").is_none());
        assert!(pattern.match_path("/tenants/acme/usage/daily").is_none());
        assert!(pattern.match_path("/tenants//usage").is_none());
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        let pattern = PathPattern::prefix("/usage");

        let found = pattern.match_path("/usage/42").unwrap();
        assert_eq!(found.matched_len, 6);
        assert_eq!(pattern.match_path("/usage").unwrap().matched_len, 6);
        assert!(pattern.match_path("/usages").is_none());

        let root = PathPattern::prefix("/");
        assert_eq!(root.match_path("/anything").unwrap().matched_len, 0);
    }

    #[test]
    fn test_get_also_matches_head() {
        let get = MethodMatcher::new(Method::GET);
        assert!(get.matches(&Method::GET, "/").is_some());
        assert!(get.matches(&Method::HEAD, "/").is_some());
        assert!(get.matches(&Method::POST, "/").is_none());

        let head = MethodMatcher::new(Method::HEAD);
        assert!(head.matches(&Method::GET, "/").is_none());
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::new(vec![
            Box::new(MethodMatcher::new(Method::POST)),
            Box::new(PathPattern::exact("/usage/:id")),
        ]);
        let found = matcher.matches(&Method::POST, "/usage/7").unwrap();
        assert_eq!(found.params.get("id").map(String::as_str), Some("7"));
        assert!(matcher.matches(&Method::GET, "/usage/7").is_none());
    }
}
