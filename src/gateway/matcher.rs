//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive, port ignored)
//! - Match path prefix (case-sensitive, segment aware)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use std::fmt;

use crate::gateway::request::InboundRequest;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + fmt::Debug {
    fn matches(&self, req: &InboundRequest) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_ascii_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        req.host().is_some_and(|h| h == self.expected_host)
    }
}

/// Matches a path prefix.
///
/// `/api/orders` matches `/api/orders` and `/api/orders/7` but not
/// `/api/ordersx`. A trailing `*` (`/api/ord*`) matches any continuation.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
    wildcard: bool,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        match prefix.strip_suffix('*') {
            Some(stem) => Self {
                prefix: stem.to_string(),
                wildcard: true,
            },
            None => Self {
                prefix,
                wildcard: false,
            },
        }
    }

    /// The literal prefix, without any trailing `*`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches_path(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        self.wildcard || self.prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/')
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        self.matches_path(req.path())
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, matcher: impl Matcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &InboundRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}
