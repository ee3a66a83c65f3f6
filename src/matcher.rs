//! Route matching logic.
//!
//! Matches an inbound method and path against the ordered candidate list
//! returned by the registry. The first candidate whose pattern matches wins.

use crate::config::EndpointDefinition;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of matching a request against the registry candidates.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched endpoint, as seen at lookup time
    pub endpoint: Arc<EndpointDefinition>,
    /// Named parameters bound by `:name` segments
    pub params: HashMap<String, String>,
}

/// A compiled route pattern such as `/users/:id/posts`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    segments: Vec<PatternSegment>,
}

#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    Literal(String),
    Param(String),
}

impl PathPattern {
    /// Compile a pattern. Segments starting with `:` bind a parameter.
    pub fn parse(pattern: &str) -> Self {
        let segments = split_segments(pattern)
            .into_iter()
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => PatternSegment::Param(name.to_string()),
                None => PatternSegment::Literal(segment.to_string()),
            })
            .collect();

        Self { segments }
    }

    /// Names of the parameters this pattern binds, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            PatternSegment::Param(name) => Some(name.as_str()),
            PatternSegment::Literal(_) => None,
        })
    }

    /// Match a request path, returning the bound parameters.
    ///
    /// Literals compare ASCII case-insensitively and a single trailing slash
    /// on the request path is ignored. Parameter values are percent-decoded.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_segments(path).into_iter();

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                PatternSegment::Literal(lit) => {
                    if !lit.eq_ignore_ascii_case(part) {
                        return None;
                    }
                }
                PatternSegment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), percent_decode_str(part).decode_utf8_lossy().into_owned());
                }
            }
        }

        // Must consume entire path
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

/// Split a path into segments, dropping the leading slash and one trailing slash.
fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Find the first candidate matching `method` and `path`.
///
/// Candidate order is preserved; no specificity ranking is applied.
pub fn find_match(
    candidates: &[Arc<EndpointDefinition>],
    method: &str,
    path: &str,
) -> Option<RouteMatch> {
    candidates
        .iter()
        .filter(|candidate| candidate.method.eq_ignore_ascii_case(method))
        .find_map(|candidate| {
            PathPattern::parse(&candidate.path)
                .matches(path)
                .map(|params| RouteMatch {
                    endpoint: Arc::clone(candidate),
                    params,
                })
        })
}

/// Strip the mount prefix from an inbound path, yielding `/` when nothing remains.
pub fn strip_mount_prefix(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return if path.is_empty() { "/".to_string() } else { path.to_string() };
    }

    match path.strip_prefix(prefix) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ if path.is_empty() => "/".to_string(),
        _ => path.to_string(),
    }
}
