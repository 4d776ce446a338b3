//! URI pattern compilation and matching
//!
//! A template is a `/`-delimited list of segments. A segment prefixed with
//! `:` is a named parameter; a parameter segment that also contains `*` is a
//! wildcard and greedily captures one or more request segments.
//!
//! ```text
//! /users/:id            id  = "42"        for /users/42
//! /static/:path*        path = "css/a.css" for /static/css/a.css
//! /files/:rest*/meta    rest = "a/b"      for /files/a/b/meta
//! ```

use std::collections::HashMap;

use crate::error::{Error, Result};

/// One compiled segment of a route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Whether the segment captures a value
    pub is_parameter: bool,
    /// Whether the segment captures multiple request segments
    pub is_wildcard: bool,
    /// Literal text, or the parameter name with its markers stripped
    pub key: String,
}

/// A route's URI template and the state compiled from it
#[derive(Debug, Clone)]
pub struct Pattern {
    template: String,
    trailing_slash: bool,
    fragments: Vec<Fragment>,
    has_wildcard: bool,
    param_count: usize,
    compiled: bool,
}

impl Pattern {
    pub fn new(template: impl Into<String>, trailing_slash: bool) -> Self {
        Self {
            template: template.into(),
            trailing_slash,
            fragments: Vec::new(),
            has_wildcard: false,
            param_count: 0,
            compiled: false,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn has_wildcard(&self) -> bool {
        self.has_wildcard
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub(crate) fn set_trailing_slash(&mut self, allowed: bool) {
        self.trailing_slash = allowed;
    }

    pub(crate) fn prefix(&mut self, prefix: &str) {
        self.template = format!("{prefix}{}", self.template);
    }

    /// Compile the template into fragments.
    ///
    /// Templates without a `:` stay uncompiled and match by string comparison.
    /// Calling this again after a successful compilation does nothing.
    pub fn compile(&mut self) -> Result<()> {
        if self.compiled {
            return Ok(());
        }
        if !self.template.starts_with('/') {
            return Err(self.invalid("pattern must start with '/'"));
        }

        if self.template.contains(':') {
            let mut fragments = Vec::new();
            let mut param_count = 0;
            let mut has_wildcard = false;

            for segment in self.template.split('/').skip(1) {
                let is_parameter = segment.contains(':');
                let is_wildcard = segment.contains('*');
                if is_wildcard && !is_parameter {
                    return Err(self.invalid(format!("wildcard outside a parameter in '{segment}'")));
                }

                let key: String = segment.chars().filter(|c| *c != ':' && *c != '*').collect();
                if is_parameter {
                    if key.is_empty() {
                        return Err(self.invalid("parameter without a name"));
                    }
                    if fragments.iter().any(|f: &Fragment| f.is_parameter && f.key == key) {
                        return Err(self.invalid(format!("parameter '{key}' declared twice")));
                    }
                    param_count += 1;
                }
                has_wildcard |= is_wildcard;

                fragments.push(Fragment {
                    is_parameter,
                    is_wildcard,
                    key,
                });
            }

            self.fragments = fragments;
            self.param_count = param_count;
            self.has_wildcard = has_wildcard;
        }

        self.compiled = true;
        Ok(())
    }

    /// Match `path` and return the captured parameters.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::with_capacity(self.param_count);
        self.match_into(path, &mut params).then_some(params)
    }

    /// Match `path`, writing captures into `params` (cleared first).
    pub fn match_into(&self, path: &str, params: &mut HashMap<String, String>) -> bool {
        params.clear();

        if self.fragments.is_empty() {
            return path == self.template
                || (self.trailing_slash
                    && path.len() == self.template.len() + 1
                    && path.starts_with(self.template.as_str())
                    && path.ends_with('/'));
        }

        if !path.starts_with('/') || (!self.trailing_slash && path.ends_with('/')) {
            return false;
        }

        if !self.walk(path, params) {
            params.clear();
            return false;
        }
        true
    }

    fn walk(&self, path: &str, params: &mut HashMap<String, String>) -> bool {
        // byte range of the wildcard capture in progress
        let mut open: Option<(usize, usize)> = None;
        let mut fragment_idx = 0;
        let mut offset = 1;

        for segment in path[1..].split('/') {
            let start = offset;
            let end = start + segment.len();
            offset = end + 1;

            // trailing slash (or an empty segment) ends the walk
            if segment.is_empty() {
                break;
            }

            let Some(fragment) = self.fragments.get(fragment_idx) else {
                return false;
            };
            if !fragment.is_parameter && fragment.key != segment {
                return false;
            }

            if !fragment.is_wildcard {
                if fragment.is_parameter {
                    params.insert(fragment.key.clone(), segment.to_owned());
                }
                fragment_idx += 1;
                continue;
            }

            let capture_start = open.map_or(start, |(s, _)| s);
            open = Some((capture_start, end));

            // a wildcard holding at least one segment stops before the literal
            // that follows it; only literal successors are recognised
            if start == capture_start {
                continue;
            }
            let Some(next) = self.fragments.get(fragment_idx + 1) else {
                continue;
            };
            if !next.is_parameter && next.key == segment {
                let value = &path[capture_start..start - 1];
                params.insert(fragment.key.clone(), value.to_owned());
                open = None;
                fragment_idx += 2;
            }
        }

        if let (Some((start, end)), Some(fragment)) = (open, self.fragments.get(fragment_idx)) {
            params.insert(fragment.key.clone(), path[start..end].to_owned());
        }

        params.len() == self.param_count
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidPattern {
            pattern: self.template.clone(),
            reason: reason.into(),
        }
    }
}
