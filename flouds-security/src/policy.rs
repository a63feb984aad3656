//! Pattern matcher for CORS origins and trusted hosts
//!
//! Each pattern is one of:
//! - exact string: matches iff equal
//! - wildcard: `*` stands for any substring; `*.example.com` also matches
//!   the bare `example.com`
//! - regex: `re:` prefix, evaluated with full-match semantics
//!
//! Lists are compiled once per policy resolution and cached by callers.

use flouds_core::error::{GatewayError, Result};
use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Wildcard { regex: Regex, bare_suffix: Option<String> },
    Regex(Regex),
}

/// Compiled list of allow patterns
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    /// Compile a pattern list
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` when a `re:` pattern fails to
    /// compile. Invalid patterns in stored policies are configuration
    /// mistakes and must fail loudly rather than silently deny.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            if let Some(expr) = raw.strip_prefix("re:") {
                let regex = Regex::new(&format!("^(?:{expr})$")).map_err(|e| {
                    GatewayError::configuration(format!("invalid policy regex '{expr}': {e}"))
                })?;
                compiled.push(Pattern::Regex(regex));
            } else if raw.contains('*') {
                let escaped = regex::escape(raw).replace(r"\*", ".*");
                let regex = Regex::new(&format!("^{escaped}$"))
                    .map_err(|e| GatewayError::configuration(format!("invalid wildcard: {e}")))?;
                // `*.example.com` is understood to include the bare apex
                let bare_suffix = raw.strip_prefix("*.").map(String::from);
                compiled.push(Pattern::Wildcard { regex, bare_suffix });
            } else {
                compiled.push(Pattern::Exact(raw.to_string()));
            }
        }
        Ok(Self { patterns: compiled })
    }

    /// Compile, dropping invalid patterns with a warning instead of failing
    ///
    /// Used when the list comes from tenant-writable configuration, where a
    /// malformed entry must not take the policy down with it.
    #[must_use]
    pub fn compile_lossy(patterns: &[String]) -> Self {
        let mut kept = Vec::new();
        for raw in patterns {
            match Self::compile(std::slice::from_ref(raw)) {
                Ok(mut list) => kept.append(&mut list.patterns),
                Err(e) => warn!("Dropping invalid policy pattern '{raw}': {e}"),
            }
        }
        Self { patterns: kept }
    }

    /// Test a candidate value against the list
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern {
            Pattern::Exact(value) => value == candidate,
            Pattern::Wildcard { regex, bare_suffix } => {
                regex.is_match(candidate)
                    || bare_suffix.as_deref() == Some(candidate)
            }
            Pattern::Regex(regex) => regex.is_match(candidate),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
