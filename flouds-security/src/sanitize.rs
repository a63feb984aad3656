//! Outbound message redaction
//!
//! Applied to every error `details` string and every log line containing
//! externally-derived text. Redacts credential assignments, connection URIs,
//! IPv4 literals, and email-shaped tokens; control characters are folded to
//! spaces so responses and logs cannot be forged with embedded line breaks.

use regex::Regex;
use std::sync::OnceLock;

const REDACTED: &str = "[REDACTED]";

fn uri_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:mongodb(?:\+srv)?|postgresql|postgres|mysql|milvus)://\S+")
            .expect("valid uri regex")
    })
}

fn credential_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:password|passwd|pwd|token|key|secret|auth)\b[=:\s]+[^\s"']+"#)
            .expect("valid credential regex")
    })
}

fn ipv4_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("valid ipv4 regex"))
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
            .expect("valid email regex")
    })
}

/// Strip control characters; CR, LF and tab become single spaces
fn strip_control(input: &str) -> String {
    input
        .chars()
        .filter_map(|c| {
            if c == '\r' || c == '\n' || c == '\t' {
                Some(' ')
            } else if c.is_control() {
                None
            } else {
                Some(c)
            }
        })
        .collect()
}

/// Redact secrets, addresses and URIs from an externally-derived string
///
/// Connection URIs are redacted before the narrower patterns so that a URI
/// with embedded credentials disappears as one token.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let cleaned = strip_control(input);
    let cleaned = uri_pattern().replace_all(&cleaned, REDACTED);
    let cleaned = credential_pattern().replace_all(&cleaned, REDACTED);
    let cleaned = ipv4_pattern().replace_all(&cleaned, REDACTED);
    let cleaned = email_pattern().replace_all(&cleaned, REDACTED);
    cleaned.into_owned()
}
