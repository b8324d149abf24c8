//! Pattern syntax validation
//!
//! Rules are validated once, when they are added or updated. Evaluation trusts
//! the stored rule set and never re-validates.

use crate::error::PatternError;
use crate::matcher::{compile_glob, compile_regex, resolve_kind};
use crate::types::MatchKind;
use crate::url::{get_scheme_end, is_valid_url};

/// Validate `pattern` for `kind`, honoring the inline `@` / `!` overrides.
pub fn validate_pattern(pattern: &str, kind: MatchKind) -> Result<(), PatternError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(PatternError::Empty);
    }

    let (kind, body) = resolve_kind(trimmed, kind);
    if body.is_empty() {
        return Err(PatternError::Empty);
    }

    match kind {
        MatchKind::Exact => {
            if is_valid_url(body) {
                Ok(())
            } else {
                Err(PatternError::InvalidUrl(body.to_string()))
            }
        }
        MatchKind::Domain => validate_domain(body),
        MatchKind::Glob => {
            if body.chars().all(|c| c == '*' || c == '?') {
                return Err(PatternError::InvalidGlob(body.to_string()));
            }
            compile_glob(body)
                .map(|_| ())
                .map_err(|_| PatternError::InvalidGlob(body.to_string()))
        }
        MatchKind::Regex => compile_regex(body)
            .map(|_| ())
            .map_err(|e| PatternError::InvalidRegex {
                pattern: body.to_string(),
                reason: e.to_string(),
            }),
    }
}

fn validate_domain(pattern: &str) -> Result<(), PatternError> {
    let invalid = || PatternError::InvalidDomain(pattern.to_string());

    let mut rest = pattern;
    if let Some(end) = get_scheme_end(rest) {
        rest = &rest[end..];
    }

    let host_part = match rest.find('/') {
        Some(slash) => &rest[..slash],
        None => rest,
    };

    let (host, port) = match host_part.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_part, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
    }

    let host = host.trim_end_matches('.');
    let base = host.strip_prefix("*.").unwrap_or(host);
    if base.is_empty() || base.starts_with('.') || base.contains("..") {
        return Err(invalid());
    }

    if !base
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    {
        return Err(invalid());
    }

    Ok(())
}
