//! URL Pattern Matcher
//!
//! Every candidate rule of every navigation goes through here. A URL is parsed
//! at most once per evaluation and Glob/Regex patterns are compiled once and
//! memoized. Matching never fails: anything that cannot be parsed or
//! compiled is simply "no match".

use std::borrow::Cow;
use std::cell::OnceCell;
use std::collections::HashMap;

use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use url::Host;

use crate::types::MatchKind;
use crate::url::{get_scheme_end, normalize, Location};

/// Prefix forcing Regex semantics on a non-Domain pattern.
pub const REGEX_PREFIX: char = '@';
/// Prefix forcing Glob semantics on a non-Domain pattern.
pub const GLOB_PREFIX: char = '!';

const DEFAULT_COMPILED_CAPACITY: usize = 1024;

// =============================================================================
// Kind Resolution
// =============================================================================

/// Apply the inline `@` / `!` overrides.
///
/// Domain patterns have the prefix stripped but keep Domain semantics.
#[inline]
pub fn resolve_kind(pattern: &str, kind: MatchKind) -> (MatchKind, &str) {
    if kind == MatchKind::Domain {
        let stripped = pattern
            .strip_prefix(REGEX_PREFIX)
            .or_else(|| pattern.strip_prefix(GLOB_PREFIX))
            .unwrap_or(pattern);
        return (MatchKind::Domain, stripped);
    }

    if let Some(rest) = pattern.strip_prefix(REGEX_PREFIX) {
        (MatchKind::Regex, rest)
    } else if let Some(rest) = pattern.strip_prefix(GLOB_PREFIX) {
        (MatchKind::Glob, rest)
    } else {
        (kind, pattern)
    }
}

// =============================================================================
// Match Target
// =============================================================================

/// A URL being tested against many patterns. The WHATWG parse happens on the
/// first Domain test and is reused for the rest.
pub struct MatchTarget<'a> {
    url: &'a str,
    location: OnceCell<Option<Location>>,
}

impl<'a> MatchTarget<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            location: OnceCell::new(),
        }
    }

    pub fn url(&self) -> &'a str {
        self.url
    }

    pub fn location(&self) -> Option<&Location> {
        self.location
            .get_or_init(|| Location::parse(self.url))
            .as_ref()
    }
}

// =============================================================================
// Matcher
// =============================================================================

#[derive(Default)]
struct CompiledPatterns {
    globs: HashMap<String, Option<Regex>>,
    regexes: HashMap<String, Option<Regex>>,
}

impl CompiledPatterns {
    fn len(&self) -> usize {
        self.globs.len() + self.regexes.len()
    }
}

/// Pattern matcher with a bounded memo of compiled Glob/Regex patterns.
///
/// Results are identical to [`matches`]; the memo only saves recompilation.
pub struct UrlMatcher {
    compiled: Mutex<CompiledPatterns>,
    capacity: usize,
}

impl Default for UrlMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlMatcher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_COMPILED_CAPACITY)
    }

    /// Create a matcher remembering at most `capacity` compiled patterns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            compiled: Mutex::new(CompiledPatterns::default()),
            capacity,
        }
    }

    /// Test `url` against `pattern` interpreted as `kind`.
    pub fn matches(&self, url: &str, pattern: &str, kind: MatchKind) -> bool {
        self.matches_target(&MatchTarget::new(url), pattern, kind)
    }

    /// Like [`UrlMatcher::matches`], reusing the target's parse.
    pub fn matches_target(&self, target: &MatchTarget<'_>, pattern: &str, kind: MatchKind) -> bool {
        let (kind, pattern) = resolve_kind(pattern, kind);
        match kind {
            MatchKind::Exact => match_exact(target.url(), pattern),
            MatchKind::Domain => target
                .location()
                .is_some_and(|location| match_location(location, pattern)),
            MatchKind::Glob | MatchKind::Regex => self
                .compiled(kind, pattern)
                .is_some_and(|re| re.is_match(target.url())),
        }
    }

    /// Number of memoized patterns, including ones that failed to compile.
    pub fn compiled_len(&self) -> usize {
        self.compiled.lock().len()
    }

    fn compiled(&self, kind: MatchKind, pattern: &str) -> Option<Regex> {
        let mut compiled = self.compiled.lock();

        let table = if kind == MatchKind::Glob {
            &compiled.globs
        } else {
            &compiled.regexes
        };
        if let Some(entry) = table.get(pattern) {
            return entry.clone();
        }

        if compiled.len() >= self.capacity {
            compiled.globs.clear();
            compiled.regexes.clear();
        }

        let entry = compile_logged(kind, pattern);
        if self.capacity > 0 {
            let table = if kind == MatchKind::Glob {
                &mut compiled.globs
            } else {
                &mut compiled.regexes
            };
            table.insert(pattern.to_string(), entry.clone());
        }
        entry
    }
}

/// Test `url` against `pattern` without memoization.
pub fn matches(url: &str, pattern: &str, kind: MatchKind) -> bool {
    let (kind, pattern) = resolve_kind(pattern, kind);
    match kind {
        MatchKind::Exact => match_exact(url, pattern),
        MatchKind::Domain => match_domain(url, pattern),
        MatchKind::Glob | MatchKind::Regex => {
            compile_logged(kind, pattern).is_some_and(|re| re.is_match(url))
        }
    }
}

fn compile_logged(kind: MatchKind, pattern: &str) -> Option<Regex> {
    let compiled = if kind == MatchKind::Glob {
        compile_glob(pattern)
    } else {
        compile_regex(pattern)
    };
    match compiled {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("Ignoring invalid {kind} pattern '{pattern}': {e}");
            None
        }
    }
}

// =============================================================================
// Exact
// =============================================================================

/// Normalized equality.
pub fn match_exact(url: &str, pattern: &str) -> bool {
    normalize(url) == normalize(pattern)
}

// =============================================================================
// Domain
// =============================================================================

/// Match `[*.]host[/path]` against a URL.
///
/// `h` and `*.h` both match `h` itself and every subdomain of `h`. The host
/// must end on a label boundary, so `*.heroku.com` never matches
/// `fakeheroku.com` or `heroku.com.evil.com`. URLs that do not parse never
/// match.
pub fn match_domain(url: &str, pattern: &str) -> bool {
    Location::parse(url).is_some_and(|location| match_location(&location, pattern))
}

fn match_location(location: &Location, pattern: &str) -> bool {
    let mut rest = pattern.trim();
    if let Some(end) = get_scheme_end(rest) {
        rest = &rest[end..];
    }

    let (host_part, path_part) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, ""),
    };

    // Port on the pattern is not significant
    let host_part = host_part.split(':').next().unwrap_or_default();
    let host_part = host_part.trim_end_matches('.');
    let base = host_part.strip_prefix("*.").unwrap_or(host_part);
    if base.is_empty() {
        return false;
    }

    // Parsed hosts are punycode
    let base: Cow<'_, str> = if base.is_ascii() {
        Cow::Borrowed(base)
    } else {
        match Host::parse(base) {
            Ok(host) => Cow::Owned(host.to_string()),
            Err(_) => return false,
        }
    };

    host_matches(&location.host, &base) && path_matches(&location.path, path_part)
}

#[inline]
fn host_matches(host: &str, base: &str) -> bool {
    let host = host.as_bytes();
    let base = base.as_bytes();

    if host.len() == base.len() {
        return host.eq_ignore_ascii_case(base);
    }
    if host.len() < base.len() {
        return false;
    }

    let split = host.len() - base.len();
    host[split - 1] == b'.' && host[split..].eq_ignore_ascii_case(base)
}

#[inline]
fn path_matches(url_path: &str, pattern_path: &str) -> bool {
    let pattern_path = pattern_path.split(['?', '#']).next().unwrap_or_default();
    let wanted = pattern_path.trim_end_matches('*').trim_end_matches('/');
    if wanted.is_empty() {
        return true;
    }

    url_path.trim_end_matches('/').starts_with(wanted)
}

// =============================================================================
// Glob / Regex
// =============================================================================

/// Translate a glob into an anchored regex source.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    let mut buf = [0u8; 4];
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}

/// Compile a glob into a case-insensitive, fully anchored regex.
pub fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&glob_to_regex(pattern))
        .case_insensitive(true)
        .build()
}

/// Compile a user regex case-insensitively.
pub fn compile_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
