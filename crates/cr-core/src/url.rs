//! URL utilities
//!
//! Scheme checks are slice-based and run on every host event. Anything that
//! reads the host goes through the WHATWG parser of the `url` crate.

use url::Url;

// =============================================================================
// Scheme Extraction
// =============================================================================

/// URL schemes the router distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    Other,
}

/// Fast scheme extraction without URL parsing.
/// Returns `None` when the string has no scheme at all.
#[inline]
pub fn extract_scheme(url: &str) -> Option<Scheme> {
    let bytes = url.as_bytes();
    if bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://") {
        return Some(Scheme::Https);
    }
    if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://") {
        return Some(Scheme::Http);
    }

    let colon = url.find(':')?;
    let candidate = &url[..colon];
    if !candidate.is_empty()
        && candidate.as_bytes()[0].is_ascii_alphabetic()
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
    {
        Some(Scheme::Other)
    } else {
        None
    }
}

/// True for http/https URLs, the only ones navigation routing applies to.
/// Internal pages, extension pages, file/data/javascript URIs are never routed.
#[inline]
pub fn is_web_url(url: &str) -> bool {
    matches!(extract_scheme(url.trim_start()), Some(Scheme::Http | Scheme::Https))
}

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    None
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Host and path of a URL as the WHATWG parser reads them.
///
/// Domain rules match against this rather than a byte scan, so userinfo,
/// backslashes and percent-encoding resolve to the same host the browser
/// will actually contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Lowercased, without a trailing dot. IPv6 literals keep their brackets.
    pub host: String,
    pub path: String,
}

impl Location {
    /// `None` when `url` does not parse or has no host.
    pub fn parse(url: &str) -> Option<Self> {
        let parsed = Url::parse(url.trim()).ok()?;
        let host = parsed.host_str()?.trim_end_matches('.');
        if host.is_empty() {
            return None;
        }

        let path = match parsed.path() {
            "" => "/",
            path => path,
        };
        Some(Self {
            host: host.to_ascii_lowercase(),
            path: path.to_string(),
        })
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize a URL for exact comparison.
///
/// Default ports are dropped and scheme/host are lowercased by the WHATWG
/// parser. A bare root path collapses to no trailing slash unless the URL
/// carries a non-default port. Unparseable input comes back trimmed.
pub fn normalize(url: &str) -> String {
    let trimmed = url.trim();
    let parsed = match Url::parse(trimmed) {
        Ok(parsed) => parsed,
        Err(_) => return trimmed.to_string(),
    };

    let mut out = parsed.to_string();
    let bare_root = parsed.path() == "/" && parsed.query().is_none() && parsed.fragment().is_none();
    if bare_root && parsed.port().is_none() && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Lowercased hostname of a URL, or an empty string when there is none.
pub fn extract_domain(url: &str) -> String {
    Location::parse(url).map(|location| location.host).unwrap_or_default()
}

/// True when `url` parses as an absolute URL with a host.
pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url.trim()) {
        Ok(parsed) => parsed.host_str().is_some_and(|host| !host.is_empty()),
        Err(_) => false,
    }
}

// =============================================================================
// Query Parameter Handling
// =============================================================================

/// Remove every occurrence of query parameter `name` from a URL.
///
/// Returns the URL without the parameter and the value of its first
/// occurrence. The URL is returned unchanged when the parameter is absent.
pub fn take_query_param(url: &str, name: &str) -> (String, Option<String>) {
    let q_pos = match url.find('?') {
        Some(pos) => pos,
        None => return (url.to_string(), None),
    };

    let (query_part, fragment) = match url[q_pos + 1..].find('#') {
        Some(hash_pos) => {
            let abs_hash = q_pos + 1 + hash_pos;
            (&url[q_pos + 1..abs_hash], &url[abs_hash..])
        }
        None => (&url[q_pos + 1..], ""),
    };

    let mut kept = Vec::new();
    let mut value = None;
    let mut changed = false;

    for pair in query_part.split('&') {
        let (key, val) = match pair.find('=') {
            Some(eq_pos) => (&pair[..eq_pos], &pair[eq_pos + 1..]),
            None => (pair, ""),
        };

        if key == name {
            changed = true;
            if value.is_none() && !val.is_empty() {
                value = Some(val.to_string());
            }
        } else if !pair.is_empty() {
            kept.push(pair);
        }
    }

    if !changed {
        return (url.to_string(), None);
    }

    let base = &url[..q_pos];
    let mut out = String::with_capacity(url.len());
    out.push_str(base);
    if !kept.is_empty() {
        out.push('?');
        out.push_str(&kept.join("&"));
    }
    out.push_str(fragment);

    (out, value)
}
