//! Request target decoding and path normalization.

use crate::protocol::ParseError;

/// Characters that may appear in a request target (RFC 3986 reserved and unreserved plus `%`).
const URI_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~:/?#[]@!$&'()*+,;=%";

/// Returns true if every byte of `s` is a legal URI character.
pub fn valid_uri_chars(s: &str) -> bool {
    s.bytes().all(|b| URI_CHARS.contains(&b))
}

/// Returns true if `host` is a plausible `Host` header value: a name, IPv4 or bracketed IPv6
/// address with an optional port.
pub fn valid_host(host: &str) -> bool {
    !host.is_empty() && host.bytes().all(|b| b.is_ascii_alphanumeric() || b"-._:[]".contains(&b))
}

/// The parts of a request target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    /// Decoded and normalized path.
    pub path: String,
    /// Raw query string without the `?`.
    pub query: String,
    /// Lower-cased extension of the last path segment, without the dot.
    pub ext: Option<String>,
}

/// Splits, decodes and normalizes a request target.
pub fn parse_target(url: &str) -> Result<Target, ParseError> {
    if url.is_empty() {
        return Err(ParseError::InvalidUri);
    }
    if !valid_uri_chars(url) {
        return Err(ParseError::bad_path("illegal character in uri"));
    }
    let url = url.split_once('#').map_or(url, |(before, _)| before);
    let (raw_path, query) = url.split_once('?').unwrap_or((url, ""));

    // absolute-form targets carry scheme and authority in front of the path
    let raw_path = match raw_path.find("://") {
        Some(pos) => {
            let rest = &raw_path[pos + 3..];
            rest.find('/').map_or("/", |slash| &rest[slash..])
        }
        None => raw_path,
    };

    let decoded = urlencoding::decode(raw_path).map_err(|_| ParseError::bad_path("invalid percent encoding"))?;
    let path = normalize_path(&decoded)?;
    let ext = extension(&path).map(str::to_ascii_lowercase);
    Ok(Target { path, query: query.to_owned(), ext })
}

/// Removes `.` and `..` segments and collapses repeated separators.
///
/// The path must start with `/` and must not contain a backslash, before and after normalization.
/// A `..` that would climb above the root is rejected.
pub fn normalize_path(path: &str) -> Result<String, ParseError> {
    if !path.starts_with('/') {
        return Err(ParseError::bad_path("path does not start with /"));
    }
    if path.contains('\\') {
        return Err(ParseError::bad_path("path contains a backslash"));
    }
    if path.contains('\0') {
        return Err(ParseError::bad_path("path contains a nul byte"));
    }

    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = false;
    for segment in path.split('/') {
        trailing_slash = false;
        match segment {
            "" => trailing_slash = true,
            "." => trailing_slash = true,
            ".." => {
                if segments.pop().is_none() {
                    return Err(ParseError::bad_path("path climbs above the root"));
                }
                trailing_slash = true;
            }
            s => segments.push(s),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() || trailing_slash {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Extension of the last path segment, without the dot.
pub fn extension(path: &str) -> Option<&str> {
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

/// Splits an `application/x-www-form-urlencoded` string into decoded name/value pairs.
///
/// `+` stands for a space. Pairs without `=` get an empty value; empty names are skipped and
/// undecodable escapes are kept verbatim.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name = decode_component(name);
            (!name.is_empty()).then(|| (name, decode_component(value)))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s,
    }
}

/// Escapes text for inclusion in an HTML body.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
