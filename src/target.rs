//! Normalization of operator-entered target and metadata strings.
//!
//! Operators paste addresses like `grpc://foo.internal:443` or
//! `https://api.example.com`. The backend wants the bare authority, and the
//! resolved value is spliced straight into URL paths, so every scheme
//! prefix is stripped before use.

const SCHEME_SEPARATOR: &str = "://";

/// Keep the segment between the first and second `://` in `raw`.
///
/// `grpc://host:1` gives `host:1`; a doubled prefix like `a://b://c` gives
/// `b`. Returns `raw` unchanged when it carries no scheme.
pub fn strip_scheme(raw: &str) -> &str {
    raw.split(SCHEME_SEPARATOR).nth(1).unwrap_or(raw)
}

/// Resolve a raw target field into the value used for requests.
///
/// An empty field (or one that is nothing but a scheme) keeps the
/// previously resolved target, which may itself be absent.
pub fn resolve_target(raw: &str, previous: Option<&str>) -> Option<String> {
    let stripped = strip_scheme(raw.trim()).trim();
    if stripped.is_empty() {
        return previous.map(str::to_string);
    }
    Some(stripped.to_string())
}

/// Resolve the metadata field. Unlike the target, empty input means "no
/// metadata" rather than "keep the previous value".
pub fn resolve_metadata(raw: &str) -> String {
    strip_scheme(raw.trim()).trim().to_string()
}

/// Percent-encode `value` with the `encodeURI` character set.
///
/// Reserved URI characters (`;,/?:@&=+$#`) pass through untouched, so JSON
/// metadata like `{"k":"v"}` keeps its colons and commas.
pub fn encode_uri(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' => encoded.push(c),
            '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' => encoded.push(c),
            ';' | ',' | '/' | '?' | ':' | '@' | '&' | '=' | '+' | '$' | '#' => encoded.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    encoded
}
