//! Session cookie encoding and strict `Cookie` header parsing.
//!
//! Parsing follows RFC 6265: a pair whose name is not a valid token or whose
//! value contains an illegal octet is discarded rather than repaired. Every
//! cookie written by this process is encoded from the one `SessionConfig`, so
//! an encoded cookie re-read from a `Cookie` header always yields the original
//! session id.

use axum::http::{HeaderMap, HeaderValue};

use crate::config::SessionConfig;

// token chars per RFC 2616, referenced by RFC 6265 for cookie-name
fn is_token_char(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

// cookie-octet per RFC 6265: %x21 / %x23-2B / %x2D-3A / %x3C-5B / %x5D-7E
fn is_cookie_octet(b: u8) -> bool {
    matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}

fn valid_pair(name: &str, value: &str) -> bool {
    valid_cookie_name(name) && value.bytes().all(is_cookie_octet)
}

/// A configured cookie name must be an RFC 6265 token; anything else would
/// produce a `Set-Cookie` value that panics at encode time.
pub(crate) fn valid_cookie_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_char)
}

/// A configured cookie path must be made of av-octets (printable ASCII
/// excluding `;`).
pub(crate) fn valid_cookie_path(path: &str) -> bool {
    !path.is_empty() && path.bytes().all(|b| matches!(b, 0x20..=0x3A | 0x3C..=0x7E))
}

/// Extract the value of the cookie named `name` from the request's `Cookie`
/// header(s). Invalid pairs are discarded; the first valid match wins.
pub fn request_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(axum::http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for part in raw.split(';') {
            let part = part.trim();
            let Some((k, v)) = part.split_once('=') else { continue };
            // An optionally DQUOTE-wrapped value is allowed by the grammar.
            let v = v.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(v);
            if k == name && valid_pair(k, v) {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn encode(config: &SessionConfig, value: &str, max_age: Option<u64>) -> String {
    let mut cookie = format!("{}={}", config.cookie_name, value);
    cookie.push_str(&format!("; Path={}", config.cookie_path));
    if let Some(age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", age));
    }
    cookie.push_str(&format!("; SameSite={}", config.same_site.as_str()));
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    if config.cookie_http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie
}

/// `Set-Cookie` value carrying a session id, with the configured path/flags.
pub fn session_cookie_header(config: &SessionConfig, session_id: &str) -> HeaderValue {
    HeaderValue::from_str(&encode(config, session_id, None)).unwrap()
}

/// `Set-Cookie` value that expires the session cookie client-side
/// (`Max-Age=0`), re-encoded with the same configured path/flags.
pub fn clear_cookie_header(config: &SessionConfig, session_id: &str) -> HeaderValue {
    HeaderValue::from_str(&encode(config, session_id, Some(0))).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;
    use axum::http::header::COOKIE;

    fn headers_with_cookie(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(raw).unwrap());
        headers
    }

    #[test]
    fn finds_named_cookie_among_pairs() {
        let headers = headers_with_cookie("a=1; blog.session=abc123; b=2");
        assert_eq!(request_cookie(&headers, "blog.session").as_deref(), Some("abc123"));
        assert_eq!(request_cookie(&headers, "missing"), None);
    }

    #[test]
    fn discards_invalid_pairs() {
        // embedded whitespace in the value is not a cookie-octet
        let headers = headers_with_cookie("blog.session=ab cd; other=ok");
        assert_eq!(request_cookie(&headers, "blog.session"), None);
        assert_eq!(request_cookie(&headers, "other").as_deref(), Some("ok"));
        // a name with an illegal char never matches
        let headers = headers_with_cookie("blog,session=abc");
        assert_eq!(request_cookie(&headers, "blog,session"), None);
    }

    #[test]
    fn configured_name_and_path_validation() {
        assert!(valid_cookie_name("blog.session"));
        assert!(!valid_cookie_name("blog session"));
        assert!(!valid_cookie_name("blog;session"));
        assert!(!valid_cookie_name(""));

        assert!(valid_cookie_path("/"));
        assert!(valid_cookie_path("/api/v1"));
        assert!(!valid_cookie_path("/api;v=1"));
        assert!(!valid_cookie_path("/line\nbreak"));
        assert!(!valid_cookie_path(""));
    }

    #[test]
    fn accepts_quoted_values() {
        let headers = headers_with_cookie("blog.session=\"abc123\"");
        assert_eq!(request_cookie(&headers, "blog.session").as_deref(), Some("abc123"));
    }

    #[test]
    fn encoded_cookie_round_trips_through_cookie_header() {
        let config = SessionConfig {
            cookie_name: "blog.session".into(),
            cookie_path: "/api".into(),
            cookie_secure: true,
            cookie_http_only: true,
            same_site: SameSite::Lax,
            ..SessionConfig::default()
        };
        let set_cookie = session_cookie_header(&config, "s3ssion-1d_0123456789");
        let encoded = set_cookie.to_str().unwrap();
        assert!(encoded.starts_with("blog.session=s3ssion-1d_0123456789; Path=/api"));
        assert!(encoded.contains("SameSite=Lax"));
        assert!(encoded.contains("Secure"));
        assert!(encoded.contains("HttpOnly"));

        // a client echoes only the name=value pair back
        let pair = encoded.split(';').next().unwrap();
        let headers = headers_with_cookie(pair);
        assert_eq!(
            request_cookie(&headers, "blog.session").as_deref(),
            Some("s3ssion-1d_0123456789")
        );
    }

    #[test]
    fn clear_cookie_sets_max_age_zero_with_same_flags() {
        let config = SessionConfig::default();
        let cleared = clear_cookie_header(&config, "abc123");
        let encoded = cleared.to_str().unwrap();
        assert!(encoded.starts_with("blog.session=abc123; Path=/"));
        assert!(encoded.contains("Max-Age=0"));
        assert!(encoded.contains("SameSite=Strict"));
    }
}
