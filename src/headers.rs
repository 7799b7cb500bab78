//! Header names used by the gateway and hop-by-hop filtering

use hyper::header::{HeaderMap, HeaderName, CONNECTION};

/// Header name for request ID
pub const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
/// Header carrying the machine-readable error code on gateway-generated errors
pub const X_PROXY_ERROR: &str = "x-proxy-error";

/// Headers that apply to a single connection and must not be relayed (RFC 9110 §7.6.1)
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Scheme the client used, as reported by the TLS terminator in front of the
/// gateway. That hop is trusted to set the header; anything other than
/// `https` is treated as `http`.
pub fn forwarded_proto(headers: &HeaderMap) -> &'static str {
    match headers.get(X_FORWARDED_PROTO).and_then(|v| v.to_str().ok()) {
        Some(v) if v.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    }
}

/// Check if a (lowercase) header name is hop-by-hop
fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Remove hop-by-hop headers, including any extra ones listed in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Collect Connection tokens before the header itself goes away
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    let fixed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in fixed {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};

    #[test]
    fn test_hop_by_hop_names() {
        assert!(is_hop_by_hop("connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(is_hop_by_hop("upgrade"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("host"));
        assert!(!is_hop_by_hop(X_FORWARDED_FOR));
    }

    #[test]
    fn test_forwarded_proto() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_proto(&headers), "http");
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("HTTPS"));
        assert_eq!(forwarded_proto(&headers), "https");
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("gopher"));
        assert_eq!(forwarded_proto(&headers), "http");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("skia-perf-10110-proxy.skia.org"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic abc"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.contains_key(HOST));
        assert!(headers.contains_key(CONTENT_TYPE));
        assert!(!headers.contains_key("keep-alive"));
        assert!(!headers.contains_key("transfer-encoding"));
        assert!(!headers.contains_key("proxy-authorization"));
    }

    #[test]
    fn test_strip_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close, X-Session-Hint"));
        headers.insert("x-session-hint", HeaderValue::from_static("1"));
        headers.insert("x-other", HeaderValue::from_static("2"));

        strip_hop_by_hop(&mut headers);

        assert!(!headers.contains_key(CONNECTION));
        assert!(!headers.contains_key("x-session-hint"));
        assert!(headers.contains_key("x-other"));
    }
}
