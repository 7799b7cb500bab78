//! Hostname pattern matching
//!
//! Backends are addressed purely by the structure of the requested hostname:
//!
//! ```text
//! <service>-<port>-proxy.<routing-domain>
//! ```
//!
//! so `skia-perf-10110-proxy.skia.org` routes to `http://skia-perf:10110`.
//! The whole host has to match; a host that merely contains the pattern
//! (`evil.com-skia-80-proxy.skia.org`, `skia-80-proxy.skia.org.attacker.net`)
//! is rejected.

use hyper::header::{HeaderMap, HOST};
use hyper::Uri;
use std::fmt;
use thiserror::Error;

/// Marker between the backend part and the routing domain
const PROXY_MARKER: &str = "-proxy.";

/// Maximum hostname length per DNS specification
const MAX_HOSTNAME_LEN: usize = 253;

/// Backend derived from a hostname
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddress {
    pub service: String,
    pub port: u16,
}

impl BackendAddress {
    pub fn new(service: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            port,
        }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.port)
    }
}

/// Reasons a hostname does not name a backend
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("host is not under the routing domain")]
    WrongDomain,
    #[error("host does not have the form <service>-<port>-proxy.<domain>")]
    Malformed,
    #[error("port {0} is out of range")]
    PortOutOfRange(String),
}

/// Invalid routing domain supplied at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostPatternError {
    #[error("routing domain is empty")]
    Empty,
    #[error("routing domain is longer than 253 characters")]
    TooLong,
    #[error("routing domain '{0}' has an empty label")]
    EmptyLabel(String),
    #[error("routing domain '{0}' contains characters outside [a-z0-9-.]")]
    InvalidCharacter(String),
}

/// Matches hostnames against `<service>-<port>-proxy.<routing-domain>`
#[derive(Debug, Clone)]
pub struct HostMatcher {
    /// `-proxy.<routing-domain>`, lowercase
    suffix: String,
    routing_domain: String,
}

impl HostMatcher {
    pub fn new(routing_domain: &str) -> Result<Self, HostPatternError> {
        let domain = routing_domain.trim().trim_start_matches('.').to_ascii_lowercase();

        if domain.is_empty() {
            return Err(HostPatternError::Empty);
        }
        if domain.len() > MAX_HOSTNAME_LEN {
            return Err(HostPatternError::TooLong);
        }
        if domain.split('.').any(str::is_empty) {
            return Err(HostPatternError::EmptyLabel(domain));
        }
        if !domain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(HostPatternError::InvalidCharacter(domain));
        }

        Ok(Self {
            suffix: format!("{}{}", PROXY_MARKER, domain),
            routing_domain: domain,
        })
    }

    pub fn routing_domain(&self) -> &str {
        &self.routing_domain
    }

    /// Parse a hostname into the backend it names.
    ///
    /// The port is taken from the digits after the right-most `-` before the
    /// marker, so a host yields at most one candidate address. This is the
    /// same split the anchored, greedy pattern
    /// `^([a-zA-Z0-9-]+)-([0-9]+)-proxy\.<domain>$` produces.
    pub fn match_host(&self, host: &str) -> Result<BackendAddress, MatchError> {
        let host = host.to_ascii_lowercase();
        let prefix = host
            .strip_suffix(self.suffix.as_str())
            .ok_or(MatchError::WrongDomain)?;

        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(MatchError::Malformed);
        }

        let (service, port) = prefix.rsplit_once('-').ok_or(MatchError::Malformed)?;
        if service.is_empty() || port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(MatchError::Malformed);
        }

        let port: u16 = port
            .parse()
            .map_err(|_| MatchError::PortOutOfRange(port.to_string()))?;

        Ok(BackendAddress::new(service, port))
    }
}

/// Read the hostname from the Host header (or the URI authority for HTTP/2),
/// without port, lowercased.
///
/// Returns `None` for missing, oversized or oddly-charactered values so
/// they never reach logs or the matcher.
pub fn extract_hostname(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .and_then(|h| {
            let hostname = h.split(':').next()?;

            if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
                return None;
            }

            if !hostname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return None;
            }

            Some(hostname.to_ascii_lowercase())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn matcher() -> HostMatcher {
        HostMatcher::new("skia.org").unwrap()
    }

    #[test]
    fn test_matches_service_and_port() {
        let addr = matcher().match_host("skia-perf-10110-proxy.skia.org").unwrap();
        assert_eq!(addr, BackendAddress::new("skia-perf", 10110));
        assert_eq!(addr.to_string(), "skia-perf:10110");
    }

    #[test]
    fn test_synthetic_hosts_round_trip() {
        let m = matcher();
        let cases = [
            ("a", 1u16),
            ("web", 80),
            ("skia-perf", 10110),
            ("x-1-y", 65535),
            ("9lives", 8000),
            ("a--b", 443),
        ];
        for (service, port) in cases {
            let host = format!("{}-{}-proxy.skia.org", service, port);
            assert_eq!(
                m.match_host(&host),
                Ok(BackendAddress::new(service, port)),
                "host {}",
                host
            );
        }
    }

    #[test]
    fn test_numeric_segments_in_service_name() {
        // The right-most numeric segment is the port
        let addr = matcher().match_host("app-1-2-proxy.skia.org").unwrap();
        assert_eq!(addr, BackendAddress::new("app-1", 2));
    }

    #[test]
    fn test_case_insensitive() {
        let addr = matcher().match_host("Skia-Perf-80-PROXY.Skia.Org").unwrap();
        assert_eq!(addr, BackendAddress::new("skia-perf", 80));
    }

    #[test]
    fn test_rejects_substring_matches() {
        let m = matcher();
        assert_eq!(
            m.match_host("evilskia-proxy-80-proxy.skia.org.attacker.net"),
            Err(MatchError::WrongDomain)
        );
        assert_eq!(
            m.match_host("evil.com-skia-80-proxy.skia.org"),
            Err(MatchError::Malformed)
        );
        assert_eq!(
            m.match_host("skia-80-proxy.notskia.org"),
            Err(MatchError::WrongDomain)
        );
        assert_eq!(
            m.match_host("skia-80-proxy.skia.org.evil"),
            Err(MatchError::WrongDomain)
        );
    }

    #[test]
    fn test_rejects_malformed_hosts() {
        let m = matcher();
        for host in [
            "skia.org",
            "-proxy.skia.org",
            "80-proxy.skia.org",
            "skia-proxy.skia.org",
            "-80-proxy.skia.org",
            "skia--proxy.skia.org",
            "skia-80a-proxy.skia.org",
            "skia_perf-80-proxy.skia.org",
            "skia-80-proxy.",
            "",
        ] {
            assert!(m.match_host(host).is_err(), "host {:?} should not match", host);
        }
    }

    #[test]
    fn test_port_out_of_range() {
        assert_eq!(
            matcher().match_host("skia-70000-proxy.skia.org"),
            Err(MatchError::PortOutOfRange("70000".to_string()))
        );
    }

    #[test]
    fn test_port_zero_is_parsed() {
        // Rejected later as a bad target
        let addr = matcher().match_host("skia-0-proxy.skia.org").unwrap();
        assert_eq!(addr.port, 0);
    }

    #[test]
    fn test_routing_domain_validation() {
        assert_eq!(HostMatcher::new("").unwrap_err(), HostPatternError::Empty);
        assert!(matches!(HostMatcher::new("skia..org"), Err(HostPatternError::EmptyLabel(_))));
        assert!(matches!(HostMatcher::new("skia.org."), Err(HostPatternError::EmptyLabel(_))));
        assert!(matches!(HostMatcher::new("sk*a.org"), Err(HostPatternError::InvalidCharacter(_))));
        assert!(matches!(HostMatcher::new(&"a".repeat(300)), Err(HostPatternError::TooLong)));

        let m = HostMatcher::new(".Skia.ORG").unwrap();
        assert_eq!(m.routing_domain(), "skia.org");
    }

    #[test]
    fn test_extract_hostname() {
        let uri = Uri::from_static("/");
        let mut headers = HeaderMap::new();
        assert_eq!(extract_hostname(&headers, &uri), None);

        headers.insert(HOST, HeaderValue::from_static("Skia-80-Proxy.skia.org:8443"));
        assert_eq!(extract_hostname(&headers, &uri), Some("skia-80-proxy.skia.org".to_string()));

        headers.insert(HOST, HeaderValue::from_static("bad host"));
        assert_eq!(extract_hostname(&headers, &uri), None);

        headers.insert(HOST, HeaderValue::from_static(":80"));
        assert_eq!(extract_hostname(&headers, &uri), None);
    }

    #[test]
    fn test_extract_hostname_from_authority() {
        let uri = Uri::from_static("http://web-80-proxy.skia.org:8000/path");
        assert_eq!(
            extract_hostname(&HeaderMap::new(), &uri),
            Some("web-80-proxy.skia.org".to_string())
        );
    }
}
