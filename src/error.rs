//! Error handling and JSON error responses for the gateway

use crate::headers::X_PROXY_ERROR;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Body type shared by forwarded and gateway-generated responses
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Error codes for gateway-generated responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyErrorCode {
    /// Authenticated caller whose account is not permitted
    AuthDenied,
    /// Host does not name a backend, or names an invalid one
    RouteNotFound,
    /// Backend could not be reached
    UpstreamUnavailable,
    /// Backend did not answer within the configured timeout
    RequestTimeout,
}

impl ProxyErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyErrorCode::AuthDenied => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyErrorCode::RouteNotFound => StatusCode::NOT_FOUND,
            ProxyErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ProxyErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ProxyErrorCode::AuthDenied => "AUTH_DENIED",
            ProxyErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            ProxyErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ProxyErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: ProxyErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ProxyErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Proxy-Error header
pub fn json_error_response(code: ProxyErrorCode, message: impl Into<String>) -> Response<ProxyBody> {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    Response::builder()
        .status(code.status_code())
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header(X_PROXY_ERROR, code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// 303 See Other to the login page
pub fn login_redirect_response(location: &str) -> Response<ProxyBody> {
    match Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(hyper::header::LOCATION, location)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
    {
        Ok(response) => response,
        // Only reachable if the login URL produced an invalid header value
        Err(_) => json_error_response(ProxyErrorCode::AuthDenied, "login redirect unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(ProxyErrorCode::AuthDenied.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ProxyErrorCode::RouteNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ProxyErrorCode::UpstreamUnavailable.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyErrorCode::RequestTimeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_error_response_json() {
        let error = ErrorResponse::new(ProxyErrorCode::AuthDenied, "account not permitted");
        let json = error.to_json();

        assert!(json.contains("\"code\":\"AUTH_DENIED\""));
        assert!(json.contains("\"message\":\"account not permitted\""));
        assert!(json.contains("\"status\":500"));
    }

    #[test]
    fn test_json_error_response() {
        let response = json_error_response(ProxyErrorCode::RouteNotFound, "Not found");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("Content-Type").unwrap(), "application/json");
        assert_eq!(response.headers().get(X_PROXY_ERROR).unwrap(), "ROUTE_NOT_FOUND");
    }

    #[test]
    fn test_login_redirect_response() {
        let response = login_redirect_response("https://login.skia.org/?redirect=x");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(hyper::header::LOCATION).unwrap(),
            "https://login.skia.org/?redirect=x"
        );
    }

    #[test]
    fn test_login_redirect_with_invalid_location() {
        let response = login_redirect_response("bad\nlocation");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
