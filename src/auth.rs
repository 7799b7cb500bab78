//! Caller authentication and the access gate
//!
//! Every request passes the gate before its hostname is looked at, so an
//! anonymous caller cannot probe which backend names are valid.

use crate::config::AuthSettings;
use crate::headers::forwarded_proto;
use chrono::{Duration, Utc};
use hyper::header::{HeaderMap, AUTHORIZATION, COOKIE, HOST};
use hyper::Uri;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Session token claims. `sub` is the caller's email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Who is making a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    Anonymous,
    Authenticated { email: String, domain: String },
}

impl CallerIdentity {
    /// Build an identity from an email address; the domain is the part after `@`
    pub fn from_email(email: &str) -> Option<Self> {
        let (user, domain) = email.rsplit_once('@')?;
        if user.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self::Authenticated {
            email: email.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated { email, .. } => Some(email),
        }
    }
}

/// Authentication collaborator consulted by the gate
pub trait Authenticator: Send + Sync {
    /// Resolve the caller from request credentials
    fn current_caller(&self, headers: &HeaderMap) -> CallerIdentity;

    /// Where to send an anonymous caller so they come back to `uri` afterwards
    fn login_redirect_url(&self, headers: &HeaderMap, uri: &Uri) -> String;

    /// Whether an authenticated caller's account domain may use the gateway
    fn is_allowed_domain(&self, identity: &CallerIdentity) -> bool;
}

/// Outcome of the access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Proceed(CallerIdentity),
    RedirectToLogin(String),
    Deny(String),
}

/// Per-request access check in front of routing
#[derive(Clone)]
pub struct AccessGate {
    authenticator: Arc<dyn Authenticator>,
}

impl AccessGate {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    pub fn check(&self, headers: &HeaderMap, uri: &Uri) -> AccessDecision {
        let identity = self.authenticator.current_caller(headers);

        if identity == CallerIdentity::Anonymous {
            return AccessDecision::RedirectToLogin(
                self.authenticator.login_redirect_url(headers, uri),
            );
        }

        if !self.authenticator.is_allowed_domain(&identity) {
            debug!(email = identity.email().unwrap_or_default(), "Caller domain not on allow-list");
            return AccessDecision::Deny("account not permitted".to_string());
        }

        AccessDecision::Proceed(identity)
    }
}

/// Authenticator backed by signed session tokens issued by the login service
#[derive(Clone)]
pub struct SessionAuthenticator {
    settings: Arc<AuthSettings>,
    allowed_domains: Arc<HashSet<String>>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionAuthenticator {
    pub fn new(settings: AuthSettings) -> Self {
        let encoding_key = EncodingKey::from_secret(settings.session_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(settings.session_secret.as_bytes());
        let allowed_domains = settings
            .allowed_domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .collect();
        Self {
            settings: Arc::new(settings),
            allowed_domains: Arc::new(allowed_domains),
            encoding_key,
            decoding_key,
        }
    }

    pub fn create_token(&self, email: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.settings.token_expiry_hours);

        let claims = Claims {
            sub: email.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
    }

    pub fn extract_token_from_cookie(&self, cookie_header: &str) -> Option<String> {
        let prefix = format!("{}=", self.settings.cookie_name);
        for cookie in cookie_header.split(';') {
            if let Some(value) = cookie.trim().strip_prefix(&prefix) {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
        None
    }

    pub fn extract_token_from_header(&self, auth_header: &str) -> Option<String> {
        auth_header.strip_prefix("Bearer ").map(|s| s.to_string())
    }

    fn find_token(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| self.extract_token_from_cookie(v))
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| self.extract_token_from_header(v))
            })
    }
}

impl Authenticator for SessionAuthenticator {
    fn current_caller(&self, headers: &HeaderMap) -> CallerIdentity {
        let Some(token) = self.find_token(headers) else {
            return CallerIdentity::Anonymous;
        };

        match self.verify_token(&token) {
            Ok(data) => CallerIdentity::from_email(&data.claims.sub).unwrap_or(CallerIdentity::Anonymous),
            Err(e) => {
                debug!(error = %e, "Rejected session token");
                CallerIdentity::Anonymous
            }
        }
    }

    fn login_redirect_url(&self, headers: &HeaderMap, uri: &Uri) -> String {
        let proto = forwarded_proto(headers);
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .unwrap_or_default();
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        let original = format!("{}://{}{}", proto, host, path);
        let separator = if self.settings.login_url.contains('?') { '&' } else { '?' };

        format!(
            "{}{}redirect={}",
            self.settings.login_url,
            separator,
            urlencoding::encode(&original)
        )
    }

    fn is_allowed_domain(&self, identity: &CallerIdentity) -> bool {
        match identity {
            CallerIdentity::Anonymous => false,
            CallerIdentity::Authenticated { domain, .. } => self.allowed_domains.contains(domain),
        }
    }
}
