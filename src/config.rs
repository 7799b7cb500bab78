use crate::host::HostMatcher;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Session and allow-list settings
    pub auth: AuthSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Port the gateway listens on (default: 8000)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Port for health, version and metrics endpoints (default: 20000, 0 disables)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Domain under which `<service>-<port>-proxy.` hostnames are routed
    pub routing_domain: String,

    /// Maximum idle connections per backend (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Upper bound on waiting for backend response headers; unset means no limit
    pub request_timeout_secs: Option<u64>,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    /// Login page that anonymous callers are redirected to
    pub login_url: String,

    /// Account domains allowed through the gateway (e.g. "google.com")
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Shared secret used to verify session tokens
    pub session_secret: String,

    /// Session cookie name (default: hostgate_session)
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Lifetime of tokens minted by this process
    #[serde(default = "default_token_expiry_hours")]
    pub token_expiry_hours: i64,
}

// Default value functions
fn default_listen_port() -> u16 {
    8000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    20000
}

fn default_pool_max_idle_per_host() -> usize {
    10 // Keep up to 10 idle connections per backend
}

fn default_pool_idle_timeout() -> u64 {
    90 // Close idle connections after 90 seconds
}

fn default_cookie_name() -> String {
    "hostgate_session".to_string()
}

fn default_token_expiry_hours() -> i64 {
    24
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = HostMatcher::new(&self.server.routing_domain) {
            errors.push(format!("server.routing_domain: {}", e));
        }

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }

        if self.server.metrics_port != 0 && self.server.metrics_port == self.server.port {
            errors.push("server.metrics_port must differ from server.port".to_string());
        }

        if self.server.request_timeout_secs == Some(0) {
            errors.push("server.request_timeout_secs must be greater than 0 when set".to_string());
        }

        if !(self.auth.login_url.starts_with("http://") || self.auth.login_url.starts_with("https://")) {
            errors.push(format!("auth.login_url '{}' must be an http(s) URL", self.auth.login_url));
        }

        if self.auth.allowed_domains.iter().all(|d| d.trim().is_empty()) {
            errors.push("auth.allowed_domains must list at least one domain".to_string());
        }

        if self.auth.session_secret.is_empty() {
            errors.push("auth.session_secret must not be empty".to_string());
        }

        if self.auth.cookie_name.is_empty() {
            errors.push("auth.cookie_name must not be empty".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
