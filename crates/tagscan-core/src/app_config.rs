use std::net::SocketAddr;

use chrono::FixedOffset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    /// Base URL of the hosted backend (REST + RPC).
    pub backend_url: String,
    pub backend_api_key: String,
    /// Name of the stored procedure that records a scan and returns owner data.
    pub record_scan_rpc: String,
    pub webhook_url: String,
    pub debounce_ms: u64,
    pub geo_timeout_ms: u64,
    pub manual_geo_timeout_ms: u64,
    pub recorder_timeout_ms: u64,
    pub webhook_timeout_ms: u64,
    pub http_user_agent: String,
    /// Offset used for the `formatted_time` rendering sent to the webhook.
    pub display_offset: FixedOffset,
    pub default_finder_message: String,
    pub visit_ttl_secs: u64,
    pub rate_limit_per_minute: usize,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("backend_url", &self.backend_url)
            .field("backend_api_key", &"[redacted]")
            .field("record_scan_rpc", &self.record_scan_rpc)
            .field("webhook_url", &self.webhook_url)
            .field("debounce_ms", &self.debounce_ms)
            .field("geo_timeout_ms", &self.geo_timeout_ms)
            .field("manual_geo_timeout_ms", &self.manual_geo_timeout_ms)
            .field("recorder_timeout_ms", &self.recorder_timeout_ms)
            .field("webhook_timeout_ms", &self.webhook_timeout_ms)
            .field("http_user_agent", &self.http_user_agent)
            .field("display_offset", &self.display_offset)
            .field("default_finder_message", &self.default_finder_message)
            .field("visit_ttl_secs", &self.visit_ttl_secs)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish()
    }
}
