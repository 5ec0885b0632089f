use chrono::FixedOffset;

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Default note attached to automatic scans when the finder typed nothing.
pub const DEFAULT_FINDER_MESSAGE: &str = "Tag scanned automatically when the pet page was opened";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let backend_url = require("TAGSCAN_BACKEND_URL")?;
    let backend_api_key = require("TAGSCAN_BACKEND_API_KEY")?;
    let webhook_url = require("TAGSCAN_WEBHOOK_URL")?;

    let env = parse_environment(&or_default("TAGSCAN_ENV", "development"));
    let bind_addr = or_default("TAGSCAN_BIND_ADDR", "0.0.0.0:3000")
        .parse::<SocketAddr>()
        .map_err(|e| invalid("TAGSCAN_BIND_ADDR", e.to_string()))?;
    let log_level = or_default("TAGSCAN_LOG_LEVEL", "info");
    let record_scan_rpc = or_default("TAGSCAN_RECORD_SCAN_RPC", "record_tag_scan");

    let debounce_ms = parse_u64("TAGSCAN_DEBOUNCE_MS", "300")?;
    let geo_timeout_ms = parse_u64("TAGSCAN_GEO_TIMEOUT_MS", "5000")?;
    let manual_geo_timeout_ms = parse_u64("TAGSCAN_MANUAL_GEO_TIMEOUT_MS", "10000")?;
    let recorder_timeout_ms = parse_u64("TAGSCAN_RECORDER_TIMEOUT_MS", "10000")?;
    let webhook_timeout_ms = parse_u64("TAGSCAN_WEBHOOK_TIMEOUT_MS", "10000")?;

    let http_user_agent = or_default("TAGSCAN_HTTP_USER_AGENT", "tagscan/0.1 (scan-notify)");
    let display_offset = parse_offset(&or_default("TAGSCAN_DISPLAY_UTC_OFFSET_MINUTES", "0"))
        .map_err(|reason| invalid("TAGSCAN_DISPLAY_UTC_OFFSET_MINUTES", reason))?;
    let default_finder_message =
        or_default("TAGSCAN_DEFAULT_FINDER_MESSAGE", DEFAULT_FINDER_MESSAGE);

    let visit_ttl_secs = parse_u64("TAGSCAN_VISIT_TTL_SECS", "900")?;
    let rate_limit_per_minute = parse_usize("TAGSCAN_RATE_LIMIT_PER_MINUTE", "120")?;

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        backend_url,
        backend_api_key,
        record_scan_rpc,
        webhook_url,
        debounce_ms,
        geo_timeout_ms,
        manual_geo_timeout_ms,
        recorder_timeout_ms,
        webhook_timeout_ms,
        http_user_agent,
        display_offset,
        default_finder_message,
        visit_ttl_secs,
        rate_limit_per_minute,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

fn parse_offset(raw: &str) -> Result<FixedOffset, String> {
    let minutes = raw.trim().parse::<i32>().map_err(|e| e.to_string())?;
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| format!("offset of {minutes} minutes is out of range"))
}
