//! Configuration loader for the `cwsi-engine` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Keeping every `env::var` call here means the
//! engine modules only ever see typed values.
//!
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Parse an optional environment variable into `$ty` with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string variable, treating blank values as unset.
fn optional_env(var_name: &str) -> Option<String> {
    env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub const DEFAULT_WEATHER_API_URL: &str = "https://api.weatherapi.com/v1/current.json";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Port the health endpoint listens on.
    pub http_port: u16,

    /// Weather provider endpoint.
    pub weather_api_url: String,

    /// Weather provider key; lookups fail over to light sensors when unset.
    pub weather_api_key: Option<String>,

    /// Absolute expiry of cached weather lookups, in minutes.
    pub weather_cache_minutes: u32,

    /// Scheduler tick and reading lookback, in minutes.
    pub analysis_interval_minutes: u32,

    /// Local hour at which the nightly audit runs.
    pub audit_hour: u32,

    /// Offset of the audit's local clock from UTC, in minutes.
    pub audit_utc_offset_minutes: i32,

    /// Length of the overnight window scanned by the audit, in hours.
    pub audit_lookback_hours: u32,

    /// Canopy minus air temperature above which a night sample is anomalous.
    pub anomaly_delta_c: f64,

    /// Webhook receiving alerts; alerts are only logged when unset.
    pub alert_webhook_url: Option<String>,

    /// Window over which repeated failure signals are summarized, in minutes.
    pub alert_summary_minutes: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – health endpoint port (default: 8080)
/// - `WEATHER_API_URL` / `WEATHER_API_KEY` – weather provider
/// - `WEATHER_CACHE_MINUTES` – weather cache TTL (default: 30)
/// - `ANALYSIS_INTERVAL_MINUTES` – analysis tick and lookback (default: 30)
/// - `AUDIT_HOUR`, `AUDIT_UTC_OFFSET_MINUTES`, `AUDIT_LOOKBACK_HOURS` – nightly audit (6, 0, 10)
/// - `ANOMALY_DELTA_C` – anomaly delta threshold (default: 2.0)
/// - `ALERT_WEBHOOK_URL` – alert webhook
/// - `ALERT_SUMMARY_MINUTES` – failure summary window (default: 60)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let http_port = parse_env!("HTTP_PORT", u16, 8080);
    let weather_api_url =
        optional_env("WEATHER_API_URL").unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string());
    let weather_api_key = optional_env("WEATHER_API_KEY");
    let weather_cache_minutes = parse_env!("WEATHER_CACHE_MINUTES", u32, 30);
    let analysis_interval_minutes = parse_env!("ANALYSIS_INTERVAL_MINUTES", u32, 30);
    let audit_hour = parse_env!("AUDIT_HOUR", u32, 6);
    let audit_utc_offset_minutes = parse_env!("AUDIT_UTC_OFFSET_MINUTES", i32, 0);
    let audit_lookback_hours = parse_env!("AUDIT_LOOKBACK_HOURS", u32, 10);
    let anomaly_delta_c = parse_env!("ANOMALY_DELTA_C", f64, 2.0);
    let alert_webhook_url = optional_env("ALERT_WEBHOOK_URL");
    let alert_summary_minutes = parse_env!("ALERT_SUMMARY_MINUTES", u32, 60);

    let cfg = Config {
        db_url,
        db_pool_max,
        http_port,
        weather_api_url,
        weather_api_key,
        weather_cache_minutes,
        analysis_interval_minutes,
        audit_hour,
        audit_utc_offset_minutes,
        audit_lookback_hours,
        anomaly_delta_c,
        alert_webhook_url,
        alert_summary_minutes,
    };
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.analysis_interval_minutes == 0 {
            return Err(anyhow!("ANALYSIS_INTERVAL_MINUTES must be greater than zero"));
        }
        if self.alert_summary_minutes == 0 {
            return Err(anyhow!("ALERT_SUMMARY_MINUTES must be greater than zero"));
        }
        if self.audit_hour > 23 {
            return Err(anyhow!("AUDIT_HOUR must be between 0 and 23, got {}", self.audit_hour));
        }
        if self.audit_utc_offset_minutes.abs() >= 24 * 60 {
            return Err(anyhow!(
                "AUDIT_UTC_OFFSET_MINUTES out of range: {}",
                self.audit_utc_offset_minutes
            ));
        }
        if !self.anomaly_delta_c.is_finite() {
            return Err(anyhow!("ANOMALY_DELTA_C must be a finite number"));
        }
        Ok(())
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.analysis_interval_minutes) * 60)
    }

    pub fn weather_cache_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.weather_cache_minutes) * 60)
    }

    pub fn alert_summary_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.alert_summary_minutes) * 60)
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and the weather
    /// API key while showing all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_key = self
            .weather_api_key
            .as_ref()
            .map(|_| "****")
            .unwrap_or("<unset>");

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL              : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX               : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT                 : {}", self.http_port);
        tracing::info!("  WEATHER_API_URL           : {}", self.weather_api_url);
        tracing::info!("  WEATHER_API_KEY           : {}", masked_key);
        tracing::info!("  WEATHER_CACHE_MINUTES     : {}", self.weather_cache_minutes);
        tracing::info!("  ANALYSIS_INTERVAL_MINUTES : {}", self.analysis_interval_minutes);
        tracing::info!("  AUDIT_HOUR                : {}", self.audit_hour);
        tracing::info!("  AUDIT_UTC_OFFSET_MINUTES  : {}", self.audit_utc_offset_minutes);
        tracing::info!("  AUDIT_LOOKBACK_HOURS      : {}", self.audit_lookback_hours);
        tracing::info!("  ANOMALY_DELTA_C           : {}", self.anomaly_delta_c);
        tracing::info!(
            "  ALERT_WEBHOOK_URL         : {}",
            self.alert_webhook_url.as_deref().unwrap_or("<log only>")
        );
        tracing::info!("  ALERT_SUMMARY_MINUTES     : {}", self.alert_summary_minutes);
    }
}

/// Mask the password in a database URL.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}
