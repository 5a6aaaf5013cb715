use std::ops::RangeInclusive;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://coach_connect.db?mode=rwc";
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 720;
/// Ten years.
pub const MAX_SESSION_TTL_HOURS: i64 = 87_600;
pub const DEFAULT_INVITE_CODE_MAX_ATTEMPTS: u32 = 10;

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub session_ttl_hours: i64,
    pub invite_code_max_attempts: u32,
    pub deployment_environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            invite_code_max_attempts: DEFAULT_INVITE_CODE_MAX_ATTEMPTS,
            deployment_environment: "development".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the process environment. Call after `load_environment`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.database_url),
            session_ttl_hours: parse_in_range(
                "SESSION_TTL_HOURS",
                defaults.session_ttl_hours,
                1..=MAX_SESSION_TTL_HOURS,
            ),
            invite_code_max_attempts: parse_in_range(
                "INVITE_CODE_MAX_ATTEMPTS",
                defaults.invite_code_max_attempts,
                1..=100,
            ),
            deployment_environment: std::env::var("DEPLOYMENT_ENVIRONMENT")
                .unwrap_or(defaults.deployment_environment),
        }
    }

    /// Falls back to the default lifetime when the configured hours do not
    /// form a valid duration.
    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::try_hours(self.session_ttl_hours)
            .unwrap_or_else(|| TimeDelta::hours(DEFAULT_SESSION_TTL_HOURS))
    }

    /// Expiry of a session created at `now`, or `None` if it would fall
    /// outside the representable date range.
    pub fn session_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_add_signed(self.session_ttl())
    }
}

fn parse_in_range<T>(key: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => value,
        Ok(_) => {
            warn!(
                key,
                value = %raw,
                min = %range.start(),
                max = %range.end(),
                default = %default,
                "Setting out of range, using default"
            );
            default
        }
        Err(_) => {
            warn!(key, value = %raw, default = %default, "Unparseable setting, using default");
            default
        }
    }
}
