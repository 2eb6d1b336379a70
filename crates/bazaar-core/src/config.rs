use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

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
/// Decoupled from the process environment so tests can drive it with a plain
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

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let database_url = require("DATABASE_URL")?;
    let admin_jwt_secret = require("BAZAAR_ADMIN_JWT_SECRET")?;
    let user_jwt_secret = require("BAZAAR_USER_JWT_SECRET")?;
    if admin_jwt_secret == user_jwt_secret {
        return Err(invalid(
            "BAZAAR_USER_JWT_SECRET",
            "must differ from BAZAAR_ADMIN_JWT_SECRET".to_string(),
        ));
    }

    let env = parse_environment(&or_default("BAZAAR_ENV", "development"))?;
    let bind_addr = parse_addr("BAZAAR_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("BAZAAR_LOG_LEVEL", "info");

    let jwt_ttl_hours = parse_u64("BAZAAR_JWT_TTL_HOURS", "24")?;
    if jwt_ttl_hours == 0 {
        return Err(invalid("BAZAAR_JWT_TTL_HOURS", "must be at least 1".to_string()));
    }
    let login_max_attempts = parse_u32("BAZAAR_LOGIN_MAX_ATTEMPTS", "5")?;
    let login_window_secs = parse_u64("BAZAAR_LOGIN_WINDOW_SECS", "900")?;

    let db_max_connections = parse_u32("BAZAAR_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("BAZAAR_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("BAZAAR_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        admin_jwt_secret,
        user_jwt_secret,
        jwt_ttl_hours,
        login_max_attempts,
        login_window_secs,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
    })
}

fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "BAZAAR_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
