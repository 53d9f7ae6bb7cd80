use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
/// Variables already present in the process environment take precedence.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
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
/// Returns `ConfigError` if values are present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can drive it with a `HashMap`.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    // First alias holding a non-blank value wins.
    let any_of = |vars: &[&str]| -> Option<String> {
        vars.iter().find_map(|var| {
            lookup(var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    };

    let or_default = |var: &str, default: &str| -> String {
        any_of(&[var]).unwrap_or_else(|| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let env = parse_environment(&or_default("ADSYNC_ENV", "development"))?;
    let log_level = any_of(&["ADSYNC_LOG_LEVEL", "LOG_LEVEL"]).unwrap_or_else(|| "info".into());

    let client_id = any_of(&["MELI_CLIENT_ID", "ML_CLIENT_ID", "CLIENT_ID"]);
    let client_secret = any_of(&["MELI_CLIENT_SECRET", "ML_CLIENT_SECRET", "CLIENT_SECRET"]);
    let redirect_uri = any_of(&["MELI_REDIRECT_URI", "ML_REDIRECT_URI", "REDIRECT_URI"]);
    if let Some(uri) = &redirect_uri {
        validate_absolute_url("MELI_REDIRECT_URI", uri)?;
    }

    let api_base_url = or_default("ADSYNC_API_BASE_URL", "https://api.mercadolibre.com");
    validate_absolute_url("ADSYNC_API_BASE_URL", &api_base_url)?;
    let token_url = or_default(
        "ADSYNC_TOKEN_URL",
        "https://api.mercadolibre.com/oauth/token",
    );
    validate_absolute_url("ADSYNC_TOKEN_URL", &token_url)?;

    let token_path = PathBuf::from(or_default("ADSYNC_TOKEN_PATH", "./data/tokens.json"));
    let data_dir = PathBuf::from(or_default("ADSYNC_DATA_DIR", "./data/processed"));

    let request_timeout_secs = parse_u64("ADSYNC_REQUEST_TIMEOUT_SECS", "60")?;
    let connect_timeout_secs = parse_u64("ADSYNC_CONNECT_TIMEOUT_SECS", "10")?;
    let max_retries = parse_u32("ADSYNC_MAX_RETRIES", "3")?;
    let backoff_base = parse_backoff_base(&or_default("ADSYNC_BACKOFF_BASE", "1.5"))?;
    let lock_timeout_secs = parse_u64("ADSYNC_LOCK_TIMEOUT_SECS", "30")?;
    let user_agent = or_default("ADSYNC_USER_AGENT", "adsync/0.1 (ads-reporting)");

    let advertiser_id = any_of(&["ADVERTISER_ID"]);
    let site_id = or_default("SITE_ID", "MLB");

    Ok(AppConfig {
        env,
        log_level,
        client_id,
        client_secret,
        redirect_uri,
        api_base_url,
        token_url,
        token_path,
        data_dir,
        request_timeout_secs,
        connect_timeout_secs,
        max_retries,
        backoff_base,
        lock_timeout_secs,
        user_agent,
        advertiser_id,
        site_id,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] for anything other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "ADSYNC_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

fn parse_backoff_base(raw: &str) -> Result<f64, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar {
        var: "ADSYNC_BACKOFF_BASE".to_string(),
        reason,
    };
    let base = raw.parse::<f64>().map_err(|e| invalid(e.to_string()))?;
    if !base.is_finite() || base < 1.0 {
        return Err(invalid(format!("must be a finite number >= 1.0, got {raw}")));
    }
    Ok(base)
}

fn validate_absolute_url(var: &str, raw: &str) -> Result<(), ConfigError> {
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"));
    match rest {
        Some(rest) if !rest.is_empty() && !rest.starts_with('/') => Ok(()),
        _ => Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("'{raw}' is not an absolute http(s) URL"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
