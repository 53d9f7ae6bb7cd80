use std::path::PathBuf;

use crate::ConfigError;

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

/// OAuth client credentials registered with the marketplace.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub api_base_url: String,
    pub token_url: String,
    pub token_path: PathBuf,
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base: f64,
    pub lock_timeout_secs: u64,
    pub user_agent: String,
    pub advertiser_id: Option<String>,
    pub site_id: String,
}

impl AppConfig {
    /// Returns the OAuth client credentials, failing when either half is unset.
    ///
    /// Only the auth-bearing commands need these, so they are validated lazily
    /// rather than at load time.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] naming the first missing variable.
    pub fn require_credentials(&self) -> Result<Credentials, ConfigError> {
        let client_id = self
            .client_id
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("MELI_CLIENT_ID".to_string()))?;
        let client_secret = self
            .client_secret
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("MELI_CLIENT_SECRET".to_string()))?;
        Ok(Credentials {
            client_id,
            client_secret,
            redirect_uri: self.redirect_uri.clone(),
        })
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("token_path", &self.token_path)
            .field("data_dir", &self.data_dir)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .field("lock_timeout_secs", &self.lock_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("advertiser_id", &self.advertiser_id)
            .field("site_id", &self.site_id)
            .finish()
    }
}
