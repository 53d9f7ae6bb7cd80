//! Credential store and refresher.
//!
//! [`CredentialStore`] owns the persisted [`TokenRecord`] and hands out a
//! bearer token that is valid for at least [`DEFAULT_REFRESH_MARGIN_SECS`],
//! refreshing through the provider's token endpoint when needed. All reads and
//! writes of the record happen under one async mutex, so a single process never
//! refreshes twice concurrently. Multiple processes sharing one token file are
//! not coordinated.

use std::sync::Arc;
use std::time::Duration;

use adsync_core::Credentials;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::Mutex;

use crate::error::{truncate_body, ClientError};
use crate::storage::TokenStorage;
use crate::token::{TokenRecord, TokenResponse};

/// Refresh when fewer than this many seconds of validity remain.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;

const TOKEN_ERROR_BODY_CHARS: usize = 400;

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Supplies valid bearer tokens, hiding refresh mechanics from callers.
pub struct CredentialStore {
    http: Client,
    token_url: String,
    credentials: Credentials,
    storage: Box<dyn TokenStorage>,
    clock: Arc<dyn Clock>,
    refresh_margin: chrono::Duration,
    critical: Mutex<()>,
}

impl CredentialStore {
    /// Creates a store that talks to `token_url` and persists through `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(
        token_url: &str,
        credentials: Credentials,
        storage: Box<dyn TokenStorage>,
        timeout_secs: u64,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            token_url: token_url.to_owned(),
            credentials,
            storage,
            clock: Arc::new(SystemClock),
            refresh_margin: chrono::Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            critical: Mutex::new(()),
        })
    }

    /// Replaces the time source (tests drive expiry with a fixed clock).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: chrono::Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Returns the persisted record without refreshing it.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn current(&self) -> Result<Option<TokenRecord>, ClientError> {
        let _guard = self.critical.lock().await;
        self.storage.load()
    }

    /// Exchanges an authorization code for a fresh token record and persists it.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AuthExchange`] if the provider returns a non-success status.
    /// - [`ClientError::Http`] on network failure.
    /// - [`ClientError::Deserialize`] if the success body is not a token response.
    /// - [`ClientError::TokenStorage`] if the record cannot be persisted.
    pub async fn exchange(&self, authorization_code: &str) -> Result<TokenRecord, ClientError> {
        let _guard = self.critical.lock().await;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", authorization_code),
        ];
        if let Some(redirect_uri) = &self.credentials.redirect_uri {
            form.push(("redirect_uri", redirect_uri.as_str()));
        }

        tracing::info!(token_url = %self.token_url, "exchanging authorization code for tokens");
        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "authorization code exchange rejected");
            return Err(ClientError::AuthExchange {
                status: status.as_u16(),
                body: truncate_body(&body, TOKEN_ERROR_BODY_CHARS),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| ClientError::Deserialize {
                context: "authorization code exchange".to_owned(),
                source: e,
            })?;
        let record = parsed.into_record(self.clock.now());
        self.storage.save(&record)?;
        Ok(record)
    }

    /// Obtains a new access token using the refresh token of `record`, or of
    /// the persisted record when `record` is `None`.
    ///
    /// `user_id` and `refresh_token` are carried over when the provider omits
    /// them from the response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AuthRefresh`] if no refresh token is available or the
    ///   provider rejects the request.
    /// - [`ClientError::Http`] on network failure.
    /// - [`ClientError::TokenStorage`] if the record cannot be loaded or persisted.
    pub async fn refresh(&self, record: Option<&TokenRecord>) -> Result<TokenRecord, ClientError> {
        let _guard = self.critical.lock().await;
        let stored;
        let previous = match record {
            Some(record) => Some(record),
            None => {
                stored = self.storage.load()?;
                stored.as_ref()
            }
        };
        self.refresh_locked(previous).await
    }

    /// Returns an access token valid for at least the refresh margin.
    ///
    /// A record with no derivable expiry is returned as-is; the request
    /// engine's 401 handling covers the case where it has in fact expired.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NoTokenRecord`] if nothing has been persisted yet.
    /// - Any error from [`Self::refresh`] when a refresh is due.
    pub async fn get_valid_token(&self) -> Result<String, ClientError> {
        self.valid_token_at(self.clock.now()).await
    }

    /// [`Self::get_valid_token`] evaluated at `now` instead of the store's
    /// clock.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_valid_token`].
    pub async fn valid_token_at(&self, now: DateTime<Utc>) -> Result<String, ClientError> {
        let _guard = self.critical.lock().await;
        let Some(mut record) = self.storage.load()? else {
            return Err(ClientError::NoTokenRecord {
                location: self.storage.location(),
            });
        };

        if record.expires_at.is_none() {
            if let Some(expires_at) = record.derived_expiry() {
                record.expires_at = Some(expires_at);
                self.storage.save(&record)?;
                tracing::debug!(%expires_at, "backfilled token expiry");
            } else {
                tracing::debug!("token record has no expiry; using it optimistically");
                return Ok(record.access_token);
            }
        }

        if record.expires_within(now, self.refresh_margin) {
            tracing::info!("access token near expiry; refreshing");
            let refreshed = self.refresh_locked(Some(&record)).await?;
            return Ok(refreshed.access_token);
        }

        Ok(record.access_token)
    }

    async fn refresh_locked(
        &self,
        previous: Option<&TokenRecord>,
    ) -> Result<TokenRecord, ClientError> {
        let Some(refresh_token) = previous.and_then(|r| r.refresh_token.as_deref()) else {
            return Err(ClientError::AuthRefresh {
                reason: "no refresh token available; re-run the authorization flow".to_owned(),
            });
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        tracing::warn!(token_url = %self.token_url, "refreshing access token");
        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "token refresh rejected");
            return Err(ClientError::AuthRefresh {
                reason: format!(
                    "provider returned HTTP {}: {}",
                    status.as_u16(),
                    truncate_body(&body, TOKEN_ERROR_BODY_CHARS)
                ),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| ClientError::AuthRefresh {
                reason: format!("malformed token response: {e}"),
            })?;
        let mut record = parsed.into_record(self.clock.now());
        if record.user_id.is_none() {
            record.user_id = previous.and_then(|r| r.user_id.clone());
        }
        if record.refresh_token.is_none() {
            record.refresh_token = Some(refresh_token.to_owned());
        }

        self.storage.save(&record)?;
        Ok(record)
    }
}
