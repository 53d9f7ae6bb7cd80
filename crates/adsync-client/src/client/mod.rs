//! Resilient request engine for the marketplace REST API.

mod paginate;

use std::sync::Arc;
use std::time::Duration;

use adsync_core::AppConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode, Url};

use crate::credentials::CredentialStore;
use crate::error::{truncate_body, ClientError, MAX_ERROR_BODY_CHARS};
use crate::request::{ApiRequest, ApiResponse, RequestBody};
use crate::retry::{is_retryable_status, RetryPolicy};

pub use paginate::MAX_PAGES;

const DEFAULT_BASE_URL: &str = "https://api.mercadolibre.com";
const API_VERSION_HEADER: &str = "api-version";

/// Picks the `Api-Version` header for routes whose path contains `marker`.
#[derive(Debug, Clone)]
pub struct VersionRule {
    pub marker: String,
    pub version: String,
}

impl VersionRule {
    pub fn new(marker: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            version: version.into(),
        }
    }
}

/// Transport and retry settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
    pub version_rules: Vec<VersionRule>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: "adsync/0.1 (ads-reporting)".to_owned(),
            retry: RetryPolicy::default(),
            version_rules: vec![VersionRule::new("/advertising/", "2")],
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            user_agent: config.user_agent.clone(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base: config.backoff_base,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

/// Authenticated HTTP client with retry, back-off, and one-shot re-auth.
///
/// Every call walks the same state machine: attempt, then either succeed,
/// refresh the token once on a 401 and re-attempt without spending retry
/// budget, back off and re-attempt on a retryable status or network failure
/// while budget remains, or fail.
pub struct ApiClient {
    http: Client,
    base_url: Url,
    credentials: Arc<CredentialStore>,
    retry: RetryPolicy,
    version_rules: Vec<VersionRule>,
}

impl ApiClient {
    /// Creates a client backed by `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`ClientError::InvalidUrl`] if the base URL
    /// does not parse.
    pub fn new(
        credentials: Arc<CredentialStore>,
        settings: ClientSettings,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent(&settings.user_agent)
            .build()?;

        let normalised = format!("{}/", settings.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| ClientError::InvalidUrl {
            url: settings.base_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            http,
            base_url,
            credentials,
            retry: settings.retry,
            version_rules: settings.version_rules,
        })
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// `GET path?params` with default retry settings.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn get<K, V>(
        &self,
        path: &str,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<ApiResponse, ClientError>
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.call(ApiRequest::get(path).params(params)).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, ClientError> {
        self.call(ApiRequest::post(path).json(body)).await
    }

    /// Executes one logical call.
    ///
    /// # Errors
    ///
    /// - [`ClientError::HttpStatus`] for a non-retryable status, or a 401 that
    ///   survives one token refresh.
    /// - [`ClientError::RetryExhausted`] when a retryable status outlasts the budget.
    /// - [`ClientError::Network`] when connection failures outlast the budget.
    /// - Credential errors from [`CredentialStore`] (no record, failed refresh).
    /// - [`ClientError::InvalidUrl`] / [`ClientError::InvalidHeader`] for
    ///   malformed input.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.resolve_url(&request.path)?;
        let (mut headers, caller_sets_auth) = self.build_headers(&url, &request.headers)?;
        let query = request.query_pairs();
        let max_retries = request.max_retries.unwrap_or(self.retry.max_retries);

        let mut retries_used = 0u32;
        let mut refreshed = false;

        loop {
            if !caller_sets_auth {
                let token = self.credentials.get_valid_token().await?;
                headers.insert(AUTHORIZATION, bearer(&token)?);
            }

            let attempt = retries_used + 1;
            tracing::debug!(method = %request.method, url = %url, attempt, "sending request");

            let mut builder = self
                .http
                .request(request.method.clone(), url.clone())
                .headers(headers.clone())
                .query(&query);
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            builder = match &request.body {
                RequestBody::None => builder,
                RequestBody::Json(value) => builder.json(value),
                RequestBody::Form(pairs) => builder.form(pairs),
            };

            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    if retries_used < max_retries {
                        retries_used += 1;
                        let delay = self.retry.jittered_delay(retries_used);
                        tracing::warn!(
                            attempt,
                            max_retries,
                            delay_ms = duration_ms(delay),
                            url = %url,
                            error = %err,
                            "network error, retrying after back-off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    tracing::error!(url = %url, attempts = attempt, error = %err, "network failure");
                    return Err(ClientError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            };

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed && !caller_sets_auth {
                tracing::warn!(url = %url, "401 received, refreshing token and retrying once");
                refreshed = true;
                self.credentials.refresh(None).await?;
                continue;
            }

            if status.is_success() {
                return match response.text().await {
                    Ok(body) => Ok(ApiResponse::from_body(body)),
                    Err(err) if retries_used < max_retries => {
                        retries_used += 1;
                        let delay = self.retry.jittered_delay(retries_used);
                        tracing::warn!(
                            attempt,
                            delay_ms = duration_ms(delay),
                            url = %url,
                            error = %err,
                            "failed reading response body, retrying after back-off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Err(err) => Err(ClientError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        source: err,
                    }),
                };
            }

            let response_headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let body = truncate_body(&body, MAX_ERROR_BODY_CHARS);

            if is_retryable_status(status) {
                if retries_used < max_retries {
                    retries_used += 1;
                    let delay =
                        self.retry
                            .delay_for(retries_used, &response_headers, chrono::Utc::now());
                    tracing::warn!(
                        status = status.as_u16(),
                        attempt,
                        max_retries,
                        delay_ms = duration_ms(delay),
                        url = %url,
                        "retryable status, retrying after back-off"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                tracing::error!(status = status.as_u16(), url = %url, attempts = attempt, "retry budget exhausted");
                return Err(ClientError::RetryExhausted {
                    status: status.as_u16(),
                    url: url.to_string(),
                    attempts: attempt,
                    body,
                });
            }

            tracing::error!(status = status.as_u16(), url = %url, body = %body, "request failed");
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
    }

    /// Resolves a relative path against the base URL; absolute URLs pass through.
    fn resolve_url(&self, path: &str) -> Result<Url, ClientError> {
        let invalid = |e: &dyn std::fmt::Display| ClientError::InvalidUrl {
            url: path.to_owned(),
            reason: e.to_string(),
        };
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| invalid(&e));
        }
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| invalid(&e))
    }

    /// Default headers for `url`, overlaid with the caller's. Returns whether
    /// the caller supplied its own `Authorization` header.
    fn build_headers(
        &self,
        url: &Url,
        overrides: &[(String, String)],
    ) -> Result<(HeaderMap, bool), ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(rule) = self
            .version_rules
            .iter()
            .find(|rule| url.path().contains(&rule.marker))
        {
            headers.insert(
                HeaderName::from_static(API_VERSION_HEADER),
                header_value(API_VERSION_HEADER, &rule.version)?,
            );
        }

        let mut caller_sets_auth = false;
        for (name, value) in overrides {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ClientError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            if header_name == AUTHORIZATION {
                caller_sets_auth = true;
            }
            headers.insert(header_name, header_value(name, value)?);
        }
        Ok((headers, caller_sets_auth))
    }
}

fn bearer(token: &str) -> Result<HeaderValue, ClientError> {
    let mut value = header_value("authorization", &format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value).map_err(|e| ClientError::InvalidHeader {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "../client_test.rs"]
mod tests;
