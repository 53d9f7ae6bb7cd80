use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the credential store and the request engine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure talking to the OAuth token endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The token endpoint rejected an authorization-code exchange.
    #[error("authorization code exchange failed with HTTP {status}: {body}")]
    AuthExchange { status: u16, body: String },

    /// No refresh token was available, or the provider rejected the refresh.
    #[error("token refresh failed: {reason}")]
    AuthRefresh { reason: String },

    /// No token record has been persisted yet; the OAuth flow must run first.
    #[error("no token record found at {location}; run the authorization flow first")]
    NoTokenRecord { location: String },

    /// Reading or writing the persisted token record failed.
    #[error("token storage error at {}: {reason}", .path.display())]
    TokenStorage { path: PathBuf, reason: String },

    /// A non-retryable HTTP status (or a second 401 after refresh).
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// A retryable status persisted through the whole retry budget.
    #[error("HTTP {status} from {url} after {attempts} attempts: {body}")]
    RetryExhausted {
        status: u16,
        url: String,
        attempts: u32,
        body: String,
    },

    /// Connection-level failures persisted through the whole retry budget.
    #[error("network error calling {url} after {attempts} attempts: {source}")]
    Network {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("pagination limit reached for {endpoint}: exceeded {max_pages} pages")]
    PaginationLimit { endpoint: String, max_pages: usize },
}

/// Upper bound on how much of a response body is kept in an error.
pub(crate) const MAX_ERROR_BODY_CHARS: usize = 800;

/// Truncates `body` to at most `max_chars` characters, marking the cut.
pub(crate) fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_owned(),
    }
}
