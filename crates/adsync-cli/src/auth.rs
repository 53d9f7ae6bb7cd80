//! OAuth token commands.

use adsync_client::{CredentialStore, FileTokenStorage, TokenRecord, TokenStorage};
use adsync_core::AppConfig;
use chrono::{DateTime, Utc};
use clap::Subcommand;

/// Sub-commands available under `auth`.
#[derive(Debug, Subcommand)]
pub enum AuthCommands {
    /// Exchange an authorization code from the consent redirect for tokens
    Exchange {
        #[arg(long)]
        code: String,
    },
    /// Refresh the stored access token now
    Refresh,
    /// Show the stored token's owner and expiry
    Status,
}

/// # Errors
///
/// Returns an error if the provider rejects the code or the token cannot be persisted.
pub(crate) async fn run_auth_exchange(store: &CredentialStore, code: &str) -> anyhow::Result<()> {
    let record = store.exchange(code).await?;
    println!("authorization complete");
    println!("{}", describe(&record, Utc::now()));
    Ok(())
}

/// # Errors
///
/// Returns an error if no refresh token is stored or the provider rejects it.
pub(crate) async fn run_auth_refresh(store: &CredentialStore) -> anyhow::Result<()> {
    let record = store.refresh(None).await?;
    println!("token refreshed");
    println!("{}", describe(&record, Utc::now()));
    Ok(())
}

/// Reads the token file directly; no credentials or network needed.
///
/// # Errors
///
/// Returns an error if the token file exists but cannot be read.
pub(crate) fn run_auth_status(config: &AppConfig) -> anyhow::Result<()> {
    let storage = FileTokenStorage::new(&config.token_path);
    match storage.load()? {
        Some(record) => println!("{}", describe(&record, Utc::now())),
        None => println!(
            "no token stored at {}; run `adsync auth exchange --code <CODE>` first",
            storage.location()
        ),
    }
    Ok(())
}

/// Human-readable summary of `record` without any secret material.
fn describe(record: &TokenRecord, now: DateTime<Utc>) -> String {
    let user = record.user_id.as_deref().unwrap_or("unknown");
    let expiry = match record.expires_at.or_else(|| record.derived_expiry()) {
        Some(expires_at) if expires_at > now => {
            let left = expires_at - now;
            format!(
                "{} (in {}h {:02}m)",
                expires_at.to_rfc3339(),
                left.num_hours(),
                left.num_minutes() % 60
            )
        }
        Some(expires_at) => format!("{} (expired)", expires_at.to_rfc3339()),
        None => "unknown".to_owned(),
    };
    let refresh = if record.refresh_token.is_some() {
        "present"
    } else {
        "missing"
    };
    format!("user_id:       {user}\nexpires_at:    {expiry}\nrefresh_token: {refresh}")
}
