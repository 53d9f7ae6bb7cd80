mod auth;
mod call;
mod campaigns;
mod dataset;

use std::path::PathBuf;
use std::sync::Arc;

use adsync_client::{ApiClient, ClientSettings, CredentialStore, FileTokenStorage};
use adsync_core::AppConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::auth::AuthCommands;
use crate::dataset::UpsertArgs;

#[derive(Debug, Parser)]
#[command(name = "adsync")]
#[command(about = "Marketplace ads reporting: OAuth tokens, API calls, and CSV datasets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the stored OAuth token
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Send one authenticated request and print the response
    Call {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,
        /// Path relative to the API base URL, or an absolute URL
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        /// Header as name=value (repeatable)
        #[arg(long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
        /// JSON request body
        #[arg(long)]
        json: Option<String>,
    },
    /// Fetch every page of a list endpoint and upsert the results into a CSV
    Fetch {
        /// List endpoint returning `{"results": [...]}` pages; `{site_id}` and
        /// `{advertiser_id}` are filled from config
        endpoint: String,
        /// Target CSV; relative paths resolve against the data directory
        #[arg(long)]
        out: PathBuf,
        /// Key columns, comma-separated (e.g. campaign_id,date)
        #[arg(long, value_delimiter = ',', required = true)]
        key: Vec<String>,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        #[arg(long, default_value = "50")]
        page_size: u32,
        /// Fill missing `campaign_name` values by looking up each `campaign_id`
        #[arg(long)]
        campaign_names: bool,
        #[command(flatten)]
        upsert: UpsertArgs,
    },
    /// Upsert rows from a JSON file into a CSV
    Upsert {
        /// Target CSV; relative paths resolve against the data directory
        #[arg(long)]
        path: PathBuf,
        /// JSON file holding an array of objects (or `{"results": [...]}`)
        #[arg(long)]
        rows: PathBuf,
        /// Key columns, comma-separated (e.g. campaign_id,date)
        #[arg(long, value_delimiter = ',', required = true)]
        key: Vec<String>,
        #[command(flatten)]
        upsert: UpsertArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = adsync_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Exchange { code } => {
                let store = credential_store(&config)?;
                auth::run_auth_exchange(&store, &code).await?;
            }
            AuthCommands::Refresh => {
                let store = credential_store(&config)?;
                auth::run_auth_refresh(&store).await?;
            }
            AuthCommands::Status => auth::run_auth_status(&config)?,
        },
        Commands::Call {
            method,
            path,
            params,
            headers,
            json,
        } => {
            let client = api_client(&config)?;
            call::run_call(&client, &method, &path, &params, &headers, json.as_deref()).await?;
        }
        Commands::Fetch {
            endpoint,
            out,
            key,
            params,
            page_size,
            campaign_names,
            upsert,
        } => {
            let client = api_client(&config)?;
            let target = dataset::UpsertTarget {
                path: config.data_dir.join(out),
                key_fields: key,
                options: upsert.to_options(&config),
            };
            dataset::run_fetch(
                &client,
                &config,
                &endpoint,
                &params,
                page_size,
                campaign_names,
                target,
            )
            .await?;
        }
        Commands::Upsert {
            path,
            rows,
            key,
            upsert,
        } => {
            dataset::run_upsert_file(
                config.data_dir.join(path),
                &rows,
                key,
                upsert.to_options(&config),
            )
            .await?;
        }
    }

    Ok(())
}

fn credential_store(config: &AppConfig) -> anyhow::Result<Arc<CredentialStore>> {
    let credentials = config.require_credentials()?;
    let store = CredentialStore::new(
        &config.token_url,
        credentials,
        Box::new(FileTokenStorage::new(&config.token_path)),
        config.request_timeout_secs,
    )?;
    Ok(Arc::new(store))
}

fn api_client(config: &AppConfig) -> anyhow::Result<ApiClient> {
    let client = ApiClient::new(
        credential_store(config)?,
        ClientSettings::from_app_config(config),
    )?;
    Ok(client)
}

/// Parses `key=value`; the value may itself contain `=`.
fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.trim().to_owned(), value.to_owned()))
}
