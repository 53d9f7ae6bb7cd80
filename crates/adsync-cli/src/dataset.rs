//! Dataset commands: paginated fetch into a CSV, and upsert from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use adsync_client::{ApiClient, ApiRequest};
use adsync_core::AppConfig;
use adsync_store::{
    flatten_json, upsert, HeaderOrder, LockOptions, Row, UpsertOptions, UpsertReport,
};
use anyhow::{bail, Context};
use clap::Args;
use serde_json::Value;

use crate::campaigns::CampaignNames;

/// Nested JSON objects become `parent_child` columns.
const FLATTEN_SEPARATOR: &str = "_";

/// Merge options shared by `fetch` and `upsert`.
#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct UpsertArgs {
    /// Only write columns that hold a value in at least one row
    #[arg(long)]
    pub strict_header: bool,
    /// Column to remove from every row (repeatable or comma-separated)
    #[arg(long = "drop-field", value_delimiter = ',')]
    pub drop_fields: Vec<String>,
    /// Sort rows by these columns (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub sort_by: Vec<String>,
    /// Discard the existing file and rebuild it from this batch
    #[arg(long)]
    pub reset: bool,
    /// Header for a file that does not exist yet (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub fallback_header: Vec<String>,
    /// Columns that always lead the header (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub schema: Vec<String>,
    /// Drop columns outside the schema or the existing header
    #[arg(long)]
    pub no_new_columns: bool,
    /// Keep the existing column order and append new columns as seen
    #[arg(long)]
    pub insertion_order: bool,
}

impl UpsertArgs {
    pub(crate) fn to_options(&self, config: &AppConfig) -> UpsertOptions {
        UpsertOptions {
            schema: self.schema.clone(),
            allow_new_columns: !self.no_new_columns,
            strict_header: self.strict_header,
            drop_fields: self.drop_fields.clone(),
            sort_by: self.sort_by.clone(),
            reset: self.reset,
            fallback_header: self.fallback_header.clone(),
            header_order: if self.insertion_order {
                HeaderOrder::Insertion
            } else {
                HeaderOrder::Preferred
            },
            lock: LockOptions {
                timeout: Duration::from_secs(config.lock_timeout_secs),
                ..LockOptions::default()
            },
            ..UpsertOptions::default()
        }
    }
}

/// Where and how a batch lands.
#[derive(Debug)]
pub(crate) struct UpsertTarget {
    pub path: PathBuf,
    pub key_fields: Vec<String>,
    pub options: UpsertOptions,
}

/// Fetch all pages of `endpoint`, flatten each result, and upsert them.
///
/// `{site_id}` and `{advertiser_id}` in the endpoint are filled from config.
/// An empty result set leaves the dataset untouched unless `--reset` was
/// given.
///
/// # Errors
///
/// Returns an error if the endpoint needs an advertiser id that is not
/// configured, the fetch fails, or the dataset cannot be written.
pub(crate) async fn run_fetch(
    client: &ApiClient,
    config: &AppConfig,
    endpoint: &str,
    params: &[(String, String)],
    page_size: u32,
    campaign_names: bool,
    target: UpsertTarget,
) -> anyhow::Result<()> {
    let endpoint = expand_endpoint(endpoint, config)?;
    let template = ApiRequest::get(endpoint.as_str()).params(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone()))),
    );
    let results = client.fetch_all_offset(&template, page_size).await?;
    let mut rows: Vec<Row> = results
        .iter()
        .map(|item| flatten_json(item, FLATTEN_SEPARATOR))
        .filter(|row| !row.is_empty())
        .collect();
    tracing::info!(%endpoint, rows = rows.len(), "fetch complete");

    if campaign_names {
        let filled = CampaignNames::new(client, &config.site_id)
            .fill(&mut rows)
            .await;
        tracing::info!(filled, "campaign names filled");
    }

    if rows.is_empty() && !target.options.reset {
        println!("no results from {endpoint}; {} left unchanged", target.path.display());
        return Ok(());
    }

    let report = upsert_blocking(target, rows).await?;
    print_report(&report);
    Ok(())
}

fn expand_endpoint(endpoint: &str, config: &AppConfig) -> anyhow::Result<String> {
    let expanded = endpoint.replace("{site_id}", &config.site_id);
    if !expanded.contains("{advertiser_id}") {
        return Ok(expanded);
    }
    let Some(advertiser_id) = config.advertiser_id.as_deref() else {
        bail!("`{endpoint}` needs an advertiser id; set ADVERTISER_ID");
    };
    Ok(expanded.replace("{advertiser_id}", advertiser_id))
}

/// Upsert the rows held in a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the dataset
/// cannot be written.
pub(crate) async fn run_upsert_file(
    path: PathBuf,
    rows_file: &Path,
    key_fields: Vec<String>,
    options: UpsertOptions,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(rows_file)
        .await
        .with_context(|| format!("failed to read {}", rows_file.display()))?;
    let rows = parse_rows(&raw)?;
    let report = upsert_blocking(
        UpsertTarget {
            path,
            key_fields,
            options,
        },
        rows,
    )
    .await?;
    print_report(&report);
    Ok(())
}

/// Accepts an array of objects, a `{"results": [...]}` page, or one object.
fn parse_rows(raw: &str) -> anyhow::Result<Vec<Row>> {
    let value: Value = serde_json::from_str(raw).context("rows file is not valid JSON")?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("results") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                object.insert("results".to_owned(), other);
                vec![Value::Object(object)]
            }
            None => vec![Value::Object(object)],
        },
        _ => bail!("rows file must hold a JSON array of objects"),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if item.is_object() {
                Ok(flatten_json(item, FLATTEN_SEPARATOR))
            } else {
                bail!("row {index} is not a JSON object")
            }
        })
        .collect()
}

/// The store blocks on its lock file, so it runs off the async workers.
async fn upsert_blocking(target: UpsertTarget, rows: Vec<Row>) -> anyhow::Result<UpsertReport> {
    let report = tokio::task::spawn_blocking(move || {
        upsert(&target.path, &rows, &target.key_fields, &target.options)
    })
    .await??;
    Ok(report)
}

fn print_report(report: &UpsertReport) {
    println!(
        "{}: {} inserted, {} updated, {} rows, {} columns",
        report.path.display(),
        report.inserted,
        report.updated,
        report.total_rows,
        report.header.len()
    );
}
