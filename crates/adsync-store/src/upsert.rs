//! Idempotent keyed upsert into a CSV dataset.
//!
//! A merge runs under the dataset lock: read the file, fold the incoming
//! batch into it by key, compute the header, and atomically replace the file.
//! The file on disk is always either the old or the new version.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;

use crate::dataset::{parent_dir, read_dataset, write_atomic, Dataset};
use crate::error::StoreError;
use crate::lock::{DatasetLock, LockOptions};
use crate::row::Row;

/// Columns that lead the header, in this order, when present.
pub const PREFERRED_COLUMNS: &[&str] = &[
    "advertiser_id",
    "site_id",
    "date",
    "campaign_id",
    "campaign_name",
    "ad_id",
    "item_id",
    "item_title",
    "seller_sku",
    "status",
];

/// How columns outside `schema` are ordered in the written header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderOrder {
    /// Preferred columns first in their fixed order, then the rest sorted.
    #[default]
    Preferred,
    /// Existing header order, with new columns appended as first seen.
    Insertion,
}

/// Knobs for [`upsert`]. Empty lists mean "not set".
#[derive(Debug, Clone)]
pub struct UpsertOptions {
    /// Columns that always lead the header, in this order. With
    /// `allow_new_columns = false` it is also the full column set.
    pub schema: Vec<String>,
    /// When `false`, columns outside the known header (`schema`, else the
    /// existing or fallback header) are discarded. The first batch written
    /// to an empty dataset with no schema establishes the header.
    pub allow_new_columns: bool,
    /// Limit the header to columns holding a value in at least one row.
    pub strict_header: bool,
    /// Columns removed from every row and from the header.
    pub drop_fields: Vec<String>,
    /// Stable sort of the merged rows by these columns' rendered values.
    pub sort_by: Vec<String>,
    /// Discard the existing file and rebuild from this batch alone.
    pub reset: bool,
    /// Header used when the file is absent or has no header row.
    pub fallback_header: Vec<String>,
    pub header_order: HeaderOrder,
    pub preferred_columns: Vec<String>,
    pub lock: LockOptions,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            schema: Vec::new(),
            allow_new_columns: true,
            strict_header: false,
            drop_fields: Vec::new(),
            sort_by: Vec::new(),
            reset: false,
            fallback_header: Vec::new(),
            header_order: HeaderOrder::default(),
            preferred_columns: PREFERRED_COLUMNS.iter().map(|&c| c.to_owned()).collect(),
            lock: LockOptions::default(),
        }
    }
}

/// Outcome of one [`upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertReport {
    pub path: PathBuf,
    /// Incoming rows whose key was new to the dataset.
    pub inserted: usize,
    /// Incoming rows merged into an existing key.
    pub updated: usize,
    pub total_rows: usize,
    pub header: Vec<String>,
}

/// Merges `rows` into the CSV dataset at `path`, keyed by `key_fields`.
///
/// An incoming row whose key exists overwrites only the columns it carries a
/// non-empty value for; a new key is appended. Existing rows keep their
/// position, new rows keep first-seen order. Running the same batch twice
/// leaves the file byte-identical.
///
/// # Errors
///
/// - [`StoreError::InvalidRows`] if `key_fields` is empty.
/// - [`StoreError::LockTimeout`] if another writer holds the dataset.
/// - [`StoreError::DatasetRead`] if the existing file is corrupt.
/// - [`StoreError::DatasetWrite`] / [`StoreError::Io`] if the new version
///   cannot be written; the old file is left in place.
pub fn upsert<S: AsRef<str>>(
    path: impl AsRef<Path>,
    rows: &[Row],
    key_fields: &[S],
    options: &UpsertOptions,
) -> Result<UpsertReport, StoreError> {
    let path = path.as_ref();
    let key_fields: Vec<&str> = key_fields.iter().map(|k| k.as_ref()).collect();
    if key_fields.is_empty() {
        return Err(StoreError::InvalidRows(
            "at least one key field is required".to_owned(),
        ));
    }

    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(StoreError::io(dir))?;
    let _lock = DatasetLock::acquire(path, &options.lock)?;

    let existing = if options.reset {
        reset_file(path);
        Dataset::empty(path)
    } else {
        read_dataset(path)?
    };

    let known_header = if existing.header.is_empty() {
        options.fallback_header.clone()
    } else {
        existing.header
    };

    let mut merge = Merge::new(&key_fields);
    let collapsed = merge.seed(existing.rows);
    if collapsed > 0 {
        tracing::warn!(path = %path.display(), collapsed, "collapsed duplicate keys in existing dataset");
    }
    let mut incoming_columns: IndexSet<String> = IndexSet::new();
    for row in rows {
        incoming_columns.extend(row.columns().map(str::to_owned));
        merge.apply(row.clone().without_empty());
    }

    let mut merged = merge.rows;
    for field in &options.drop_fields {
        for row in &mut merged {
            row.remove(field);
        }
    }

    let header = compute_header(&known_header, &incoming_columns, &merged, options);

    if !options.sort_by.is_empty() {
        merged.sort_by_cached_key(|row| row.key_tuple(options.sort_by.as_slice()));
    }

    write_atomic(path, &header, &merged)?;

    tracing::info!(
        path = %path.display(),
        inserted = merge.inserted,
        updated = merge.updated,
        rows = merged.len(),
        columns = header.len(),
        "dataset upserted"
    );

    Ok(UpsertReport {
        path: path.to_path_buf(),
        inserted: merge.inserted,
        updated: merge.updated,
        total_rows: merged.len(),
        header,
    })
}

/// Rows indexed by key tuple, with counters for the report.
struct Merge<'k> {
    key_fields: &'k [&'k str],
    index: HashMap<Vec<String>, usize>,
    rows: Vec<Row>,
    inserted: usize,
    updated: usize,
}

impl<'k> Merge<'k> {
    fn new(key_fields: &'k [&'k str]) -> Self {
        Self {
            key_fields,
            index: HashMap::new(),
            rows: Vec::new(),
            inserted: 0,
            updated: 0,
        }
    }

    /// Loads existing rows, folding repeated keys into their first
    /// occurrence. Returns how many rows were folded.
    fn seed(&mut self, rows: Vec<Row>) -> usize {
        let mut collapsed = 0;
        for row in rows {
            if self.fold(row) {
                collapsed += 1;
            }
        }
        collapsed
    }

    fn apply(&mut self, row: Row) {
        if self.fold(row) {
            self.updated += 1;
        } else {
            self.inserted += 1;
        }
    }

    /// Returns `true` when `row` was merged into an existing key.
    fn fold(&mut self, row: Row) -> bool {
        let key = row.key_tuple(self.key_fields);
        if let Some(&position) = self.index.get(&key) {
            self.rows[position].merge_non_empty(&row);
            true
        } else {
            self.index.insert(key, self.rows.len());
            self.rows.push(row);
            false
        }
    }
}

/// Reduces the known header, incoming columns, and merged rows to the
/// header that is written.
fn compute_header(
    known_header: &[String],
    incoming_columns: &IndexSet<String>,
    merged: &[Row],
    options: &UpsertOptions,
) -> Vec<String> {
    let mut universe: IndexSet<&str> = IndexSet::new();
    universe.extend(options.schema.iter().map(String::as_str));

    let restricted = !options.allow_new_columns;
    if !(restricted && !options.schema.is_empty()) {
        universe.extend(known_header.iter().map(String::as_str));
    }
    if !restricted || universe.is_empty() {
        universe.extend(incoming_columns.iter().map(String::as_str));
        for row in merged {
            universe.extend(row.columns());
        }
    }

    universe.retain(|column| !column.is_empty() && !options.drop_fields.iter().any(|f| f == column));

    if options.strict_header {
        universe.retain(|column| {
            merged
                .iter()
                .any(|row| row.get(column).is_some_and(|v| !v.is_empty()))
        });
    }

    order_header(&universe, options)
}

fn order_header(universe: &IndexSet<&str>, options: &UpsertOptions) -> Vec<String> {
    let mut header: IndexSet<&str> = options
        .schema
        .iter()
        .map(String::as_str)
        .filter(|column| universe.contains(column))
        .collect();

    match options.header_order {
        HeaderOrder::Preferred => {
            header.extend(
                options
                    .preferred_columns
                    .iter()
                    .map(String::as_str)
                    .filter(|column| universe.contains(column)),
            );
            let mut rest: Vec<&str> = universe
                .iter()
                .copied()
                .filter(|column| !header.contains(column))
                .collect();
            rest.sort_unstable();
            header.extend(rest);
        }
        HeaderOrder::Insertion => header.extend(universe.iter().copied()),
    }

    header.into_iter().map(str::to_owned).collect()
}

fn reset_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "dataset reset"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not delete dataset for reset"),
    }
}

#[cfg(test)]
#[path = "upsert_test.rs"]
mod tests;
