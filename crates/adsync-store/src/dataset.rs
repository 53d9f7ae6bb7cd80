//! Reading a dataset file into memory and writing it back atomically.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::row::{Row, Scalar};

/// An in-memory copy of a dataset file.
///
/// Rows are sparse: empty cells are not stored, so a column that exists only
/// in `header` renders empty for every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub path: PathBuf,
    pub header: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Reads the dataset at `path`. A missing file is an empty dataset.
///
/// Repeated header names are collapsed: the first position wins and later
/// columns only fill it when it is empty.
///
/// # Errors
///
/// - [`StoreError::DatasetRead`] if the file is not valid CSV (ragged rows,
///   invalid UTF-8).
/// - [`StoreError::Io`] if the file exists but cannot be opened.
pub fn read_dataset(path: impl AsRef<Path>) -> Result<Dataset, StoreError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Dataset::empty(path)),
        Err(e) => return Err(StoreError::io(path)(e)),
    };

    let read_error = |source| StoreError::DatasetRead {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new().from_reader(file);
    let columns: Vec<String> = reader
        .headers()
        .map_err(read_error)?
        .iter()
        .map(str::to_owned)
        .collect();

    let mut header: Vec<String> = Vec::with_capacity(columns.len());
    for column in &columns {
        if !column.is_empty() && !header.contains(column) {
            header.push(column.clone());
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(read_error)?;
        let mut row = Row::new();
        for (column, value) in columns.iter().zip(record.iter()) {
            if column.is_empty() || value.is_empty() || row.get(column).is_some() {
                continue;
            }
            row.insert(column.as_str(), Scalar::Text(value.to_owned()));
        }
        rows.push(row);
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), columns = header.len(), "dataset read");
    Ok(Dataset {
        path: path.to_path_buf(),
        header,
        rows,
    })
}

/// Writes `header` and `rows` to a temp file beside `path`, then renames it
/// over `path`. On any failure the original file is untouched.
pub(crate) fn write_atomic(path: &Path, header: &[String], rows: &[Row]) -> Result<(), StoreError> {
    let dir = parent_dir(path);
    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(StoreError::io(dir))?;
    let tmp_path = tmp.path().to_path_buf();

    let write_error = |source| StoreError::DatasetWrite {
        path: path.to_path_buf(),
        source,
    };

    if !header.is_empty() {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(tmp.as_file_mut());
        writer.write_record(header).map_err(write_error)?;
        for row in rows {
            writer
                .write_record(header.iter().map(|column| row.render(column)))
                .map_err(write_error)?;
        }
        writer.flush().map_err(StoreError::io(&tmp_path))?;
    }
    carry_permissions(path, tmp.as_file()).map_err(StoreError::io(&tmp_path))?;
    tmp.as_file().sync_all().map_err(StoreError::io(tmp_path))?;

    tmp.persist(path).map_err(|e| StoreError::io(path)(e.error))?;
    Ok(())
}

/// Gives the temp file the target's mode so a rewrite never narrows it.
/// Temp files are created owner-only, so a new dataset gets 0644 instead.
fn carry_permissions(target: &Path, tmp: &File) -> io::Result<()> {
    match fs::metadata(target) {
        Ok(meta) => tmp.set_permissions(meta.permissions()),
        Err(e) if e.kind() == ErrorKind::NotFound => set_new_file_mode(tmp),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn set_new_file_mode(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn set_new_file_mode(_file: &File) -> io::Result<()> {
    Ok(())
}

/// The directory holding `path`; bare file names resolve to `.`.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
