pub mod dataset;
pub mod error;
pub mod lock;
pub mod row;
pub mod upsert;

pub use dataset::{read_dataset, Dataset};
pub use error::StoreError;
pub use lock::{DatasetLock, LockOptions};
pub use row::{flatten_json, Row, Scalar};
pub use upsert::{upsert, HeaderOrder, UpsertOptions, UpsertReport, PREFERRED_COLUMNS};
