pub mod cache;
pub mod client;
pub mod credentials;
pub mod error;
pub mod request;
pub mod retry;
pub mod storage;
pub mod token;

pub use cache::LookupCache;
pub use client::{ApiClient, ClientSettings, VersionRule};
pub use credentials::{Clock, CredentialStore, SystemClock};
pub use error::ClientError;
pub use request::{ApiRequest, ApiResponse};
pub use retry::RetryPolicy;
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use token::TokenRecord;
