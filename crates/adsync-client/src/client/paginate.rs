//! `limit`/`offset` pagination over list endpoints.

use serde_json::Value;

use crate::error::ClientError;
use crate::request::ApiRequest;

use super::ApiClient;

/// Maximum number of pages to fetch before returning an error.
/// Prevents infinite loops on endpoints that ignore `offset`.
///
/// Each page may itself be retried, so the worst-case request count is
/// `MAX_PAGES * (1 + max_retries)`.
pub const MAX_PAGES: usize = 500;

impl ApiClient {
    /// Fetches every page of an offset-paginated endpoint and concatenates
    /// the `results` arrays.
    ///
    /// `template` supplies the method, path, params, and headers; `limit` and
    /// `offset` are appended per page. Pagination stops at the first page
    /// shorter than `page_size`. A page that is not a JSON object ends
    /// pagination with a warning, keeping what was collected so far.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`ApiClient::call`]. Returns
    /// [`ClientError::PaginationLimit`] after [`MAX_PAGES`] full pages.
    pub async fn fetch_all_offset(
        &self,
        template: &ApiRequest,
        page_size: u32,
    ) -> Result<Vec<Value>, ClientError> {
        let page_size = page_size.max(1);
        let mut collected = Vec::new();
        let mut offset: u64 = 0;

        for page in 1..=MAX_PAGES {
            let request = template
                .clone()
                .param("limit", page_size)
                .param("offset", offset);
            let response = self.call(request).await?;

            let Some(Value::Object(mut body)) = response.into_json() else {
                tracing::warn!(
                    endpoint = %template.path,
                    offset,
                    "non-JSON page, stopping pagination"
                );
                return Ok(collected);
            };

            let batch = match body.remove("results") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let batch_len = batch.len();
            collected.extend(batch);
            tracing::debug!(endpoint = %template.path, page, batch_len, "fetched page");

            if batch_len < page_size as usize {
                return Ok(collected);
            }
            offset += u64::from(page_size);
        }

        Err(ClientError::PaginationLimit {
            endpoint: template.path.clone(),
            max_pages: MAX_PAGES,
        })
    }
}
