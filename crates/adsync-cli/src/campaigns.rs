//! Campaign-name enrichment for fetched rows.

use adsync_client::{ApiClient, ApiRequest, LookupCache};
use adsync_store::Row;
use serde_json::Value;

/// Looks up campaign names by id, caching hits for the life of one command.
pub(crate) struct CampaignNames<'a> {
    client: &'a ApiClient,
    site_id: String,
    cache: LookupCache<String, String>,
}

impl<'a> CampaignNames<'a> {
    pub(crate) fn new(client: &'a ApiClient, site_id: &str) -> Self {
        Self {
            client,
            site_id: site_id.to_owned(),
            cache: LookupCache::new(),
        }
    }

    /// Sets `campaign_name` on rows that have a `campaign_id` but no name.
    /// Returns how many rows were filled. Lookup failures leave the row as is.
    pub(crate) async fn fill(&self, rows: &mut [Row]) -> usize {
        let mut filled = 0;
        for row in rows.iter_mut() {
            if row.get("campaign_name").is_some_and(|name| !name.is_empty()) {
                continue;
            }
            let campaign_id = row.render("campaign_id");
            if campaign_id.is_empty() {
                continue;
            }
            if let Some(name) = self.lookup(&campaign_id).await {
                row.insert("campaign_name", name);
                filled += 1;
            }
        }
        filled
    }

    async fn lookup(&self, campaign_id: &str) -> Option<String> {
        let path = format!(
            "/advertising/{}/product_ads/campaigns/{campaign_id}",
            self.site_id
        );
        let fetched = self
            .cache
            .get_or_try_fetch(&campaign_id.to_owned(), || async {
                let response = self.client.call(ApiRequest::get(path.as_str())).await?;
                Ok::<_, adsync_client::ClientError>(response.as_json().and_then(campaign_name))
            })
            .await;
        match fetched {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(campaign_id, error = %e, "campaign name lookup failed");
                None
            }
        }
    }
}

/// The campaign name from a campaign detail body, which nests it differently
/// across API versions.
fn campaign_name(body: &Value) -> Option<String> {
    [
        body.get("name"),
        body.pointer("/campaign/name"),
        body.pointer("/data/name"),
    ]
    .into_iter()
    .flatten()
    .find_map(|name| name.as_str().filter(|s| !s.is_empty()).map(str::to_owned))
}
