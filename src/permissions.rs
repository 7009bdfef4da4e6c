//! Permission aggregation.
//!
//! Fetches an item's access-control entries and reduces their role labels to
//! a [`CapabilitySummary`]. Summaries are recomputed on every call; access can
//! change between two listings.
//!
//! [`PermissionAggregator::decorate`] fetches the permissions of a whole
//! listing with a bounded fan-out. `buffered` yields results in submission
//! order, so the decorated listing keeps the provider's item order no matter
//! which request finishes first.

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::credential::Credential;
use crate::endpoints::Endpoints;
use crate::error::DriveError;
use crate::models::{CapabilitySummary, ListedItem, ResourceRef};
use crate::remote::RemoteResourceClient;

/// Reduces a provider permission listing (`{"value": [{"roles": [...]}, ...]}`)
/// to a capability summary. Missing or non-string roles are ignored.
pub fn summarize_roles(permissions: &serde_json::Value) -> CapabilitySummary {
    let roles = permissions
        .get("value")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("roles").and_then(|r| r.as_array()))
        .flatten()
        .filter_map(|role| role.as_str());
    CapabilitySummary::from_roles(roles)
}

pub struct PermissionAggregator<'a> {
    client: &'a dyn RemoteResourceClient,
    endpoints: &'a Endpoints,
    concurrency: usize,
}

impl<'a> PermissionAggregator<'a> {
    pub fn new(
        client: &'a dyn RemoteResourceClient,
        endpoints: &'a Endpoints,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            endpoints,
            concurrency: concurrency.max(1),
        }
    }

    /// Capability summary of one item.
    pub async fn capabilities(
        &self,
        drive_id: &str,
        item_id: &str,
        cred: &Credential,
    ) -> Result<CapabilitySummary, DriveError> {
        let url = self.endpoints.item_permissions(drive_id, item_id);
        let perms = self
            .client
            .get_json(&url, cred)
            .await
            .map_err(|e| DriveError::from_remote(e, "Item not found or inaccessible"))?;
        Ok(summarize_roles(&perms))
    }

    /// Attaches a capability summary to every item, preserving order.
    ///
    /// The first failure aborts the whole decoration; a listing never comes
    /// back partially decorated.
    pub async fn decorate(
        &self,
        items: Vec<ResourceRef>,
        cred: &Credential,
    ) -> Result<Vec<ListedItem>, DriveError> {
        let count = items.len();
        let decorated: Vec<ListedItem> = stream::iter(items)
            .map(|resource| async move {
                let capabilities = self
                    .capabilities(&resource.drive_id, &resource.item_id, cred)
                    .await?;
                Ok::<_, DriveError>(ListedItem {
                    resource,
                    capabilities,
                })
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        tracing::debug!(items = count, concurrency = self.concurrency, "permissions fetched");
        Ok(decorated)
    }
}
