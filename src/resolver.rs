//! Resource resolution.
//!
//! Turns whatever the user pasted into the folder box into a uniform
//! [`ListingResult`]. Three addressing schemes are recognised, checked in
//! this order:
//!
//! | Input | Scheme | Provider calls |
//! |-------|--------|----------------|
//! | empty or relative path (`Reports/2024`) | [`AddressScheme::DrivePath`] | `/me/drive/root:/{path}:/children`, `/me/drive` |
//! | URL with a share marker segment (`/:f:/`, `/:u:/`) | [`AddressScheme::ShareLink`] | `/shares/u!{b64}/driveItem`, then children if a folder |
//! | any other URL | [`AddressScheme::SiteUrl`] | `/sites/{host}:/{site}`, `/sites/{id}/drive/root:/{path}:/children` |
//!
//! Every listed item is decorated with its [`CapabilitySummary`](crate::models::CapabilitySummary).
//! Any failure aborts the whole listing.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::config::{Config, ResolverConfig};
use crate::credential::Credential;
use crate::endpoints::Endpoints;
use crate::error::{DenialReason, DriveError};
use crate::models::{ItemKind, ListingResult, ResourceRef};
use crate::permissions::PermissionAggregator;
use crate::remote::RemoteResourceClient;

/// How a user-supplied address will be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressScheme {
    /// Path inside the caller's own drive, percent-decoded, without
    /// leading or trailing slashes. Empty means the drive root.
    DrivePath(String),
    /// Opaque sharing URL, kept verbatim for encoding.
    ShareLink(String),
    /// Team-site navigation URL.
    SiteUrl {
        hostname: String,
        /// Library-relative folder path, starting at the library folder.
        library_path: String,
    },
}

impl AddressScheme {
    pub fn label(&self) -> &'static str {
        match self {
            AddressScheme::DrivePath(_) => "drive_path",
            AddressScheme::ShareLink(_) => "share_link",
            AddressScheme::SiteUrl { .. } => "site_url",
        }
    }
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn has_scheme(input: &str) -> bool {
    let lower = input.get(..8).unwrap_or(input).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Decides which addressing scheme applies to `input`.
pub fn classify(input: &str, config: &ResolverConfig) -> Result<AddressScheme, DriveError> {
    let input = input.trim();

    if !has_scheme(input) {
        let path = decode(input);
        return Ok(AddressScheme::DrivePath(path.trim_matches('/').to_string()));
    }

    let url = Url::parse(input)
        .map_err(|e| DriveError::MalformedInput(format!("Invalid URL '{}': {}", input, e)))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();

    let is_share = segments.iter().any(|segment| {
        config
            .share_markers
            .iter()
            .any(|marker| *segment == format!(":{}:", marker))
    });
    if is_share {
        return Ok(AddressScheme::ShareLink(input.to_string()));
    }

    let hostname = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => return Err(DriveError::MalformedInput("Invalid SharePoint URL".to_string())),
    };

    // Navigation URLs may embed the real path after an `/r/` segment.
    let start = segments
        .iter()
        .rposition(|s| *s == "r")
        .map(|i| i + 1)
        .unwrap_or(0);
    let parts: Vec<String> = segments[start..]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| decode(s))
        .collect();

    let library = config.library_folder.as_str();
    let idx = parts
        .iter()
        .position(|p| p.eq_ignore_ascii_case(library))
        .ok_or_else(|| {
            DriveError::MalformedInput(format!(
                "Unable to extract SharePoint document path: '{}' not found in URL",
                library
            ))
        })?;

    // Library view pages (`Forms/AllItems.aspx`) address the library itself.
    let mut folder = &parts[idx..];
    if let [rest @ .., forms, page] = folder {
        if forms.eq_ignore_ascii_case("forms") && page.to_ascii_lowercase().ends_with(".aspx") {
            folder = rest;
        }
    }

    Ok(AddressScheme::SiteUrl {
        hostname,
        library_path: folder.join("/"),
    })
}

/// Where a child record's drive id comes from.
#[derive(Clone, Copy)]
enum ChildDrive<'a> {
    /// All children live in this drive.
    Fixed(&'a str),
    /// Read `parentReference.driveId` from each record.
    FromParentReference,
}

fn parent_drive_id(item: &serde_json::Value) -> Option<&str> {
    item.get("parentReference")?.get("driveId")?.as_str()
}

fn missing_field(what: &str) -> DriveError {
    DriveError::RemoteFetch {
        status: None,
        body: format!("provider response is missing {}", what),
        file: None,
    }
}

pub struct ResourceResolver<'a> {
    client: &'a dyn RemoteResourceClient,
    endpoints: &'a Endpoints,
    config: &'a ResolverConfig,
    permissions: PermissionAggregator<'a>,
    max_pages: usize,
}

impl<'a> ResourceResolver<'a> {
    pub fn new(
        client: &'a dyn RemoteResourceClient,
        endpoints: &'a Endpoints,
        config: &'a Config,
    ) -> Self {
        Self {
            client,
            endpoints,
            config: &config.resolver,
            permissions: PermissionAggregator::new(
                client,
                endpoints,
                config.permissions.concurrency,
            ),
            max_pages: config.graph.max_pages,
        }
    }

    /// Lists the items addressed by `path_or_url`.
    pub async fn resolve(
        &self,
        path_or_url: &str,
        cred: &Credential,
    ) -> Result<ListingResult, DriveError> {
        let scheme = classify(path_or_url, self.config)?;
        tracing::debug!(scheme = scheme.label(), "resolving listing");

        let listing = match scheme {
            AddressScheme::DrivePath(path) => self.list_my_drive(&path, cred).await?,
            AddressScheme::ShareLink(url) => self.resolve_share(&url, cred).await?,
            AddressScheme::SiteUrl {
                hostname,
                library_path,
            } => self.resolve_site(&hostname, &library_path, cred).await?,
        };

        tracing::debug!(
            drive_id = %listing.origin_drive_id,
            items = listing.items.len(),
            "listing resolved"
        );
        Ok(listing)
    }

    /// Lists a folder addressed directly by drive and item id.
    pub async fn list_children(
        &self,
        drive_id: &str,
        item_id: &str,
        cred: &Credential,
    ) -> Result<ListingResult, DriveError> {
        let url = self.endpoints.item_children(drive_id, item_id);
        let refs = self
            .fetch_children(
                url,
                ChildDrive::Fixed(drive_id),
                "Folder not found or inaccessible",
                cred,
            )
            .await?;
        let items = self.permissions.decorate(refs, cred).await?;
        Ok(ListingResult {
            origin_drive_id: drive_id.to_string(),
            items,
        })
    }

    async fn list_my_drive(&self, path: &str, cred: &Credential) -> Result<ListingResult, DriveError> {
        let drive = self
            .client
            .get_json(&self.endpoints.my_drive(), cred)
            .await
            .map_err(|e| DriveError::from_remote(e, "Drive not found"))?;
        let drive_id = drive
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("drive id"))?;

        let refs = self
            .fetch_children(
                self.endpoints.my_drive_children(path),
                ChildDrive::Fixed(drive_id),
                "Folder not found or inaccessible",
                cred,
            )
            .await?;
        let items = self.permissions.decorate(refs, cred).await?;
        Ok(ListingResult {
            origin_drive_id: drive_id.to_string(),
            items,
        })
    }

    async fn resolve_share(&self, share_url: &str, cred: &Credential) -> Result<ListingResult, DriveError> {
        let item = self
            .client
            .get_json(&self.endpoints.share_drive_item(share_url), cred)
            .await
            .map_err(|e| match DriveError::from_remote(e, "Unable to resolve shared link") {
                DriveError::AccessDenied {
                    reason: DenialReason::NoAccess,
                    ..
                } => DriveError::no_access("You do not have access to this shared link"),
                other => other,
            })?;

        let drive_id =
            parent_drive_id(&item).ok_or_else(|| missing_field("parentReference.driveId"))?;
        let resource = ResourceRef::from_item_json(&item, drive_id)
            .ok_or_else(|| missing_field("shared item id"))?;

        match resource.kind {
            ItemKind::File => {
                let items = self.permissions.decorate(vec![resource], cred).await?;
                Ok(ListingResult {
                    origin_drive_id: drive_id.to_string(),
                    items,
                })
            }
            ItemKind::Folder => self.list_children(drive_id, &resource.item_id, cred).await,
        }
    }

    async fn resolve_site(
        &self,
        hostname: &str,
        library_path: &str,
        cred: &Credential,
    ) -> Result<ListingResult, DriveError> {
        let site = self
            .client
            .get_json(&self.endpoints.site(hostname), cred)
            .await
            .map_err(|e| DriveError::from_remote(e, "Unable to resolve SharePoint site"))?;
        let site_id = site
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("site id"))?;

        let refs = self
            .fetch_children(
                self.endpoints.site_path_children(site_id, library_path),
                ChildDrive::FromParentReference,
                "Document library path not found",
                cred,
            )
            .await?;
        let items = self.permissions.decorate(refs, cred).await?;
        Ok(ListingResult {
            origin_drive_id: site_id.to_string(),
            items,
        })
    }

    /// Collects every child record, following `@odata.nextLink` pages.
    async fn fetch_children(
        &self,
        first_page: String,
        drive: ChildDrive<'_>,
        not_found: &str,
        cred: &Credential,
    ) -> Result<Vec<ResourceRef>, DriveError> {
        let mut refs = Vec::new();
        let mut next = Some(first_page);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages >= self.max_pages {
                tracing::warn!(pages, "children listing truncated at page limit");
                break;
            }
            pages += 1;

            let page = self
                .client
                .get_json(&url, cred)
                .await
                .map_err(|e| DriveError::from_remote(e, not_found))?;

            for item in page.get("value").and_then(|v| v.as_array()).into_iter().flatten() {
                let drive_id = match drive {
                    ChildDrive::Fixed(id) => id,
                    ChildDrive::FromParentReference => parent_drive_id(item)
                        .ok_or_else(|| missing_field("parentReference.driveId"))?,
                };
                let resource = ResourceRef::from_item_json(item, drive_id)
                    .ok_or_else(|| missing_field("item id"))?;
                refs.push(resource);
            }

            next = page
                .get("@odata.nextLink")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }

        Ok(refs)
    }
}
