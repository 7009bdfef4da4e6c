//! URL builders for the storage provider's REST endpoints.
//!
//! Ids and path segments are percent-encoded here so callers can pass
//! user-visible names (`Shared Documents/Q3 #1`) straight through.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

/// Encodes a `/`-separated path, escaping each segment but keeping the
/// separators. Empty segments are dropped.
fn path(p: &str) -> String {
    p.split('/')
        .filter(|s| !s.is_empty())
        .map(segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Endpoint factory rooted at a provider base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn my_drive(&self) -> String {
        format!("{}/me/drive", self.base)
    }

    /// Children of a path in the caller's own drive; the root when `p` is empty.
    pub fn my_drive_children(&self, p: &str) -> String {
        let encoded = path(p);
        if encoded.is_empty() {
            format!("{}/me/drive/root/children", self.base)
        } else {
            format!("{}/me/drive/root:/{}:/children", self.base, encoded)
        }
    }

    pub fn item_children(&self, drive_id: &str, item_id: &str) -> String {
        format!(
            "{}/drives/{}/items/{}/children",
            self.base,
            segment(drive_id),
            segment(item_id)
        )
    }

    pub fn item_permissions(&self, drive_id: &str, item_id: &str) -> String {
        format!(
            "{}/drives/{}/items/{}/permissions",
            self.base,
            segment(drive_id),
            segment(item_id)
        )
    }

    pub fn item_content(&self, drive_id: &str, item_id: &str) -> String {
        format!(
            "{}/drives/{}/items/{}/content",
            self.base,
            segment(drive_id),
            segment(item_id)
        )
    }

    pub fn share_drive_item(&self, share_url: &str) -> String {
        format!("{}/shares/{}/driveItem", self.base, encode_share_url(share_url))
    }

    /// Root site of a SharePoint host.
    pub fn site(&self, hostname: &str) -> String {
        format!("{}/sites/{}:/", self.base, segment(hostname))
    }

    pub fn site_path_children(&self, site_id: &str, p: &str) -> String {
        format!(
            "{}/sites/{}/drive/root:/{}:/children",
            self.base,
            segment(site_id),
            path(p)
        )
    }
}

/// Turns a sharing URL into the provider's opaque share id:
/// unpadded URL-safe base64 of the raw URL, prefixed with `u!`.
pub fn encode_share_url(url: &str) -> String {
    format!("u!{}", URL_SAFE_NO_PAD.encode(url.as_bytes()))
}
