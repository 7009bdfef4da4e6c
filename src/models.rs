//! Core data models used throughout drive-qa.
//!
//! These types describe the items a listing returns, the files a caller
//! selects for a question, and the text that flows from extraction into the
//! model prompt. All of them are plain values scoped to a single request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a drive item is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// Identifies one item within the storage provider's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub drive_id: String,
    pub item_id: String,
    pub name: String,
    pub kind: ItemKind,
}

impl ResourceRef {
    /// Builds a reference from a raw provider item record.
    ///
    /// The kind is `Folder` only when the record carries a `folder` facet;
    /// anything else is a file regardless of its name. Returns `None` when
    /// the record has no `id`.
    pub fn from_item_json(item: &serde_json::Value, drive_id: &str) -> Option<Self> {
        let item_id = item.get("id")?.as_str()?.to_string();
        let name = item
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        let kind = if item.get("folder").is_some() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        Some(Self {
            drive_id: drive_id.to_string(),
            item_id,
            name,
            kind,
        })
    }
}

/// Read/write access derived from an item's permission roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySummary {
    /// Lower-cased, de-duplicated role labels.
    pub roles: BTreeSet<String>,
    pub can_read: bool,
    pub can_write: bool,
}

impl CapabilitySummary {
    /// Derives the flags from a set of role labels of any casing.
    pub fn from_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roles: BTreeSet<String> = roles
            .into_iter()
            .map(|r| r.as_ref().to_lowercase())
            .collect();
        let can_write = roles.contains("write");
        let can_read = can_write || roles.contains("read");
        Self {
            roles,
            can_read,
            can_write,
        }
    }
}

/// One row of a listing: the item plus what the caller may do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedItem {
    pub resource: ResourceRef,
    pub capabilities: CapabilitySummary,
}

/// Result of one resolver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingResult {
    pub origin_drive_id: String,
    pub items: Vec<ListedItem>,
}

/// JSON shape of a listing as served over HTTP.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListingResponse {
    pub drive_id: String,
    pub items: Vec<ListedItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListedItemResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub drive_id: String,
    pub roles: Vec<String>,
    #[serde(rename = "canRead")]
    pub can_read: bool,
    #[serde(rename = "canWrite")]
    pub can_write: bool,
}

impl From<ListingResult> for ListingResponse {
    fn from(listing: ListingResult) -> Self {
        let items = listing
            .items
            .into_iter()
            .map(|item| ListedItemResponse {
                id: item.resource.item_id,
                name: item.resource.name,
                kind: item.resource.kind,
                drive_id: item.resource.drive_id,
                roles: item.capabilities.roles.into_iter().collect(),
                can_read: item.capabilities.can_read,
                can_write: item.capabilities.can_write,
            })
            .collect();
        Self {
            drive_id: listing.origin_drive_id,
            items,
        }
    }
}

/// A file the caller picked as grounding material for a question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFile {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub drive_id: String,
    #[serde(default)]
    pub file_name: String,
}

impl SelectedFile {
    pub fn new(
        file_id: impl Into<String>,
        drive_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            drive_id: drive_id.into(),
            file_name: file_name.into(),
        }
    }

    /// Names of required fields that are empty or whitespace-only.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.file_id.trim().is_empty() {
            missing.push("file_id");
        }
        if self.drive_id.trim().is_empty() {
            missing.push("drive_id");
        }
        if self.file_name.trim().is_empty() {
            missing.push("file_name");
        }
        missing
    }
}

/// Text extracted from one selected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub file_name: String,
    pub text: String,
}

/// Concatenated, per-file-delimited context handed to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    pub document_count: usize,
    /// Total raw bytes fetched for all documents.
    pub fetched_bytes: usize,
}

impl AssembledContext {
    /// Concatenates documents in the given order, each block preceded by a
    /// blank line and a `--- name ---` delimiter line.
    pub fn from_documents(documents: &[ExtractedDocument], fetched_bytes: usize) -> Self {
        let mut text = String::new();
        for doc in documents {
            text.push_str("\n\n--- ");
            text.push_str(&doc.file_name);
            text.push_str(" ---\n");
            text.push_str(&doc.text);
        }
        Self {
            text,
            document_count: documents.len(),
            fetched_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_alone_implies_read() {
        let caps = CapabilitySummary::from_roles(["write"]);
        assert!(caps.can_read);
        assert!(caps.can_write);
    }

    #[test]
    fn roles_are_case_folded_and_deduplicated() {
        let caps = CapabilitySummary::from_roles(["Read", "read", "WRITE"]);
        let expected = CapabilitySummary::from_roles(["read", "write"]);
        assert_eq!(caps, expected);
        assert_eq!(caps.roles.len(), 2);
        assert!(caps.can_read && caps.can_write);
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let caps = CapabilitySummary::from_roles(["owner", "sp.full control"]);
        assert!(!caps.can_read);
        assert!(!caps.can_write);
    }

    #[test]
    fn kind_comes_from_folder_facet_not_extension() {
        let folder = json!({"id": "1", "name": "report.pdf", "folder": {"childCount": 2}});
        let file = json!({"id": "2", "name": "Archive"});
        assert_eq!(
            ResourceRef::from_item_json(&folder, "d").unwrap().kind,
            ItemKind::Folder
        );
        assert_eq!(
            ResourceRef::from_item_json(&file, "d").unwrap().kind,
            ItemKind::File
        );
    }

    #[test]
    fn blocks_keep_input_order() {
        let docs = vec![
            ExtractedDocument {
                file_name: "a.txt".into(),
                text: "alpha".into(),
            },
            ExtractedDocument {
                file_name: "b.txt".into(),
                text: "beta".into(),
            },
        ];
        let ctx = AssembledContext::from_documents(&docs, 9);
        assert_eq!(ctx.text, "\n\n--- a.txt ---\nalpha\n\n--- b.txt ---\nbeta");
        assert_eq!(ctx.document_count, 2);
    }

    #[test]
    fn listing_serializes_with_wire_names() {
        let listing = ListingResult {
            origin_drive_id: "d1".into(),
            items: vec![ListedItem {
                resource: ResourceRef {
                    drive_id: "d1".into(),
                    item_id: "i1".into(),
                    name: "notes.txt".into(),
                    kind: ItemKind::File,
                },
                capabilities: CapabilitySummary::from_roles(["read"]),
            }],
        };
        let value = serde_json::to_value(ListingResponse::from(listing)).unwrap();
        assert_eq!(value["drive_id"], "d1");
        assert_eq!(value["items"][0]["type"], "file");
        assert_eq!(value["items"][0]["canRead"], true);
        assert_eq!(value["items"][0]["canWrite"], false);
        assert_eq!(value["items"][0]["roles"], json!(["read"]));
    }
}
