//! Content metadata as exposed by the REST API

use super::id::{folder_name, metadata_id, ROOT_ID};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Folder,
}

/// Metadata of a file or folder, derived from storage state on every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub name: String,
    /// Epoch milliseconds
    pub modified: Option<i64>,
    /// Reserved, always null
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
}

impl ContentMetadata {
    pub fn file(
        key: &str,
        name: impl Into<String>,
        size: Option<u64>,
        hash: Option<String>,
        modified: Option<i64>,
    ) -> Self {
        Self {
            id: metadata_id(key),
            kind: ContentKind::File,
            name: name.into(),
            modified,
            parent_id: None,
            file_size: size,
            file_hash: hash,
        }
    }

    pub fn folder(prefix: &str) -> Self {
        Self {
            id: metadata_id(prefix),
            kind: ContentKind::Folder,
            name: folder_name(prefix).to_string(),
            modified: None,
            parent_id: None,
            file_size: None,
            file_hash: None,
        }
    }

    pub fn root() -> Self {
        Self {
            id: ROOT_ID.to_string(),
            kind: ContentKind::Folder,
            name: String::new(),
            modified: None,
            parent_id: None,
            file_size: None,
            file_hash: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ContentKind::Folder
    }
}
