//! Content addressing
//!
//! External content IDs are the URL-safe base64 encoding (with padding) of
//! the UTF-8 storage key. Keys ending in `/` are folders and the empty key is
//! the bucket root, so the root ID is the empty string.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use thiserror::Error;

/// ID of the bucket root
pub const ROOT_ID: &str = "";

/// Encodes with padding, accepts IDs with or without it.
const ID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Content ID errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ContentIdError {
    #[error("Invalid content id: {0}")]
    Decode(String),

    #[error("Content id is not valid UTF-8")]
    Utf8,

    #[error("Folder key has no object name: {0}")]
    FolderKey(String),
}

/// Storage key to external ID
pub fn metadata_id(key: &str) -> String {
    ID_ENGINE.encode(key.as_bytes())
}

/// External ID to storage key
pub fn object_key(id: &str) -> Result<String, ContentIdError> {
    let bytes = ID_ENGINE
        .decode(id.trim())
        .map_err(|e| ContentIdError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|_| ContentIdError::Utf8)
}

/// Last `/`-delimited segment of a file key
pub fn object_name(key: &str) -> Result<&str, ContentIdError> {
    if is_folder_key(key) {
        return Err(ContentIdError::FolderKey(key.to_string()));
    }
    Ok(key.rsplit('/').next().unwrap_or(key))
}

/// Last segment of a folder prefix, without the trailing `/`
pub fn folder_name(prefix: &str) -> &str {
    let trimmed = prefix.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Folder keys end in `/`; the root key is empty
pub fn is_folder_key(key: &str) -> bool {
    key.is_empty() || key.ends_with('/')
}

/// Prefix of the folder that contains `key`, including the trailing `/`
pub fn parent_prefix(key: &str) -> &str {
    let trimmed = key.strip_suffix('/').unwrap_or(key);
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => "",
    }
}
