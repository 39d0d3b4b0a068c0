//! Upload module
//!
//! Resumable uploads are backed by S3 multipart uploads. The gateway keeps
//! no session state: the [`UploadSessionToken`] handed to the client carries
//! both the object key and the S3 upload id, and each segment's part ETag
//! travels back to the client in the segment cookie.
//!
//! Lifecycle: created → segment-uploading (any order) → completed | aborted.

use crate::content::id;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod verify;

pub use verify::{IntegrityProbe, VerifyingStream};

/// Separator between the two encoded halves of a session token
const TOKEN_SEPARATOR: &str = "::";

/// Highest part number S3 accepts
pub const MAX_SEGMENT_NUMBER: u32 = 10_000;

/// Upload session errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UploadSessionError {
    #[error("Malformed upload id")]
    Malformed,

    #[error("Invalid upload id: {0}")]
    Decode(String),
}

/// Self-describing handle of a resumable upload:
/// `base64url(object_key) + "::" + base64url(s3_upload_id)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSessionToken {
    object_key: String,
    upload_id: String,
}

impl UploadSessionToken {
    pub fn new(object_key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            upload_id: upload_id.into(),
        }
    }

    /// Storage key the upload will create or replace
    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// S3 multipart upload id
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            URL_SAFE.encode(self.object_key.as_bytes()),
            TOKEN_SEPARATOR,
            URL_SAFE.encode(self.upload_id.as_bytes())
        )
    }

    pub fn decode(token: &str) -> Result<Self, UploadSessionError> {
        let (key_part, upload_part) = token
            .trim()
            .split_once(TOKEN_SEPARATOR)
            .ok_or(UploadSessionError::Malformed)?;
        if upload_part.contains(TOKEN_SEPARATOR) || upload_part.is_empty() {
            return Err(UploadSessionError::Malformed);
        }

        let object_key =
            id::object_key(key_part).map_err(|e| UploadSessionError::Decode(e.to_string()))?;
        let upload_id =
            id::object_key(upload_part).map_err(|e| UploadSessionError::Decode(e.to_string()))?;
        Ok(Self::new(object_key, upload_id))
    }
}

impl fmt::Display for UploadSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for UploadSessionToken {
    type Err = UploadSessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Opaque per-segment state echoed back by the client on completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCookie {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Upload-level cookie; currently always empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCookie {}

/// One segment of a resumable upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSegment {
    pub number: u32,
    pub sha256: String,
    pub size: u64,
    #[serde(default)]
    pub cookie: SegmentCookie,
}

impl UploadSegment {
    pub fn validate(&self) -> Result<(), String> {
        if self.number < 1 {
            return Err("Segment number must be > 0.".into());
        }
        if self.number > MAX_SEGMENT_NUMBER {
            return Err(format!(
                "Segment number must be <= {}.",
                MAX_SEGMENT_NUMBER
            ));
        }
        if self.sha256.is_empty() {
            return Err(format!("Segment {} has no sha256.", self.number));
        }
        if self.size == 0 {
            return Err(format!("Segment {} has zero size.", self.number));
        }
        Ok(())
    }
}

/// Response to starting an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: String,
    pub segments: Vec<UploadSegment>,
    #[serde(default)]
    pub cookie: UploadCookie,
}

/// Response to a stored segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedSegment {
    pub upload_id: String,
    #[serde(flatten)]
    pub segment: UploadSegment,
    #[serde(default)]
    pub upload_cookie: UploadCookie,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_round_trip() {
        let token = UploadSessionToken::new("docs/big file.iso", "VXBsb2FkIElE.x-y_z");
        let decoded = UploadSessionToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded.object_key(), "docs/big file.iso");
        assert_eq!(decoded.upload_id(), "VXBsb2FkIElE.x-y_z");
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_token_format() {
        let token = UploadSessionToken::new("docs/", "abc");
        assert_eq!(token.to_string(), "ZG9jcy8=::YWJj");
        let parsed: UploadSessionToken = "ZG9jcy8=::YWJj".parse().unwrap();
        assert_eq!(parsed.object_key(), "docs/");
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(
            UploadSessionToken::decode("no-separator"),
            Err(UploadSessionError::Malformed)
        );
        assert_eq!(
            UploadSessionToken::decode("YQ==::YQ==::YQ=="),
            Err(UploadSessionError::Malformed)
        );
        assert!(matches!(
            UploadSessionToken::decode("!!::YWJj"),
            Err(UploadSessionError::Decode(_))
        ));
    }

    #[test]
    fn test_segment_json_shape() {
        let segment = UploadSegment {
            number: 1,
            sha256: "ab".into(),
            size: 10,
            cookie: SegmentCookie::default(),
        };
        assert_eq!(
            serde_json::to_value(&segment).unwrap(),
            json!({"number": 1, "sha256": "ab", "size": 10, "cookie": {}})
        );

        let parsed: UploadSegment =
            serde_json::from_value(json!({"number": 2, "sha256": "cd", "size": 5})).unwrap();
        assert_eq!(parsed.cookie, SegmentCookie::default());
    }

    #[test]
    fn test_segment_validation() {
        let mut segment = UploadSegment {
            number: 0,
            sha256: "ab".into(),
            size: 1,
            cookie: SegmentCookie::default(),
        };
        assert!(segment.validate().is_err());
        segment.number = 10_001;
        assert!(segment.validate().is_err());
        segment.number = 1;
        assert!(segment.validate().is_ok());
        segment.size = 0;
        assert_eq!(
            segment.validate(),
            Err("Segment 1 has zero size.".to_string())
        );
    }
}
