//! S3 XML payloads
//!
//! Typed request and response bodies for the S3 REST operations the gateway
//! uses, (de)serialized with `quick-xml`'s serde support.

use super::S3ClientError;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// `ListBucketResult` of a ListObjectsV2 call
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub key_count: Option<u64>,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub next_continuation_token: Option<String>,
    #[serde(default)]
    pub contents: Vec<ListedObject>,
    #[serde(default)]
    pub common_prefixes: Vec<CommonPrefix>,
}

impl ListBucketResult {
    /// Continuation token for the next page, only when the listing is truncated
    pub fn next_page(&self) -> Option<&str> {
        if !self.is_truncated {
            return None;
        }
        self.next_continuation_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}

/// One `Contents` entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListedObject {
    pub key: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub size: u64,
}

impl ListedObject {
    /// `LastModified` in epoch milliseconds
    pub fn modified_millis(&self) -> Option<i64> {
        self.last_modified.as_deref().and_then(iso8601_to_millis)
    }
}

/// One `CommonPrefixes` entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonPrefix {
    #[serde(default)]
    pub prefix: String,
}

/// `InitiateMultipartUploadResult`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateMultipartUploadResult {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    pub upload_id: String,
}

/// `CompleteMultipartUploadResult`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompleteMultipartUploadResult {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
}

/// `CopyObjectResult`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CopyObjectResult {
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
}

impl CopyObjectResult {
    /// `LastModified` in epoch milliseconds
    pub fn modified_millis(&self) -> Option<i64> {
        self.last_modified.as_deref().and_then(iso8601_to_millis)
    }
}

/// `DeleteResult` of a bulk delete
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteResult {
    #[serde(default)]
    pub deleted: Vec<DeletedObject>,
    #[serde(rename = "Error", default)]
    pub errors: Vec<DeleteError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeletedObject {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteError {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// S3 `Error` document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Parse an error body, tolerating anything that is not an S3 error document
    pub fn parse(body: &str) -> Option<Self> {
        quick_xml::de::from_str(body).ok()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "Delete")]
struct DeleteRequest<'a> {
    #[serde(rename = "Object")]
    objects: Vec<ObjectIdentifier<'a>>,
}

#[derive(Debug, Serialize)]
struct ObjectIdentifier<'a> {
    #[serde(rename = "Key")]
    key: &'a str,
}

/// Part reference submitted to CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUpload<'a> {
    #[serde(rename = "Part")]
    parts: &'a [CompletedPart],
}

/// Parse an XML response body into `T`
pub fn parse<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, S3ClientError> {
    quick_xml::de::from_str(body)
        .map_err(|e| S3ClientError::ResponseError(format!("Malformed S3 XML: {}", e)))
}

/// Body of a bulk delete request
pub fn delete_request_body(keys: &[String]) -> Result<String, S3ClientError> {
    let request = DeleteRequest {
        objects: keys.iter().map(|key| ObjectIdentifier { key }).collect(),
    };
    let xml = quick_xml::se::to_string(&request)
        .map_err(|e| S3ClientError::ResponseError(format!("Cannot encode delete body: {}", e)))?;
    Ok(format!("{}{}", XML_DECLARATION, xml))
}

/// Body of a CompleteMultipartUpload request
pub fn complete_request_body(parts: &[CompletedPart]) -> Result<String, S3ClientError> {
    quick_xml::se::to_string(&CompleteMultipartUpload { parts })
        .map_err(|e| S3ClientError::ResponseError(format!("Cannot encode complete body: {}", e)))
}

/// ISO-8601 timestamp (`2009-10-12T17:50:30.000Z`) to epoch milliseconds
pub fn iso8601_to_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.timestamp_millis())
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S%.f")
                .map(|dt| dt.and_utc().timestamp_millis())
                .ok()
        })
}

/// RFC 1123 HTTP date (`Wed, 12 Oct 2009 17:50:00 GMT`) to epoch milliseconds
pub fn http_date_to_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|dt| dt.timestamp_millis())
        .ok()
}
