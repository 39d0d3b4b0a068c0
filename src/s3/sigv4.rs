//! AWS Signature Version 4 request signing
//!
//! A pure signer for S3 REST requests: given the request parts, the
//! credentials and a timestamp it produces the header set that must be sent
//! with the request. No I/O happens here, so a fixed timestamp always yields
//! the same signature.
//!
//! # Algorithm
//!
//! 1. Canonical request: method, canonical URI, sorted query string, sorted
//!    lower-case headers, signed header list and payload hash joined by `\n`
//! 2. String to sign: algorithm, timestamp, credential scope and the hex
//!    SHA-256 of the canonical request
//! 3. Signing key: HMAC-SHA256 chain over date, region, `s3`, `aws4_request`
//!    seeded with `AWS4` + secret
//! 4. Signature: hex HMAC-SHA256 of the string to sign
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use s3_content_gateway::s3::sigv4::{sign, SigningRequest};
//! use s3_content_gateway::s3::Credentials;
//!
//! let credentials = Credentials::new("AKIDEXAMPLE", "secret");
//! let request = SigningRequest {
//!     method: "GET",
//!     path: "/my-bucket/hello.txt",
//!     query: &[],
//!     headers: &[],
//!     has_body: false,
//! };
//! let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let signed = sign(&request, "us-east-1", "s3.amazonaws.com", &credentials, now).unwrap();
//! assert!(signed.authorization().starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/"));
//! ```

use super::Credentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash used whenever a request body is streamed
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// SHA-256 of the empty string, the payload hash of body-less requests
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const SERVICE: &str = "s3";
const TERMINATOR: &str = "aws4_request";

/// Everything except `A-Z a-z 0-9 - _ . ~` is percent-encoded.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as the query set but `/` separates path segments and stays literal.
const PATH_ENCODE_SET: &AsciiSet = &QUERY_ENCODE_SET.remove(b'/');

/// Signing errors
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Missing signing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Request parts that take part in the signature
#[derive(Debug, Clone, Copy)]
pub struct SigningRequest<'a> {
    /// HTTP method, upper-cased by the signer
    pub method: &'a str,
    /// Unencoded absolute path, e.g. `/bucket/folder/file name.txt`
    pub path: &'a str,
    /// Unencoded query parameters; an empty value renders as `name=`
    pub query: &'a [(String, String)],
    /// Extra headers to sign and send
    pub headers: &'a [(String, String)],
    /// Whether a body is streamed with the request
    pub has_body: bool,
}

/// Output of [`sign`]
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// Percent-encoded path exactly as it was signed
    pub canonical_uri: String,
    /// Sorted, percent-encoded query string exactly as it was signed
    pub canonical_query: String,
    /// Full header set (lower-case names) including `host`, `x-amz-date`,
    /// `x-amz-content-sha256` and `authorization`
    pub headers: Vec<(String, String)>,
    /// Hex signature
    pub signature: String,
}

impl SignedRequest {
    /// Value of the `authorization` header
    pub fn authorization(&self) -> &str {
        self.header("authorization").unwrap_or_default()
    }

    /// Look up a header by lower-case name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Percent-encode a path, keeping `/` separators.
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

/// Percent-encode a query name or value.
pub fn encode_query_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET).to_string()
}

/// Build the sorted canonical query string.
pub fn canonical_query_string(query: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (encode_query_component(k), encode_query_component(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Trim and collapse runs of spaces inside a header value.
fn canonical_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the per-day signing key.
pub fn signing_key(secret: &str, date_stamp: &str, region: &str) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
    hmac_sha256(&k_service, TERMINATOR.as_bytes())
}

/// Build the canonical request and the header list it covers.
///
/// Returns `(canonical_request, signed_headers, headers)` where `headers` are
/// sorted by lower-case name.
fn canonical_request(
    request: &SigningRequest<'_>,
    canonical_uri: &str,
    canonical_query: &str,
    headers: Vec<(String, String)>,
    payload_hash: &str,
) -> (String, String, Vec<(String, String)>) {
    let mut headers: Vec<(String, String)> = headers
        .into_iter()
        .map(|(k, v)| (k.trim().to_lowercase(), canonical_header_value(&v)))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = [
        request.method.to_uppercase().as_str(),
        canonical_uri,
        canonical_query,
        canonical_headers.as_str(),
        signed_headers.as_str(),
        payload_hash,
    ]
    .join("\n");

    (canonical, signed_headers, headers)
}

/// Sign a request.
///
/// `host` is the authority the request is sent to (`host[:port]`) and is
/// added as the `host` header.
pub fn sign(
    request: &SigningRequest<'_>,
    region: &str,
    host: &str,
    credentials: &Credentials,
    timestamp: DateTime<Utc>,
) -> Result<SignedRequest, SigningError> {
    if region.is_empty() {
        return Err(SigningError::MissingParameter("region"));
    }
    if host.is_empty() {
        return Err(SigningError::MissingParameter("host"));
    }
    if credentials.access_key_id().is_empty() {
        return Err(SigningError::MissingParameter("access_key"));
    }
    if request.path.is_empty() {
        return Err(SigningError::MissingParameter("path"));
    }

    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = timestamp.format("%Y%m%d").to_string();
    let payload_hash = if request.has_body {
        UNSIGNED_PAYLOAD
    } else {
        EMPTY_PAYLOAD_SHA256
    };

    let canonical_uri = encode_path(request.path);
    let canonical_query = canonical_query_string(request.query);

    let mut headers: Vec<(String, String)> = request.headers.to_vec();
    headers.push(("host".into(), host.to_string()));
    headers.push(("x-amz-date".into(), amz_date.clone()));
    headers.push(("x-amz-content-sha256".into(), payload_hash.to_string()));

    let (canonical, signed_headers, mut headers) = canonical_request(
        request,
        &canonical_uri,
        &canonical_query,
        headers,
        payload_hash,
    );

    let credential_scope = format!("{}/{}/{}/{}", date_stamp, region, SERVICE, TERMINATOR);
    let string_to_sign = [
        ALGORITHM,
        amz_date.as_str(),
        credential_scope.as_str(),
        sha256_hex(canonical.as_bytes()).as_str(),
    ]
    .join("\n");

    let key = signing_key(credentials.secret_access_key(), &date_stamp, region)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    headers.push((
        "authorization".into(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            credentials.access_key_id(),
            credential_scope,
            signed_headers,
            signature
        ),
    ));

    Ok(SignedRequest {
        canonical_uri,
        canonical_query,
        headers,
        signature,
    })
}
