//! Request pipeline
//!
//! Every gateway request passes through an ordered list of [`Stage`]s before
//! reaching its operation. A stage receives the request and a [`Next`] handle
//! for the remainder of the chain, and may short-circuit, rewrite the
//! request, or translate the error coming back out.
//!
//! Full order, outer to inner:
//!
//! ```text
//! ExceptionGuard -> UsageLimiter -> NetworkErrorTranslator
//!     -> AccessTokenResolver -> RegistrationLoader
//!     -> ProtocolErrorTranslator -> operation
//! ```

use crate::error::GatewayError;
use crate::registration::Registration;
use crate::s3::{empty_stream, ByteStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

mod limiter;
mod registration;
mod token;
mod translate;

pub use limiter::UsageLimiter;
pub use registration::RegistrationLoader;
pub use token::{extract_access_token, AccessTokenResolver};
pub use translate::{ExceptionGuard, NetworkErrorTranslator, ProtocolErrorTranslator};

/// Largest JSON request body accepted
const MAX_JSON_BODY: usize = 1024 * 1024;

/// Inbound request as seen by stages and operations
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    body: Option<ByteStream>,
    /// Set by [`AccessTokenResolver`]
    pub access_token: Option<String>,
    /// Set by [`RegistrationLoader`]
    pub registration: Option<Registration>,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: HashMap::new(),
            body: None,
            access_token: None,
            registration: None,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bytes(self, body: impl Into<Bytes>) -> Self {
        let bytes = body.into();
        self.with_body(Box::pin(futures::stream::once(async move { Ok(bytes) })))
    }

    /// Parse a URL query string into the query map. Repeated names keep the first value.
    pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                let name = percent_encoding::percent_decode_str(&name.replace('+', " "))
                    .decode_utf8_lossy()
                    .into_owned();
                let value = percent_encoding::percent_decode_str(&value.replace('+', " "))
                    .decode_utf8_lossy()
                    .into_owned();
                params.entry(name).or_insert(value);
            }
        }
        params
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Take the body stream; later calls get an empty stream
    pub fn take_body(&mut self) -> ByteStream {
        self.body.take().unwrap_or_else(empty_stream)
    }

    /// Read and parse a JSON body
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, GatewayError> {
        let mut body = self.take_body();
        let mut data = Vec::new();
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| GatewayError::Validation(format!("Unreadable body: {}", e)))?
        {
            if data.len() + chunk.len() > MAX_JSON_BODY {
                return Err(GatewayError::Validation("Body too large.".into()));
            }
            data.extend_from_slice(&chunk);
        }
        if data.is_empty() {
            return Err(GatewayError::Validation("Missing body.".into()));
        }
        serde_json::from_slice(&data)
            .map_err(|e| GatewayError::Validation(format!("Invalid body: {}", e)))
    }

    /// Parse a JSON-valued header
    pub fn json_header<T: DeserializeOwned>(&self, name: &str) -> Result<T, GatewayError> {
        let value = self
            .header(name)
            .ok_or_else(|| GatewayError::Validation(format!("Missing {} header.", name)))?;
        serde_json::from_str(value)
            .map_err(|e| GatewayError::Validation(format!("Invalid {} header: {}", name, e)))
    }

    /// Registration loaded by [`RegistrationLoader`]
    pub fn registration(&self) -> Result<&Registration, GatewayError> {
        self.registration
            .as_ref()
            .ok_or_else(|| GatewayError::Unauthorized("Unauthorized.".into()))
    }
}

impl fmt::Debug for GatewayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("has_token", &self.access_token.is_some())
            .finish()
    }
}

/// Response body variants
pub enum ResponseBody {
    Empty,
    Full(Bytes),
    Stream {
        stream: ByteStream,
        length: Option<u64>,
    },
}

/// Outbound response
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl GatewayResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, GatewayError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| GatewayError::Internal(format!("Response encoding failed: {}", e)))?;
        let mut response = Self::ok();
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.body = ResponseBody::Full(Bytes::from(body));
        Ok(response)
    }

    pub fn stream(stream: ByteStream, length: Option<u64>) -> Self {
        let mut response = Self::ok();
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        response.body = ResponseBody::Stream { stream, length };
        response
    }

    /// Plain-text error response carrying the error's message
    pub fn error(error: &GatewayError) -> Self {
        Self::message(error.status(), &error.to_string())
    }

    pub fn message(status: StatusCode, message: &str) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.body = ResponseBody::Full(Bytes::from(message.to_string()));
        response
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    /// Body bytes of a non-streamed response
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Full(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Debug for GatewayResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

pub type StageResult = Result<GatewayResponse, GatewayError>;

/// The operation at the end of a pipeline
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, request: GatewayRequest) -> StageResult;
}

#[async_trait]
impl<F, Fut> Endpoint for F
where
    F: Fn(GatewayRequest) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    async fn call(&self, request: GatewayRequest) -> StageResult {
        (self)(request).await
    }
}

/// One pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> StageResult;
}

/// Remainder of the chain after the current stage
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: GatewayRequest) -> StageResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .handle(
                        request,
                        Next {
                            stages: rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.call(request).await,
        }
    }
}

/// Ordered stage list
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run `request` through every stage into `endpoint`.
    ///
    /// Errors that escape every stage become plain error responses.
    pub async fn run(&self, request: GatewayRequest, endpoint: &dyn Endpoint) -> GatewayResponse {
        let next = Next {
            stages: &self.stages,
            endpoint,
        };
        match next.run(request).await {
            Ok(response) => response,
            Err(error) => GatewayResponse::error(&error),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}
