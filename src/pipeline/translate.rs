//! Error translation stages
//!
//! Transport failures travel up the chain as [`GatewayError::S3`] until the
//! matching translator rewrites them into a client-facing status. Anything
//! still untranslated when it reaches the [`ExceptionGuard`] is logged in full
//! and answered with a bare 500.

use super::{GatewayRequest, GatewayResponse, Next, Stage, StageResult};
use crate::error::GatewayError;
use crate::s3::{S3ClientError, S3ProtocolError};
use async_trait::async_trait;
use futures::FutureExt;
use hyper::StatusCode;
use std::panic::AssertUnwindSafe;
use tracing::error;

const UNEXPECTED_ERROR: &str = "Unexpected Error";

/// Outermost stage: turns every error, and any panic, into a response
#[derive(Debug, Default)]
pub struct ExceptionGuard;

fn log_unexpected(method: &str, path: &str, err: &GatewayError) {
    match err {
        GatewayError::S3(S3ClientError::Protocol(protocol)) => {
            let debug_headers: Vec<String> = protocol
                .debug_headers()
                .map(|(name, value)| format!("{}: {}", name, value))
                .collect();
            error!(
                method = %method,
                path = %path,
                s3.method = %protocol.method,
                s3.url = %protocol.url,
                s3.status = protocol.status,
                s3.body = %protocol.body,
                s3.debug_headers = ?debug_headers,
                "Unexpected S3 response"
            );
        }
        other => {
            error!(method = %method, path = %path, error = %other, "Unexpected error");
        }
    }
}

#[async_trait]
impl Stage for ExceptionGuard {
    fn name(&self) -> &'static str {
        "exception_guard"
    }

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> StageResult {
        let method = request.method.to_string();
        let path = request.path.clone();

        match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) if err.is_unexpected() => {
                log_unexpected(&method, &path, &err);
                Ok(GatewayResponse::message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    UNEXPECTED_ERROR,
                ))
            }
            Ok(Err(err)) => Ok(GatewayResponse::error(&err)),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(method = %method, path = %path, panic = %message, "Operation panicked");
                Ok(GatewayResponse::message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    UNEXPECTED_ERROR,
                ))
            }
        }
    }
}

/// Timeouts and connection failures become 504
#[derive(Debug, Default)]
pub struct NetworkErrorTranslator;

#[async_trait]
impl Stage for NetworkErrorTranslator {
    fn name(&self) -> &'static str {
        "network_error_translator"
    }

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> StageResult {
        next.run(request).await.map_err(|err| match err {
            GatewayError::S3(S3ClientError::Network { timeout, message }) => {
                tracing::warn!(error = %message, timeout = timeout, "S3 network failure");
                GatewayError::GatewayTimeout(if timeout {
                    "Network Timeout".into()
                } else {
                    "Network Connection Error".into()
                })
            }
            other => other,
        })
    }
}

/// Maps S3 protocol statuses onto gateway statuses
#[derive(Debug, Default)]
pub struct ProtocolErrorTranslator;

fn translate_protocol(protocol: &S3ProtocolError) -> Option<GatewayError> {
    match protocol.status {
        400 => Some(GatewayError::Validation(
            protocol
                .message()
                .unwrap_or_else(|| "S3 Bad Request".into()),
        )),
        401 => Some(GatewayError::Unauthorized("Invalid S3 credentials.".into())),
        403 => Some(GatewayError::NotAllowed("Not allowed by S3.".into())),
        404 => Some(GatewayError::NotFound("S3 not found.".into())),
        500 | 502 | 503 => Some(GatewayError::BadGateway("S3 unavailable.".into())),
        504 => Some(GatewayError::GatewayTimeout("S3 unavailable.".into())),
        _ => None,
    }
}

#[async_trait]
impl Stage for ProtocolErrorTranslator {
    fn name(&self) -> &'static str {
        "protocol_error_translator"
    }

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> StageResult {
        next.run(request).await.map_err(|err| match err {
            GatewayError::S3(S3ClientError::Protocol(protocol)) => translate_protocol(&protocol)
                .unwrap_or(GatewayError::S3(S3ClientError::Protocol(protocol))),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use hyper::Method;
    use std::sync::Arc;

    fn protocol_error(status: u16, body: &str) -> GatewayError {
        GatewayError::S3(S3ClientError::Protocol(Box::new(S3ProtocolError {
            method: "GET".into(),
            url: "http://s3.local/bucket/key".into(),
            status,
            body: body.into(),
            headers: vec![("x-amz-request-id".into(), "REQ123".into())],
        })))
    }

    fn full_chain() -> Pipeline {
        Pipeline::new()
            .stage(Arc::new(ExceptionGuard))
            .stage(Arc::new(NetworkErrorTranslator))
            .stage(Arc::new(ProtocolErrorTranslator))
    }

    async fn respond_with(error: GatewayError) -> GatewayResponse {
        let cell = parking_lot::Mutex::new(Some(error));
        let endpoint = move |_request: GatewayRequest| {
            let error = cell.lock().take();
            async move {
                match error {
                    Some(error) => Err(error),
                    None => Ok(GatewayResponse::ok()),
                }
            }
        };
        full_chain()
            .run(GatewayRequest::new(Method::GET, "/v2/gateway_file/x"), &endpoint)
            .await
    }

    fn body_text(response: &GatewayResponse) -> String {
        String::from_utf8(response.body_bytes().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_protocol_status_mapping() {
        let cases = [
            (401, StatusCode::UNAUTHORIZED, "Invalid S3 credentials."),
            (403, StatusCode::FORBIDDEN, "Not allowed by S3."),
            (404, StatusCode::NOT_FOUND, "S3 not found."),
            (500, StatusCode::BAD_GATEWAY, "S3 unavailable."),
            (502, StatusCode::BAD_GATEWAY, "S3 unavailable."),
            (503, StatusCode::BAD_GATEWAY, "S3 unavailable."),
            (504, StatusCode::GATEWAY_TIMEOUT, "S3 unavailable."),
        ];
        for (s3_status, expected, message) in cases {
            let response = respond_with(protocol_error(s3_status, "")).await;
            assert_eq!(response.status, expected, "S3 status {}", s3_status);
            assert_eq!(body_text(&response), message);
        }
    }

    #[tokio::test]
    async fn test_bad_request_surfaces_s3_message() {
        let body = "<Error><Code>InvalidArgument</Code><Message>Part number must be an integer</Message></Error>";
        let response = respond_with(protocol_error(400, body)).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(body_text(&response), "Part number must be an integer");

        let response = respond_with(protocol_error(400, "")).await;
        assert_eq!(body_text(&response), "S3 Bad Request");
    }

    #[tokio::test]
    async fn test_unmapped_status_is_unexpected() {
        let response = respond_with(protocol_error(409, "<Error/>")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(&response), "Unexpected Error");
    }

    #[tokio::test]
    async fn test_network_errors() {
        let response = respond_with(GatewayError::S3(S3ClientError::Network {
            timeout: true,
            message: "timed out".into(),
        }))
        .await;
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_text(&response), "Network Timeout");

        let response = respond_with(GatewayError::S3(S3ClientError::Network {
            timeout: false,
            message: "connection refused".into(),
        }))
        .await;
        assert_eq!(body_text(&response), "Network Connection Error");
    }

    #[tokio::test]
    async fn test_known_errors_pass_through_guard() {
        let response = respond_with(GatewayError::Integrity("SHA-256 mismatch".into())).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(body_text(&response), "SHA-256 mismatch");
    }

    #[tokio::test]
    async fn test_guard_contains_panics() {
        let endpoint = |_request: GatewayRequest| async {
            if true {
                panic!("operation blew up");
            }
            Ok::<_, GatewayError>(GatewayResponse::ok())
        };
        let response = full_chain()
            .run(GatewayRequest::new(Method::GET, "/"), &endpoint)
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(&response), "Unexpected Error");
    }
}
