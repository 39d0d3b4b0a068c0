//! Gateway error taxonomy
//!
//! Service operations and pipeline stages share one error type. Each variant
//! maps to exactly one external status code; raw S3 transport failures keep
//! their [`S3ClientError`] until a translator stage rewrites them.

use crate::content::ContentIdError;
use crate::s3::S3ClientError;
use crate::upload::UploadSessionError;
use hyper::StatusCode;
use thiserror::Error;

/// Errors surfaced by the content service and the request pipeline
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotAllowed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Integrity(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    GatewayTimeout(String),

    #[error(transparent)]
    S3(#[from] S3ClientError),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// External status code
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) | GatewayError::Integrity(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotAllowed(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::S3(_) | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Errors no stage knew how to translate
    pub fn is_unexpected(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }

    pub fn not_allowed() -> Self {
        GatewayError::NotAllowed("Not allowed.".into())
    }
}

impl From<ContentIdError> for GatewayError {
    fn from(err: ContentIdError) -> Self {
        GatewayError::Validation(err.to_string())
    }
}

impl From<UploadSessionError> for GatewayError {
    fn from(err: UploadSessionError) -> Self {
        GatewayError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Integrity("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::RateLimited("x".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::GatewayTimeout("x".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_untranslated_s3_error_is_unexpected() {
        let err = GatewayError::from(S3ClientError::ResponseError("bad xml".into()));
        assert!(err.is_unexpected());
        assert!(!GatewayError::not_allowed().is_unexpected());
    }
}
