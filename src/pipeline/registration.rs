//! Per-request registration loading

use super::{GatewayRequest, Next, Stage, StageResult};
use crate::error::GatewayError;
use crate::registration::RegistrationStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Looks up the registration bound to the resolved access token
pub struct RegistrationLoader {
    store: Arc<dyn RegistrationStore>,
}

impl RegistrationLoader {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }
}

fn unauthorized() -> GatewayError {
    GatewayError::Unauthorized("Unauthorized.".into())
}

#[async_trait]
impl Stage for RegistrationLoader {
    fn name(&self) -> &'static str {
        "registration_loader"
    }

    async fn handle(&self, mut request: GatewayRequest, next: Next<'_>) -> StageResult {
        let token = request.access_token.clone().ok_or_else(unauthorized)?;

        let registration = match self.store.get(&token).await {
            Ok(Some(registration)) => registration,
            Ok(None) => {
                debug!("Unknown access token");
                return Err(unauthorized());
            }
            Err(crate::registration::StoreError::InvalidToken) => return Err(unauthorized()),
            Err(e) => {
                error!(error = %e, "Registration lookup failed");
                return Err(GatewayError::Internal(e.to_string()));
            }
        };
        if !registration.is_complete() {
            return Err(unauthorized());
        }

        request.registration = Some(registration);
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{GatewayResponse, Pipeline};
    use crate::registration::{MockRegistrationStore, Registration, StoreError};
    use hyper::{Method, StatusCode};

    fn registration() -> Registration {
        Registration {
            host: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "bucket".into(),
            access_key: "key".into(),
            access_key_secret: "secret".into(),
            root_id: String::new(),
        }
    }

    async fn run(store: MockRegistrationStore, token: Option<&str>) -> GatewayResponse {
        let pipeline = Pipeline::new().stage(Arc::new(RegistrationLoader::new(Arc::new(store))));
        let mut request = GatewayRequest::new(Method::GET, "/v2/gateway_metadata/x");
        request.access_token = token.map(str::to_string);
        let endpoint = |request: GatewayRequest| async move {
            let bucket = request.registration()?.bucket.clone();
            GatewayResponse::json(&bucket)
        };
        pipeline.run(request, &endpoint).await
    }

    #[tokio::test]
    async fn test_loads_registration() {
        let mut store = MockRegistrationStore::new();
        store
            .expect_get()
            .withf(|token| token.to_string() == "tok")
            .returning(|_| Ok(Some(registration())));

        let response = run(store, Some("tok")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body_bytes().unwrap().as_ref(), b"\"bucket\"");
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let mut store = MockRegistrationStore::new();
        store.expect_get().returning(|_| Ok(None));
        assert_eq!(run(store, Some("tok")).await.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_incomplete_registration_is_unauthorized() {
        let mut store = MockRegistrationStore::new();
        store.expect_get().returning(|_| {
            let mut reg = registration();
            reg.access_key_secret.clear();
            Ok(Some(reg))
        });
        assert_eq!(run(store, Some("tok")).await.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_token_never_hits_store() {
        let mut store = MockRegistrationStore::new();
        store.expect_get().never();
        assert_eq!(run(store, None).await.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_store_failure_is_internal() {
        let mut store = MockRegistrationStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Io(std::io::Error::other("disk gone"))));
        assert_eq!(
            run(store, Some("tok")).await.status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
