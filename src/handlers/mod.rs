//! Route handlers
//!
//! Each handler parses its route's parameters, calls the content service
//! built from the request's registration, and shapes the JSON response.
//! Handlers run at the end of the pipeline selected by the route's access
//! level.

use crate::content::GatewayContentService;
use crate::error::GatewayError;
use crate::pipeline::{
    AccessTokenResolver, Endpoint, ExceptionGuard, GatewayRequest, NetworkErrorTranslator,
    Pipeline, ProtocolErrorTranslator, RegistrationLoader, StageResult, UsageLimiter,
};
use crate::registration::{Registration, RegistrationStore};
use crate::router::{Access, Route, RouteKind};
use crate::s3::S3Client;
use async_trait::async_trait;
use std::sync::Arc;

mod auth;
mod metadata;
mod upload;

/// Process-wide settings the handlers need
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub upload_segment_size: u64,
    pub log_s3_requests: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            upload_segment_size: 104857600,
            log_s3_requests: true,
        }
    }
}

/// Shared state built once at startup
pub struct AppContext {
    pub store: Arc<dyn RegistrationStore>,
    pub http_client: reqwest::Client,
    pub settings: GatewaySettings,
    limited: Pipeline,
    anonymous: Pipeline,
    authenticated: Pipeline,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        http_client: reqwest::Client,
        limiter: Arc<UsageLimiter>,
        settings: GatewaySettings,
    ) -> Self {
        let guard = Arc::new(ExceptionGuard);
        let network = Arc::new(NetworkErrorTranslator);
        let protocol = Arc::new(ProtocolErrorTranslator);

        let limited = Pipeline::new()
            .stage(guard.clone())
            .stage(limiter.clone());
        let anonymous = Pipeline::new()
            .stage(guard.clone())
            .stage(limiter.clone())
            .stage(network.clone())
            .stage(protocol.clone());
        let authenticated = Pipeline::new()
            .stage(guard)
            .stage(limiter)
            .stage(network)
            .stage(Arc::new(AccessTokenResolver))
            .stage(Arc::new(RegistrationLoader::new(store.clone())))
            .stage(protocol);

        Self {
            store,
            http_client,
            settings,
            limited,
            anonymous,
            authenticated,
        }
    }

    pub fn pipeline(&self, access: Access) -> &Pipeline {
        match access {
            Access::Limited => &self.limited,
            Access::Anonymous => &self.anonymous,
            Access::Authenticated => &self.authenticated,
        }
    }

    /// S3 client for one registration, sharing the process connection pool
    pub fn s3_client(&self, registration: &Registration) -> S3Client {
        S3Client::with_http_client(registration.client_config(), self.http_client.clone())
            .log_requests(self.settings.log_s3_requests)
    }

    pub fn content_service(&self, registration: &Registration) -> GatewayContentService {
        GatewayContentService::new(self.s3_client(registration))
    }
}

/// Endpoint running one resolved route
pub struct Operation<'a> {
    ctx: &'a AppContext,
    route: &'a Route,
}

impl<'a> Operation<'a> {
    pub fn new(ctx: &'a AppContext, route: &'a Route) -> Self {
        Self { ctx, route }
    }
}

fn required_id(route: &Route) -> Result<&str, GatewayError> {
    route
        .id
        .as_deref()
        .ok_or_else(|| GatewayError::Validation("Missing id.".into()))
}

#[async_trait]
impl Endpoint for Operation<'_> {
    async fn call(&self, request: GatewayRequest) -> StageResult {
        let ctx = self.ctx;
        let id = self.route.id.as_deref();
        match self.route.kind {
            RouteKind::AuthMethod => auth::auth_method(),
            RouteKind::SignIn => auth::sign_in(ctx, request).await,
            RouteKind::SignOut => auth::sign_out(ctx, required_id(self.route)?).await,
            RouteKind::RootMetadata => metadata::root_metadata(),
            RouteKind::GetMetadata => {
                metadata::get_metadata(ctx, request, required_id(self.route)?).await
            }
            RouteKind::DeleteRoot => Err(GatewayError::not_allowed()),
            RouteKind::Delete => metadata::delete(ctx, request, required_id(self.route)?).await,
            RouteKind::ListChildren => metadata::list_children(ctx, request, id).await,
            RouteKind::CreateFile => metadata::create_file(ctx, request, id).await,
            RouteKind::UpdateFile => {
                metadata::update_file(ctx, request, required_id(self.route)?).await
            }
            RouteKind::CreateFolder => metadata::create_folder(ctx, request, id).await,
            RouteKind::Rename => metadata::rename(ctx, request, required_id(self.route)?).await,
            RouteKind::Move => metadata::move_file(ctx, request, required_id(self.route)?).await,
            RouteKind::Download => metadata::download(ctx, request, required_id(self.route)?).await,
            RouteKind::Thumbnail => Err(GatewayError::NotAllowed("Not available".into())),
            RouteKind::StartUpload => upload::start_upload(ctx, request).await,
            RouteKind::AbortUpload => {
                upload::abort_upload(ctx, request, required_id(self.route)?).await
            }
            RouteKind::UploadSegment => {
                upload::upload_segment(ctx, request, required_id(self.route)?).await
            }
            RouteKind::CompleteUpload => upload::complete_upload(ctx, request).await,
        }
    }
}

/// Reject missing required JSON fields with a message naming the field
pub(crate) fn require_field<T>(value: Option<T>, field: &str) -> Result<T, GatewayError> {
    value.ok_or_else(|| GatewayError::Validation(format!("Missing {}.", field)))
}
