//! Resumable upload routes

use super::{require_field, AppContext};
use crate::content::{object_key, UploadTarget};
use crate::error::GatewayError;
use crate::pipeline::{GatewayRequest, GatewayResponse, StageResult};
use crate::upload::UploadSegment;
use serde::Deserialize;

/// Header carrying segment parameters
const SEGMENT_HEADER: &str = "x-gateway-upload-segment";

#[derive(Debug, Deserialize)]
struct StartUploadBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<i64>,
    #[serde(default)]
    segments: Option<Vec<UploadSegment>>,
}

pub(super) async fn start_upload(ctx: &AppContext, mut request: GatewayRequest) -> StageResult {
    let body: StartUploadBody = request.json().await?;
    let parent_id = require_field(body.parent_id, "parent_id")?;
    let name = require_field(body.name, "name")?;
    require_field(body.size, "size")?;
    require_field(body.modified, "modified")?;
    let segments = require_field(body.segments, "segments")?;

    let target = match body.id.filter(|id| !id.is_empty()) {
        Some(id) => UploadTarget::Existing { id },
        None => UploadTarget::NewFile {
            prefix: object_key(&parent_id)?,
            name,
        },
    };

    let service = ctx.content_service(request.registration()?);
    GatewayResponse::json(&service.start_upload(target, segments).await?)
}

pub(super) async fn abort_upload(
    ctx: &AppContext,
    request: GatewayRequest,
    upload_id: &str,
) -> StageResult {
    let service = ctx.content_service(request.registration()?);
    service.delete_upload(upload_id).await?;
    Ok(GatewayResponse::ok())
}

/// `X-Gateway-Upload-Segment` header
#[derive(Debug, Deserialize)]
struct SegmentParams {
    number: Option<u32>,
    sha256: Option<String>,
    size: Option<u64>,
    cookie: Option<serde_json::Value>,
    upload_cookie: Option<serde_json::Value>,
}

pub(super) async fn upload_segment(
    ctx: &AppContext,
    mut request: GatewayRequest,
    upload_id: &str,
) -> StageResult {
    let params: SegmentParams = request.json_header(SEGMENT_HEADER)?;
    let number = require_field(params.number, "number")?;
    let sha256 = require_field(params.sha256, "sha256")?;
    let size = require_field(params.size, "size")?;
    require_field(params.cookie, "cookie")?;
    require_field(params.upload_cookie, "upload_cookie")?;

    let service = ctx.content_service(request.registration()?);
    let body = request.take_body();
    let segment = service
        .upload_segment(upload_id, number, size, &sha256, body)
        .await?;
    GatewayResponse::json(&segment)
}

#[derive(Debug, Deserialize)]
struct CompleteUploadBody {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    upload_id: Option<String>,
    #[serde(default)]
    segments: Option<Vec<UploadSegment>>,
}

pub(super) async fn complete_upload(ctx: &AppContext, mut request: GatewayRequest) -> StageResult {
    let body: CompleteUploadBody = request.json().await?;
    let size = require_field(body.size, "size")?;
    let upload_id = require_field(body.upload_id, "upload_id")?;
    let segments = require_field(body.segments, "segments")?;
    if upload_id.is_empty() {
        return Err(GatewayError::Validation("Missing upload_id.".into()));
    }

    let service = ctx.content_service(request.registration()?);
    GatewayResponse::json(&service.complete_upload(&upload_id, &segments, size).await?)
}
