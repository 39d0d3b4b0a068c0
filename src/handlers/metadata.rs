//! File and folder metadata routes

use super::{require_field, AppContext};
use crate::content::{object_key, ContentMetadata};
use crate::error::GatewayError;
use crate::pipeline::{GatewayRequest, GatewayResponse, StageResult};
use serde::Deserialize;

/// Header carrying single-request upload parameters
const UPLOAD_HEADER: &str = "x-gateway-upload";

/// Response header carrying the next listing page token
const PAGE_HEADER: &str = "x-gateway-page";

/// Folder prefix for an optional parent id; absent means the root
fn prefix_for(parent_id: Option<&str>) -> Result<String, GatewayError> {
    match parent_id {
        Some(id) => Ok(object_key(id)?),
        None => Ok(String::new()),
    }
}

pub(super) fn root_metadata() -> StageResult {
    GatewayResponse::json(&ContentMetadata::root())
}

pub(super) async fn get_metadata(
    ctx: &AppContext,
    request: GatewayRequest,
    id: &str,
) -> StageResult {
    let service = ctx.content_service(request.registration()?);
    GatewayResponse::json(&service.get_metadata(id).await?)
}

pub(super) async fn delete(ctx: &AppContext, request: GatewayRequest, id: &str) -> StageResult {
    let service = ctx.content_service(request.registration()?);
    service.delete(id).await?;
    Ok(GatewayResponse::ok())
}

pub(super) async fn list_children(
    ctx: &AppContext,
    request: GatewayRequest,
    id: Option<&str>,
) -> StageResult {
    let prefix = prefix_for(id)?;
    let page = request.query("page").map(str::to_string);
    let service = ctx.content_service(request.registration()?);

    let listing = service.list_content(&prefix, page.as_deref()).await?;
    let mut response = GatewayResponse::json(&listing.items)?;
    if let Some(next) = listing.next_page {
        response = response.with_header(PAGE_HEADER, &next);
    }
    Ok(response)
}

/// `X-Gateway-Upload` header of single-request create and update
#[derive(Debug, Deserialize)]
struct UploadParams {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<i64>,
    #[serde(default)]
    sha256: Option<String>,
}

impl UploadParams {
    fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref().filter(|s| !s.is_empty())
    }
}

pub(super) async fn create_file(
    ctx: &AppContext,
    mut request: GatewayRequest,
    parent_id: Option<&str>,
) -> StageResult {
    let params: UploadParams = request.json_header(UPLOAD_HEADER)?;
    let size = require_field(params.size, "size")?;
    require_field(params.modified, "modified")?;
    let name = percent_encoding::percent_decode_str(&require_field(params.name.clone(), "name")?)
        .decode_utf8()
        .map_err(|_| GatewayError::Validation("Invalid name.".into()))?
        .into_owned();
    let prefix = prefix_for(parent_id)?;

    let service = ctx.content_service(request.registration()?);
    let body = request.take_body();
    let metadata = service
        .create_file(&prefix, &name, size, params.sha256(), body)
        .await?;
    GatewayResponse::json(&metadata)
}

pub(super) async fn update_file(
    ctx: &AppContext,
    mut request: GatewayRequest,
    id: &str,
) -> StageResult {
    let params: UploadParams = request.json_header(UPLOAD_HEADER)?;
    let size = require_field(params.size, "size")?;

    let service = ctx.content_service(request.registration()?);
    let body = request.take_body();
    let metadata = service
        .update_file(id, size, params.sha256(), body)
        .await?;
    GatewayResponse::json(&metadata)
}

#[derive(Debug, Deserialize)]
struct FolderBody {
    name: Option<String>,
}

pub(super) async fn create_folder(
    ctx: &AppContext,
    mut request: GatewayRequest,
    parent_id: Option<&str>,
) -> StageResult {
    let body: FolderBody = request.json().await?;
    let name = require_field(body.name, "name")?;
    let prefix = prefix_for(parent_id)?;

    let service = ctx.content_service(request.registration()?);
    GatewayResponse::json(&service.create_folder(&prefix, &name).await?)
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    new_name: Option<String>,
}

pub(super) async fn rename(ctx: &AppContext, mut request: GatewayRequest, id: &str) -> StageResult {
    let body: RenameBody = request.json().await?;
    let new_name = require_field(body.new_name, "new_name")?;

    let service = ctx.content_service(request.registration()?);
    GatewayResponse::json(&service.rename(id, &new_name).await?)
}

#[derive(Debug, Deserialize)]
struct MoveBody {
    new_parent_id: Option<String>,
}

pub(super) async fn move_file(
    ctx: &AppContext,
    mut request: GatewayRequest,
    id: &str,
) -> StageResult {
    let body: MoveBody = request.json().await?;
    let new_parent_id = require_field(body.new_parent_id, "new_parent_id")?;

    let service = ctx.content_service(request.registration()?);
    GatewayResponse::json(&service.move_file(id, &new_parent_id).await?)
}

pub(super) async fn download(ctx: &AppContext, request: GatewayRequest, id: &str) -> StageResult {
    let service = ctx.content_service(request.registration()?);
    let file = service.read_file(id).await?;
    Ok(GatewayResponse::stream(file.body, file.content_length))
}
