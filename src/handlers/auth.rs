//! Sign-in, sign-out and the sign-in form description

use super::{require_field, AppContext};
use crate::content::ROOT_ID;
use crate::error::GatewayError;
use crate::pipeline::{GatewayRequest, GatewayResponse, StageResult};
use crate::registration::Registration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct FormField {
    name: &'static str,
    prompt: &'static str,
    required: bool,
    order: u32,
}

#[derive(Debug, Serialize)]
struct AuthMethod {
    method: &'static str,
    form: Vec<FormField>,
}

const FORM_FIELDS: [(&str, &str); 5] = [
    ("host", "What is the S3 host server URL?"),
    ("region", "What is the AWS region?"),
    ("bucket", "What is the name of the bucket?"),
    ("key", "Enter the access key."),
    ("secret", "Enter the access key secret."),
];

pub(super) fn auth_method() -> StageResult {
    GatewayResponse::json(&AuthMethod {
        method: "form",
        form: FORM_FIELDS
            .iter()
            .zip(1..)
            .map(|(&(name, prompt), order)| FormField {
                name,
                prompt,
                required: true,
                order,
            })
            .collect(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct SignInBody {
    host: Option<String>,
    region: Option<String>,
    bucket: Option<String>,
    key: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Serialize)]
struct SignInResponse {
    access_token: String,
    refresh_token: Option<String>,
    metadata_id: String,
    auth_id: Option<String>,
    upload_segment_size: u64,
}

pub(super) async fn sign_in(ctx: &AppContext, mut request: GatewayRequest) -> StageResult {
    let body: SignInBody = request.json().await?;
    let registration = Registration {
        host: require_field(body.host, "host")?,
        region: require_field(body.region, "region")?,
        bucket: require_field(body.bucket, "bucket")?,
        access_key: require_field(body.key, "key")?,
        access_key_secret: require_field(body.secret, "secret")?,
        root_id: ROOT_ID.to_string(),
    };
    if !registration.is_complete() {
        return Err(GatewayError::Validation("Empty sign-in field.".into()));
    }

    let service = ctx.content_service(&registration);
    if !service.check_bucket().await? {
        warn!(host = %registration.host, bucket = %registration.bucket, "Sign-in rejected");
        return Err(GatewayError::NotAllowed("Invalid credentials".into()));
    }

    let access_token = uuid::Uuid::new_v4().simple().to_string();
    ctx.store
        .put(&access_token, &registration)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    info!(host = %registration.host, bucket = %registration.bucket, "Signed in");

    GatewayResponse::json(&SignInResponse {
        access_token,
        refresh_token: None,
        metadata_id: registration.root_id,
        auth_id: None,
        upload_segment_size: ctx.settings.upload_segment_size,
    })
}

pub(super) async fn sign_out(ctx: &AppContext, token: &str) -> StageResult {
    // Unknown and malformed tokens are already signed out
    if let Err(e) = ctx.store.delete(token).await {
        match e {
            crate::registration::StoreError::InvalidToken => {}
            other => return Err(GatewayError::Internal(other.to_string())),
        }
    }
    Ok(GatewayResponse::ok())
}
