//! Gateway API router
//!
//! Resolves `(method, resource, has id)` against a static route table. Paths
//! have the shape `/v2/<resource>[/<id>]`; the id is everything after the
//! resource segment, percent-decoded.

use hyper::Method;
use thiserror::Error;

/// API version prefix
const API_PREFIX: &str = "/v2/";

/// Router errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouterError {
    #[error("Not found.")]
    NotFound,

    #[error("Invalid id encoding")]
    InvalidId,
}

/// Which pipeline a route runs through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Guard and usage limiter only
    Limited,
    /// Guard, limiter and error translators, no access token
    Anonymous,
    /// Full pipeline with token and registration
    Authenticated,
}

/// Gateway operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    AuthMethod,
    SignIn,
    SignOut,
    RootMetadata,
    GetMetadata,
    DeleteRoot,
    Delete,
    ListChildren,
    CreateFile,
    UpdateFile,
    CreateFolder,
    Rename,
    Move,
    Download,
    Thumbnail,
    StartUpload,
    AbortUpload,
    UploadSegment,
    CompleteUpload,
}

impl RouteKind {
    pub fn access(self) -> Access {
        match self {
            RouteKind::RootMetadata | RouteKind::DeleteRoot | RouteKind::Thumbnail => {
                Access::Limited
            }
            RouteKind::AuthMethod | RouteKind::SignIn | RouteKind::SignOut => Access::Anonymous,
            _ => Access::Authenticated,
        }
    }

    /// Stable label for logs and metrics
    pub fn name(self) -> &'static str {
        match self {
            RouteKind::AuthMethod => "auth_method",
            RouteKind::SignIn => "sign_in",
            RouteKind::SignOut => "sign_out",
            RouteKind::RootMetadata => "root_metadata",
            RouteKind::GetMetadata => "get_metadata",
            RouteKind::DeleteRoot => "delete_root",
            RouteKind::Delete => "delete",
            RouteKind::ListChildren => "list_children",
            RouteKind::CreateFile => "create_file",
            RouteKind::UpdateFile => "update_file",
            RouteKind::CreateFolder => "create_folder",
            RouteKind::Rename => "rename",
            RouteKind::Move => "move",
            RouteKind::Download => "download",
            RouteKind::Thumbnail => "thumbnail",
            RouteKind::StartUpload => "start_upload",
            RouteKind::AbortUpload => "abort_upload",
            RouteKind::UploadSegment => "upload_segment",
            RouteKind::CompleteUpload => "complete_upload",
        }
    }
}

/// Whether a route takes an id segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdRule {
    None,
    Required,
    Optional,
}

struct RouteEntry {
    method: Method,
    resource: &'static str,
    id: IdRule,
    kind: RouteKind,
}

const fn entry(method: Method, resource: &'static str, id: IdRule, kind: RouteKind) -> RouteEntry {
    RouteEntry {
        method,
        resource,
        id,
        kind,
    }
}

static ROUTES: &[RouteEntry] = &[
    entry(Method::GET, "gateway_auth_method", IdRule::None, RouteKind::AuthMethod),
    entry(Method::POST, "gateway_auth", IdRule::None, RouteKind::SignIn),
    entry(Method::DELETE, "gateway_auth", IdRule::Required, RouteKind::SignOut),
    entry(Method::GET, "gateway_metadata", IdRule::None, RouteKind::RootMetadata),
    entry(Method::GET, "gateway_metadata", IdRule::Required, RouteKind::GetMetadata),
    entry(Method::DELETE, "gateway_metadata", IdRule::None, RouteKind::DeleteRoot),
    entry(Method::DELETE, "gateway_metadata", IdRule::Required, RouteKind::Delete),
    entry(Method::GET, "gateway_metadata_children", IdRule::Optional, RouteKind::ListChildren),
    entry(Method::POST, "gateway_metadata_file", IdRule::Optional, RouteKind::CreateFile),
    entry(Method::PUT, "gateway_metadata_file", IdRule::Required, RouteKind::UpdateFile),
    entry(Method::POST, "gateway_metadata_folder", IdRule::Optional, RouteKind::CreateFolder),
    entry(Method::PUT, "gateway_metadata_name", IdRule::Required, RouteKind::Rename),
    entry(Method::PUT, "gateway_metadata_parent", IdRule::Required, RouteKind::Move),
    entry(Method::GET, "gateway_file", IdRule::Required, RouteKind::Download),
    entry(Method::GET, "gateway_file_thumbnail", IdRule::Required, RouteKind::Thumbnail),
    entry(Method::POST, "gateway_upload", IdRule::None, RouteKind::StartUpload),
    entry(Method::DELETE, "gateway_upload", IdRule::Required, RouteKind::AbortUpload),
    entry(Method::POST, "gateway_upload_segment", IdRule::Required, RouteKind::UploadSegment),
    entry(Method::POST, "gateway_metadata_upload", IdRule::Optional, RouteKind::CompleteUpload),
    entry(Method::PUT, "gateway_metadata_upload", IdRule::Optional, RouteKind::CompleteUpload),
];

/// A resolved route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub kind: RouteKind,
    pub id: Option<String>,
}

impl Route {
    /// Resolve a request line against the route table
    pub fn resolve(method: &Method, path: &str) -> Result<Route, RouterError> {
        let rest = path.strip_prefix(API_PREFIX).ok_or(RouterError::NotFound)?;
        let (resource, raw_id) = match rest.split_once('/') {
            Some((resource, id)) => (resource, Some(id)),
            None => (rest, None),
        };
        let id = match raw_id.filter(|id| !id.is_empty()) {
            Some(raw) => Some(
                percent_encoding::percent_decode_str(raw)
                    .decode_utf8()
                    .map_err(|_| RouterError::InvalidId)?
                    .into_owned(),
            ),
            None => None,
        };

        ROUTES
            .iter()
            .find(|route| {
                route.method == *method
                    && route.resource == resource
                    && match route.id {
                        IdRule::None => id.is_none(),
                        IdRule::Required => id.is_some(),
                        IdRule::Optional => true,
                    }
            })
            .map(|route| Route {
                kind: route.kind,
                id: id.clone(),
            })
            .ok_or(RouterError::NotFound)
    }

    pub fn access(&self) -> Access {
        self.kind.access()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(method: Method, path: &str) -> Result<Route, RouterError> {
        Route::resolve(&method, path)
    }

    #[test]
    fn test_root_and_item_metadata() {
        assert_eq!(
            resolve(Method::GET, "/v2/gateway_metadata").unwrap(),
            Route {
                kind: RouteKind::RootMetadata,
                id: None
            }
        );
        assert_eq!(
            resolve(Method::GET, "/v2/gateway_metadata/ZG9jcy8=").unwrap(),
            Route {
                kind: RouteKind::GetMetadata,
                id: Some("ZG9jcy8=".into())
            }
        );
        // Trailing slash without id is the root
        assert_eq!(
            resolve(Method::GET, "/v2/gateway_metadata/").unwrap().kind,
            RouteKind::RootMetadata
        );
    }

    #[test]
    fn test_delete_root_is_its_own_route() {
        assert_eq!(
            resolve(Method::DELETE, "/v2/gateway_metadata").unwrap().kind,
            RouteKind::DeleteRoot
        );
        assert_eq!(
            resolve(Method::DELETE, "/v2/gateway_metadata/YQ==").unwrap().kind,
            RouteKind::Delete
        );
    }

    #[test]
    fn test_percent_encoded_id() {
        let route = resolve(Method::GET, "/v2/gateway_file/ZG9jcy8%3D").unwrap();
        assert_eq!(route.id.as_deref(), Some("ZG9jcy8="));
    }

    #[test]
    fn test_upload_routes() {
        assert_eq!(
            resolve(Method::POST, "/v2/gateway_upload").unwrap().kind,
            RouteKind::StartUpload
        );
        let route = resolve(Method::POST, "/v2/gateway_upload_segment/ZG9jcy8=::YWJj").unwrap();
        assert_eq!(route.kind, RouteKind::UploadSegment);
        assert_eq!(route.id.as_deref(), Some("ZG9jcy8=::YWJj"));
        assert_eq!(
            resolve(Method::PUT, "/v2/gateway_metadata_upload/YQ==").unwrap().kind,
            RouteKind::CompleteUpload
        );
        assert_eq!(
            resolve(Method::POST, "/v2/gateway_metadata_upload").unwrap().kind,
            RouteKind::CompleteUpload
        );
    }

    #[test]
    fn test_unknown_routes() {
        assert_eq!(
            resolve(Method::GET, "/v1/gateway_metadata"),
            Err(RouterError::NotFound)
        );
        assert_eq!(
            resolve(Method::PATCH, "/v2/gateway_metadata/YQ=="),
            Err(RouterError::NotFound)
        );
        // Update requires an id
        assert_eq!(
            resolve(Method::PUT, "/v2/gateway_metadata_file"),
            Err(RouterError::NotFound)
        );
        assert_eq!(
            resolve(Method::GET, "/v2/gateway_nothing"),
            Err(RouterError::NotFound)
        );
    }

    #[test]
    fn test_access_levels() {
        assert_eq!(RouteKind::AuthMethod.access(), Access::Anonymous);
        assert_eq!(RouteKind::RootMetadata.access(), Access::Limited);
        assert_eq!(RouteKind::SignIn.access(), Access::Anonymous);
        assert_eq!(RouteKind::Download.access(), Access::Authenticated);
        assert_eq!(RouteKind::Thumbnail.access(), Access::Limited);
    }

    #[test]
    fn test_thumbnail_route() {
        let route = resolve(Method::GET, "/v2/gateway_file_thumbnail/YQ==").unwrap();
        assert_eq!(route.kind, RouteKind::Thumbnail);
        assert_eq!(
            resolve(Method::GET, "/v2/gateway_file_thumbnail"),
            Err(RouterError::NotFound)
        );
    }
}
