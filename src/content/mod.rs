//! Content module
//!
//! Maps the gateway's file/folder model onto S3 keys: opaque IDs
//! ([`id`]), derived metadata ([`metadata`]) and the business operations of
//! [`GatewayContentService`].

pub mod id;
pub mod metadata;
mod service;

pub use id::{metadata_id, object_key, object_name, ContentIdError, ROOT_ID};
pub use metadata::{ContentKind, ContentMetadata};
pub use service::{ContentPage, FileDownload, GatewayContentService, UploadTarget};
