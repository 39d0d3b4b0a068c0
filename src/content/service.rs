//! Gateway content service
//!
//! Business operations over one registration's bucket. Every operation is
//! composed from S3 transport calls; nothing is cached or persisted between
//! calls. "Not found" and "not allowed" transport outcomes become
//! [`GatewayError::NotFound`] / [`GatewayError::NotAllowed`]; transport
//! errors pass through untouched for the pipeline to translate.

use super::id::{self, is_folder_key, parent_prefix};
use super::metadata::ContentMetadata;
use crate::error::GatewayError;
use crate::s3::{
    empty_stream, ByteStream, CompletedPart, ListObjectsRequest, S3Client, S3Outcome,
    S3PutObjectResponse,
};
use crate::upload::{
    IntegrityProbe, SegmentCookie, UploadCookie, UploadSegment, UploadSession,
    UploadSessionToken, UploadedSegment, VerifyingStream,
};
use std::collections::HashSet;
use tracing::{info, warn};

/// Where a resumable upload lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// New file `prefix + name`
    NewFile { prefix: String, name: String },
    /// Replace an existing file
    Existing { id: String },
}

/// One page of a folder listing
#[derive(Debug, Clone)]
pub struct ContentPage {
    pub items: Vec<ContentMetadata>,
    pub next_page: Option<String>,
}

/// Streamed file content
pub struct FileDownload {
    pub metadata: ContentMetadata,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

fn require<T>(outcome: S3Outcome<T>, subject: &str) -> Result<T, GatewayError> {
    match outcome {
        S3Outcome::Success(value) => Ok(value),
        S3Outcome::NotFound => Err(GatewayError::NotFound(format!("{} not found.", subject))),
        S3Outcome::NotAllowed => Err(GatewayError::not_allowed()),
    }
}

fn validate_name(name: &str) -> Result<(), GatewayError> {
    if name.is_empty() {
        return Err(GatewayError::Validation("Missing name.".into()));
    }
    if name.contains('/') {
        return Err(GatewayError::Validation(
            "Name must not contain '/'.".into(),
        ));
    }
    if name == "." || name == ".." {
        return Err(GatewayError::Validation(format!("Invalid name '{}'.", name)));
    }
    Ok(())
}

fn validate_prefix(prefix: &str) -> Result<(), GatewayError> {
    if !is_folder_key(prefix) {
        return Err(GatewayError::Validation("Parent is not a folder.".into()));
    }
    Ok(())
}

/// Content operations for one bucket
#[derive(Debug, Clone)]
pub struct GatewayContentService {
    client: S3Client,
}

impl GatewayContentService {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }

    /// Whether the bucket exists and the credentials can reach it
    pub async fn check_bucket(&self) -> Result<bool, GatewayError> {
        Ok(self.client.head_bucket().await?.is_success())
    }

    /// PUT a verified stream, reporting integrity failures ahead of transport errors
    async fn put_verified(
        &self,
        key: &str,
        size: u64,
        expected_sha256: Option<&str>,
        body: ByteStream,
    ) -> Result<S3PutObjectResponse, GatewayError> {
        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(
            body,
            size,
            expected_sha256.map(str::to_string),
            probe.clone(),
        );
        let result = self.client.put_object(key, Box::pin(stream), size).await;
        if let Some(failure) = probe.failure() {
            return Err(GatewayError::Integrity(failure));
        }
        require(result?, key)
    }

    /// Metadata of a file or folder. Folders are answered without I/O.
    pub async fn get_metadata(&self, content_id: &str) -> Result<ContentMetadata, GatewayError> {
        let key = id::object_key(content_id)?;
        if key.is_empty() {
            return Ok(ContentMetadata::root());
        }
        if is_folder_key(&key) {
            return Ok(ContentMetadata::folder(&key));
        }

        let head = require(self.client.head_object(&key).await?, "File")?;
        Ok(ContentMetadata::file(
            &key,
            id::object_name(&key)?,
            Some(head.size),
            head.etag,
            head.last_modified,
        ))
    }

    /// Stream a file's content
    pub async fn read_file(&self, content_id: &str) -> Result<FileDownload, GatewayError> {
        let key = id::object_key(content_id)?;
        if is_folder_key(&key) {
            return Err(GatewayError::Validation("Not a file.".into()));
        }

        let object = require(self.client.get_object(&key).await?, "File")?;
        Ok(FileDownload {
            metadata: ContentMetadata::file(
                &key,
                id::object_name(&key)?,
                object.content_length,
                object.etag,
                object.last_modified,
            ),
            content_length: object.content_length,
            body: object.body,
        })
    }

    /// One page of the direct children of `prefix`
    pub async fn list_content(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ContentPage, GatewayError> {
        validate_prefix(prefix)?;

        let page = require(
            self.client
                .list_objects(ListObjectsRequest {
                    prefix: Some(prefix),
                    delimiter: Some("/"),
                    continuation_token,
                    max_keys: None,
                })
                .await?,
            "Folder",
        )?;

        let mut items = Vec::with_capacity(page.contents.len() + page.common_prefixes.len());
        for object in &page.contents {
            // The folder's own marker object
            if object.key == prefix {
                continue;
            }
            let name = object.key.rsplit('/').next().unwrap_or(&object.key);
            items.push(ContentMetadata::file(
                &object.key,
                name,
                Some(object.size),
                object.etag.clone(),
                object.modified_millis(),
            ));
        }
        for common in &page.common_prefixes {
            if common.prefix == "/" || common.prefix.is_empty() {
                continue;
            }
            items.push(ContentMetadata::folder(&common.prefix));
        }

        Ok(ContentPage {
            items,
            next_page: page.next_page().map(str::to_string),
        })
    }

    /// Create `prefix + name` from a stream of `size` bytes
    pub async fn create_file(
        &self,
        prefix: &str,
        name: &str,
        size: u64,
        expected_sha256: Option<&str>,
        body: ByteStream,
    ) -> Result<ContentMetadata, GatewayError> {
        validate_prefix(prefix)?;
        validate_name(name)?;
        let key = format!("{}{}", prefix, name);

        let response = self.put_verified(&key, size, expected_sha256, body).await?;
        info!(key = %key, size = size, "File created");
        Ok(ContentMetadata::file(&key, name, Some(size), response.etag, None))
    }

    /// Create the zero-length marker `prefix + name + "/"`
    pub async fn create_folder(
        &self,
        prefix: &str,
        name: &str,
    ) -> Result<ContentMetadata, GatewayError> {
        validate_prefix(prefix)?;
        validate_name(name)?;
        let key = format!("{}{}/", prefix, name);

        require(self.client.put_object(&key, empty_stream(), 0).await?, &key)?;
        info!(key = %key, "Folder created");
        Ok(ContentMetadata::folder(&key))
    }

    /// Replace a file's content
    pub async fn update_file(
        &self,
        content_id: &str,
        size: u64,
        expected_sha256: Option<&str>,
        body: ByteStream,
    ) -> Result<ContentMetadata, GatewayError> {
        let key = id::object_key(content_id)?;
        if is_folder_key(&key) {
            return Err(GatewayError::Validation("Not a file.".into()));
        }

        let response = self.put_verified(&key, size, expected_sha256, body).await?;
        Ok(ContentMetadata::file(
            &key,
            id::object_name(&key)?,
            Some(size),
            response.etag,
            None,
        ))
    }

    /// Delete a file or, recursively, a folder
    pub async fn delete(&self, content_id: &str) -> Result<(), GatewayError> {
        let key = id::object_key(content_id)?;
        if key.is_empty() {
            return Err(GatewayError::not_allowed());
        }
        if is_folder_key(&key) {
            self.delete_folder(&key).await
        } else {
            self.delete_file(&key).await
        }
    }

    pub async fn delete_file(&self, key: &str) -> Result<(), GatewayError> {
        require(self.client.delete_object(key).await?, key)?;
        info!(key = %key, "File deleted");
        Ok(())
    }

    /// Delete every object under `prefix`, one listing page at a time
    pub async fn delete_folder(&self, prefix: &str) -> Result<(), GatewayError> {
        if prefix.is_empty() || !is_folder_key(prefix) {
            return Err(GatewayError::not_allowed());
        }

        let mut continuation_token: Option<String> = None;
        let mut deleted = 0usize;
        loop {
            let page = require(
                self.client
                    .list_objects(ListObjectsRequest {
                        prefix: Some(prefix),
                        delimiter: None,
                        continuation_token: continuation_token.as_deref(),
                        max_keys: None,
                    })
                    .await?,
                "Folder",
            )?;

            let keys: Vec<String> = page.contents.iter().map(|o| o.key.clone()).collect();
            if !keys.is_empty() {
                require(self.client.delete_objects(&keys).await?, prefix)?;
                deleted += keys.len();
            }

            match page.next_page() {
                Some(next) => continuation_token = Some(next.to_string()),
                None => break,
            }
        }

        info!(prefix = %prefix, objects = deleted, "Folder deleted");
        Ok(())
    }

    /// Copy `key` to `new_key`, then delete `key`.
    ///
    /// A failed delete leaves both copies in place; it is logged, not undone.
    async fn relocate(
        &self,
        key: &str,
        new_key: &str,
        size: u64,
    ) -> Result<ContentMetadata, GatewayError> {
        let copy = require(self.client.copy_object(key, new_key).await?, key)?;

        match self.client.delete_object(key).await {
            Ok(S3Outcome::Success(())) => {}
            Ok(_) => warn!(key = %key, new_key = %new_key, "Source kept after copy: delete refused"),
            Err(e) => warn!(key = %key, new_key = %new_key, error = %e, "Source kept after copy"),
        }

        Ok(ContentMetadata::file(
            new_key,
            id::object_name(new_key)?,
            Some(size),
            copy.etag.clone(),
            copy.modified_millis(),
        ))
    }

    /// Move a file into another folder
    pub async fn move_file(
        &self,
        content_id: &str,
        new_parent_id: &str,
    ) -> Result<ContentMetadata, GatewayError> {
        let key = id::object_key(content_id)?;
        if is_folder_key(&key) {
            return Err(GatewayError::NotAllowed("Folders cannot be moved.".into()));
        }
        let new_prefix = id::object_key(new_parent_id)?;
        if !is_folder_key(&new_prefix) {
            return Err(GatewayError::NotAllowed(
                "Destination is not a folder.".into(),
            ));
        }

        let source = require(self.client.head_object(&key).await?, "File")?;
        let new_key = format!("{}{}", new_prefix, id::object_name(&key)?);
        if new_key == key {
            return Ok(ContentMetadata::file(
                &key,
                id::object_name(&key)?,
                Some(source.size),
                source.etag,
                source.last_modified,
            ));
        }

        let metadata = self.relocate(&key, &new_key, source.size).await?;
        info!(key = %key, new_key = %new_key, "File moved");
        Ok(metadata)
    }

    /// Rename a file within its folder
    pub async fn rename(
        &self,
        content_id: &str,
        new_name: &str,
    ) -> Result<ContentMetadata, GatewayError> {
        let key = id::object_key(content_id)?;
        if is_folder_key(&key) {
            return Err(GatewayError::NotAllowed(
                "Folders cannot be renamed.".into(),
            ));
        }
        validate_name(new_name)?;

        let source = require(self.client.head_object(&key).await?, "File")?;
        let new_key = format!("{}{}", parent_prefix(&key), new_name);
        if new_key == key {
            return Ok(ContentMetadata::file(
                &key,
                new_name,
                Some(source.size),
                source.etag,
                source.last_modified,
            ));
        }

        let metadata = self.relocate(&key, &new_key, source.size).await?;
        info!(key = %key, new_key = %new_key, "File renamed");
        Ok(metadata)
    }

    /// Open a multipart session and describe it to the client
    pub async fn start_upload(
        &self,
        target: UploadTarget,
        segments: Vec<UploadSegment>,
    ) -> Result<UploadSession, GatewayError> {
        if segments.is_empty() {
            return Err(GatewayError::Validation("Missing segments.".into()));
        }
        let mut seen = HashSet::new();
        for segment in &segments {
            segment.validate().map_err(GatewayError::Validation)?;
            if !seen.insert(segment.number) {
                return Err(GatewayError::Validation(format!(
                    "Duplicate segment number {}.",
                    segment.number
                )));
            }
        }

        let key = match target {
            UploadTarget::NewFile { prefix, name } => {
                validate_prefix(&prefix)?;
                validate_name(&name)?;
                format!("{}{}", prefix, name)
            }
            UploadTarget::Existing { id: content_id } => {
                let key = id::object_key(&content_id)?;
                if is_folder_key(&key) {
                    return Err(GatewayError::Validation("Not a file.".into()));
                }
                key
            }
        };

        let upload_id = require(self.client.create_multipart_upload(&key).await?, &key)?;
        let token = UploadSessionToken::new(key, upload_id);
        info!(key = %token.object_key(), segments = segments.len(), "Upload started");

        Ok(UploadSession {
            id: token.encode(),
            segments: segments
                .into_iter()
                .map(|segment| UploadSegment {
                    cookie: SegmentCookie::default(),
                    ..segment
                })
                .collect(),
            cookie: UploadCookie::default(),
        })
    }

    /// Store one verified segment as an S3 part
    pub async fn upload_segment(
        &self,
        upload_id: &str,
        number: u32,
        size: u64,
        expected_sha256: &str,
        body: ByteStream,
    ) -> Result<UploadedSegment, GatewayError> {
        let token = UploadSessionToken::decode(upload_id)?;
        let segment = UploadSegment {
            number,
            sha256: expected_sha256.to_string(),
            size,
            cookie: SegmentCookie::default(),
        };
        segment.validate().map_err(GatewayError::Validation)?;

        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(
            body,
            size,
            Some(expected_sha256.to_string()),
            probe.clone(),
        );
        let result = self
            .client
            .upload_part(
                token.object_key(),
                token.upload_id(),
                number,
                Box::pin(stream),
                size,
            )
            .await;
        if let Some(failure) = probe.failure() {
            warn!(key = %token.object_key(), segment = number, "Segment rejected: {}", failure);
            return Err(GatewayError::Integrity(failure));
        }
        let part = require(result?, "Upload")?;

        Ok(UploadedSegment {
            upload_id: upload_id.to_string(),
            segment: UploadSegment {
                cookie: SegmentCookie {
                    etag: Some(part.etag),
                },
                ..segment
            },
            upload_cookie: UploadCookie::default(),
        })
    }

    /// Assemble the uploaded segments, ordered by number
    pub async fn complete_upload(
        &self,
        upload_id: &str,
        segments: &[UploadSegment],
        size: u64,
    ) -> Result<ContentMetadata, GatewayError> {
        let token = UploadSessionToken::decode(upload_id)?;
        if segments.is_empty() {
            return Err(GatewayError::Validation("Missing segments.".into()));
        }

        let mut parts = segments
            .iter()
            .map(|segment| {
                segment
                    .cookie
                    .etag
                    .clone()
                    .filter(|etag| !etag.is_empty())
                    .map(|etag| CompletedPart {
                        part_number: segment.number,
                        etag,
                    })
                    .ok_or_else(|| {
                        GatewayError::Validation(format!(
                            "Segment {} has not been uploaded.",
                            segment.number
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        parts.sort_by_key(|part| part.part_number);

        let result = require(
            self.client
                .complete_multipart_upload(token.object_key(), token.upload_id(), &parts)
                .await?,
            "Upload",
        )?;
        info!(key = %token.object_key(), parts = parts.len(), "Upload completed");

        Ok(ContentMetadata::file(
            token.object_key(),
            id::object_name(token.object_key())?,
            Some(size),
            result.etag,
            None,
        ))
    }

    /// Abort a multipart session
    pub async fn delete_upload(&self, upload_id: &str) -> Result<(), GatewayError> {
        let token = UploadSessionToken::decode(upload_id)?;
        require(
            self.client
                .abort_multipart_upload(token.object_key(), token.upload_id())
                .await?,
            "Upload",
        )?;
        info!(key = %token.object_key(), "Upload aborted");
        Ok(())
    }
}
