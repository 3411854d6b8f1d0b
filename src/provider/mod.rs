//! Storage provider capability traits and shared value types.
//!
//! A backend implements [`StorageProvider`] for whole-object operations and
//! advertises optional capabilities through [`StorageProvider::chunked`] and
//! [`StorageProvider::presigned_post`]. The orchestrator performs the
//! capability check once per call and surfaces
//! [`UploadError::NotImplemented`](crate::error::UploadError::NotImplemented)
//! when the active backend lacks what the operation needs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{ChunkPart, ChunkSession, NewChunkSession};

pub mod fs;
pub mod memory;
pub mod multi;
pub mod s3;

pub use fs::FsProvider;
pub use memory::MemoryProvider;
pub use multi::MultiProvider;
pub use s3::S3Provider;

/// Upload options forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    #[serde(default)]
    pub public: bool,
    /// Time-to-live hint; meaning depends on the operation (e.g. presigned
    /// post validity).
    pub ttl: Option<Duration>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn with_public_access(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileMeta {
    /// Raw bytes when the manager read them anyway (whole-file path); omitted
    /// for chunked and presigned uploads.
    #[serde(skip)]
    pub content: Option<Bytes>,
    pub content_type: String,
    pub name: String,
    pub original_name: String,
    pub size: u64,
    pub url: String,
}

/// Upload result for an image plus its generated derivatives.
#[derive(Debug, Clone, Serialize)]
pub struct ImageMeta {
    #[serde(flatten)]
    pub file: FileMeta,
    pub thumbnails: HashMap<String, FileMeta>,
}

/// A pre-authorized form submission a client can use to upload directly to
/// the backend without routing bytes through this service.
#[derive(Debug, Clone, Serialize)]
pub struct PresignedPost {
    pub url: String,
    pub method: String,
    pub fields: HashMap<String, String>,
    pub expiry: DateTime<Utc>,
}

/// What the client reports back after completing a presigned upload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresignedUploadResult {
    pub key: String,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// An uploaded file as received from the outer surface (HTTP handler, CLI).
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub content_type: String,
    pub content: Bytes,
}

impl IncomingFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }
}

/// Whole-object storage operations every backend must support.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store `content` at `path`, returning the object's location/URL.
    async fn upload_file(&self, path: &str, content: Bytes, options: &Metadata)
        -> Result<String>;

    async fn get_file(&self, path: &str) -> Result<Bytes>;

    async fn delete_file(&self, path: &str) -> Result<()>;

    /// A time-limited URL for reading the object.
    async fn presigned_url(&self, path: &str, expires: Duration) -> Result<String>;

    /// Fail fast on misconfiguration (unreachable bucket, unwritable
    /// directory). Invoked once by the manager before first use.
    async fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// The chunked-upload capability, if this backend has one.
    fn chunked(&self) -> Option<&dyn ChunkedStorage> {
        None
    }

    /// The presigned-POST capability, if this backend has one.
    fn presigned_post(&self) -> Option<&dyn PresignedPoster> {
        None
    }
}

/// Optional capability: resumable chunked uploads.
#[async_trait]
pub trait ChunkedStorage: Send + Sync {
    /// Prepare backend state for a new session, recording anything it needs
    /// across calls (e.g. a multipart upload id) into
    /// `session.provider_data`.
    async fn initiate_chunked(&self, session: &mut NewChunkSession) -> Result<()>;

    /// Persist one chunk. The returned part carries the size/etag the backend
    /// actually observed.
    async fn upload_chunk(
        &self,
        session: &ChunkSession,
        index: u32,
        payload: Bytes,
    ) -> Result<ChunkPart>;

    /// Assemble all uploaded parts, in ascending index order, into the final
    /// object. At least one part must have been uploaded.
    async fn complete_chunked(&self, session: &ChunkSession) -> Result<FileMeta>;

    /// Discard any staged partial data for the session.
    async fn abort_chunked(&self, session: &ChunkSession) -> Result<()>;
}

/// Optional capability: direct-to-storage presigned POST uploads.
#[async_trait]
pub trait PresignedPoster: Send + Sync {
    async fn create_presigned_post(&self, key: &str, metadata: &Metadata)
        -> Result<PresignedPost>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let md = Metadata::new()
            .with_content_type("image/png")
            .with_cache_control("max-age=3600")
            .with_public_access(true)
            .with_ttl(Duration::from_secs(60));

        assert_eq!(md.content_type.as_deref(), Some("image/png"));
        assert_eq!(md.cache_control.as_deref(), Some("max-age=3600"));
        assert!(md.public);
        assert_eq!(md.ttl, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_capability_defaults_to_absent() {
        struct Plain;

        #[async_trait]
        impl StorageProvider for Plain {
            async fn upload_file(&self, path: &str, _: Bytes, _: &Metadata) -> Result<String> {
                Ok(path.to_string())
            }
            async fn get_file(&self, _: &str) -> Result<Bytes> {
                Ok(Bytes::new())
            }
            async fn delete_file(&self, _: &str) -> Result<()> {
                Ok(())
            }
            async fn presigned_url(&self, path: &str, _: Duration) -> Result<String> {
                Ok(path.to_string())
            }
        }

        let provider = Plain;
        assert!(provider.chunked().is_none());
        assert!(provider.presigned_post().is_none());
    }
}
