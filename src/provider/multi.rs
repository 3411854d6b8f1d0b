//! Composite backend: an authoritative object store fronted by a local
//! filesystem mirror.
//!
//! Writes go to the object store first; mirroring to disk is best-effort and
//! never fails the upload. Reads prefer the mirror and backfill it on a miss.
//! Chunked and presigned-POST capabilities are forwarded to the object store,
//! with completed chunked objects synced back to the mirror.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    ChunkedStorage, FileMeta, FsProvider, Metadata, PresignedPost, PresignedPoster,
    StorageProvider,
};
use crate::error::{Result, UploadError};
use crate::session::{ChunkPart, ChunkSession, NewChunkSession};

pub struct MultiProvider {
    local: FsProvider,
    object_store: Arc<dyn StorageProvider>,
}

impl MultiProvider {
    pub fn new(local: FsProvider, object_store: Arc<dyn StorageProvider>) -> Self {
        Self {
            local,
            object_store,
        }
    }

    fn remote_chunked(&self) -> Result<&dyn ChunkedStorage> {
        self.object_store
            .chunked()
            .ok_or(UploadError::NotImplemented)
    }

    async fn mirror(&self, path: &str, content: Bytes, options: &Metadata) {
        if let Err(err) = self.local.upload_file(path, content, options).await {
            tracing::warn!(path = %path, error = %err, "local mirror write failed");
        }
    }

    /// Pull the finished object down from the object store into the mirror.
    /// Failures are logged and swallowed; the object store copy is the source
    /// of truth.
    async fn sync_from_remote(&self, path: &str, options: &Metadata) {
        match self.object_store.get_file(path).await {
            Ok(content) => self.mirror(path, content, options).await,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "local mirror sync failed");
            }
        }
    }
}

#[async_trait]
impl StorageProvider for MultiProvider {
    async fn upload_file(&self, path: &str, content: Bytes, options: &Metadata) -> Result<String> {
        let url = self
            .object_store
            .upload_file(path, content.clone(), options)
            .await?;
        self.mirror(path, content, options).await;
        Ok(url)
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        match self.local.get_file(path).await {
            Ok(content) => Ok(content),
            Err(UploadError::NotFound) => {
                let content = self.object_store.get_file(path).await?;
                self.mirror(path, content.clone(), &Metadata::new()).await;
                Ok(content)
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.object_store.delete_file(path).await?;
        if let Err(err) = self.local.delete_file(path).await {
            if !matches!(err, UploadError::NotFound) {
                tracing::warn!(path = %path, error = %err, "local mirror delete failed");
            }
        }
        Ok(())
    }

    async fn presigned_url(&self, path: &str, expires: Duration) -> Result<String> {
        self.object_store.presigned_url(path, expires).await
    }

    async fn validate(&self) -> Result<()> {
        self.local.validate().await?;
        self.object_store.validate().await
    }

    fn chunked(&self) -> Option<&dyn ChunkedStorage> {
        self.object_store
            .chunked()
            .map(|_| self as &dyn ChunkedStorage)
    }

    fn presigned_post(&self) -> Option<&dyn PresignedPoster> {
        self.object_store
            .presigned_post()
            .map(|_| self as &dyn PresignedPoster)
    }
}

#[async_trait]
impl ChunkedStorage for MultiProvider {
    async fn initiate_chunked(&self, session: &mut NewChunkSession) -> Result<()> {
        self.remote_chunked()?.initiate_chunked(session).await
    }

    async fn upload_chunk(
        &self,
        session: &ChunkSession,
        index: u32,
        payload: Bytes,
    ) -> Result<ChunkPart> {
        self.remote_chunked()?
            .upload_chunk(session, index, payload)
            .await
    }

    async fn complete_chunked(&self, session: &ChunkSession) -> Result<FileMeta> {
        let meta = self.remote_chunked()?.complete_chunked(session).await?;
        self.sync_from_remote(&session.key, &session.metadata).await;
        Ok(meta)
    }

    async fn abort_chunked(&self, session: &ChunkSession) -> Result<()> {
        self.remote_chunked()?.abort_chunked(session).await
    }
}

#[async_trait]
impl PresignedPoster for MultiProvider {
    async fn create_presigned_post(&self, key: &str, metadata: &Metadata) -> Result<PresignedPost> {
        self.object_store
            .presigned_post()
            .ok_or(UploadError::NotImplemented)?
            .create_presigned_post(key, metadata)
            .await
    }
}
