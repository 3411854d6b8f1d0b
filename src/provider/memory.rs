//! In-memory backend.
//!
//! Useful for tests and examples: it implements the chunked capability with
//! parts staged in a per-session map and records every deletion so callers
//! can assert on compensation behavior.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::RwLock;

use super::{ChunkedStorage, FileMeta, Metadata, StorageProvider};
use crate::error::{Result, UploadError};
use crate::session::{ChunkPart, ChunkSession, NewChunkSession};

#[derive(Default)]
pub struct MemoryProvider {
    files: RwLock<HashMap<String, Bytes>>,
    deleted: RwLock<Vec<String>>,
    staged: RwLock<HashMap<String, BTreeMap<u32, Bytes>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object bytes, if present.
    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.files.read().get(path).cloned()
    }

    /// Pre-populate an object, e.g. to simulate a completed presigned upload.
    pub fn insert_file(&self, path: impl Into<String>, content: impl Into<Bytes>) {
        self.files.write().insert(path.into(), content.into());
    }

    /// Paths passed to `delete_file`, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.read().clone()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        _options: &Metadata,
    ) -> Result<String> {
        self.files.write().insert(path.to_string(), content);
        Ok(path.to_string())
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or(UploadError::NotFound)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.files.write().remove(path);
        self.deleted.write().push(path.to_string());
        Ok(())
    }

    async fn presigned_url(&self, path: &str, _expires: Duration) -> Result<String> {
        Ok(format!("mem://{path}"))
    }

    fn chunked(&self) -> Option<&dyn ChunkedStorage> {
        Some(self)
    }
}

#[async_trait]
impl ChunkedStorage for MemoryProvider {
    async fn initiate_chunked(&self, session: &mut NewChunkSession) -> Result<()> {
        self.staged
            .write()
            .insert(session.id.clone(), BTreeMap::new());
        Ok(())
    }

    async fn upload_chunk(
        &self,
        session: &ChunkSession,
        index: u32,
        payload: Bytes,
    ) -> Result<ChunkPart> {
        let size = payload.len() as u64;
        let mut staged = self.staged.write();
        let parts = staged
            .get_mut(&session.id)
            .ok_or_else(|| UploadError::backend_msg("memory upload chunk", "unknown session"))?;
        parts.insert(index, payload);

        Ok(ChunkPart {
            index,
            size,
            checksum: String::new(),
            etag: format!("\"mem-{index}\""),
            uploaded_at: Some(Utc::now()),
        })
    }

    async fn complete_chunked(&self, session: &ChunkSession) -> Result<FileMeta> {
        let parts = self
            .staged
            .write()
            .remove(&session.id)
            .ok_or_else(|| UploadError::backend_msg("memory complete chunked", "unknown session"))?;
        if parts.is_empty() {
            return Err(UploadError::backend_msg(
                "memory complete chunked",
                format!("no parts uploaded for session {}", session.id),
            ));
        }

        let mut combined = BytesMut::new();
        for chunk in parts.values() {
            combined.extend_from_slice(chunk);
        }
        let combined = combined.freeze();
        let size = combined.len() as u64;
        self.files.write().insert(session.key.clone(), combined);

        Ok(FileMeta {
            content: None,
            content_type: session.metadata.content_type.clone().unwrap_or_default(),
            name: session.key.clone(),
            original_name: session.key.clone(),
            size,
            url: format!("mem://{}", session.key),
        })
    }

    async fn abort_chunked(&self, session: &ChunkSession) -> Result<()> {
        self.staged.write().remove(&session.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_delete_tracking() {
        let provider = MemoryProvider::new();
        provider
            .upload_file("a.bin", Bytes::from_static(b"data"), &Metadata::new())
            .await
            .unwrap();
        assert_eq!(provider.get_file("a.bin").await.unwrap(), "data");

        provider.delete_file("a.bin").await.unwrap();
        assert_eq!(provider.deleted(), vec!["a.bin".to_string()]);
        assert!(provider.file("a.bin").is_none());
    }

    #[tokio::test]
    async fn test_chunked_assembly_is_index_ordered() {
        let provider = MemoryProvider::new();
        let store = crate::session::ChunkSessionStore::default();

        let mut new = NewChunkSession::new("s1", "joined.bin");
        provider.initiate_chunked(&mut new).await.unwrap();
        let session = store.create(new).unwrap();

        provider
            .upload_chunk(&session, 1, Bytes::from_static(b"efgh"))
            .await
            .unwrap();
        provider
            .upload_chunk(&session, 0, Bytes::from_static(b"abcd"))
            .await
            .unwrap();

        let meta = provider.complete_chunked(&session).await.unwrap();
        assert_eq!(meta.size, 8);
        assert_eq!(provider.file("joined.bin").unwrap(), "abcdefgh");
    }
}
