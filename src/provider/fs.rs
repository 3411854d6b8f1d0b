//! Local filesystem backend.
//!
//! Chunks are staged under `<base>/.chunks/<session-id>/<index>.part` and
//! concatenated in ascending index order at completion. Presigned GET URLs
//! are plain `url_prefix + path` joins; presigned POST is not supported.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use super::{ChunkedStorage, FileMeta, Metadata, StorageProvider};
use crate::error::{Result, UploadError};
use crate::session::{ChunkPart, ChunkSession, NewChunkSession};

/// Filesystem storage rooted at a base directory.
pub struct FsProvider {
    base: PathBuf,
    url_prefix: Option<String>,
}

impl FsProvider {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            url_prefix: None,
        }
    }

    /// Prefix prepended to paths when building presigned URLs.
    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.url_prefix = Some(prefix);
        self
    }

    /// Join `path` under the base directory, rejecting absolute paths and
    /// parent-directory traversal.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        if rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        }) {
            return Err(UploadError::InvalidPath);
        }
        Ok(self.base.join(rel))
    }

    fn chunk_dir(&self, session_id: &str) -> PathBuf {
        self.base.join(".chunks").join(session_id)
    }

    fn chunk_file(&self, session_id: &str, index: u32) -> PathBuf {
        self.chunk_dir(session_id).join(format!("{index:08}.part"))
    }

    fn url_for(&self, path: &str) -> String {
        match &self.url_prefix {
            Some(prefix) => format!("{}{}", prefix, path.trim_start_matches('/')),
            None => path.to_string(),
        }
    }
}

fn map_io(err: std::io::Error) -> UploadError {
    match err.kind() {
        std::io::ErrorKind::NotFound => UploadError::NotFound,
        std::io::ErrorKind::PermissionDenied => UploadError::PermissionDenied,
        _ => UploadError::Io(err),
    }
}

#[async_trait]
impl StorageProvider for FsProvider {
    #[tracing::instrument(name = "fs.upload_file", skip(self, content), fields(path = %path, bytes = content.len()), err)]
    async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        _options: &Metadata,
    ) -> Result<String> {
        let full = self.full_path(path)?;
        if let Some(dir) = full.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(map_io)?;
        }
        tokio::fs::write(&full, &content).await.map_err(map_io)?;
        Ok(full.to_string_lossy().into_owned())
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        let full = self.full_path(path)?;
        let data = tokio::fs::read(&full).await.map_err(map_io)?;
        Ok(Bytes::from(data))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        tokio::fs::remove_file(&full).await.map_err(map_io)
    }

    async fn presigned_url(&self, path: &str, _expires: Duration) -> Result<String> {
        let full = self.full_path(path)?;
        tokio::fs::metadata(&full).await.map_err(map_io)?;
        Ok(self.url_for(path))
    }

    /// Checks the base directory exists and is writable by creating and
    /// removing a probe file.
    async fn validate(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.base).await.map_err(|err| {
            UploadError::ProviderValidation(format!(
                "stat base path {}: {err}",
                self.base.display()
            ))
        })?;
        if !meta.is_dir() {
            return Err(UploadError::ProviderValidation(format!(
                "base path is not a directory: {}",
                self.base.display()
            )));
        }

        let probe = self.base.join(format!(".tsumiki-probe-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&probe, b"")
            .await
            .map_err(|err| UploadError::ProviderValidation(format!("create probe file: {err}")))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|err| UploadError::ProviderValidation(format!("remove probe file: {err}")))?;
        Ok(())
    }

    fn chunked(&self) -> Option<&dyn ChunkedStorage> {
        Some(self)
    }
}

#[async_trait]
impl ChunkedStorage for FsProvider {
    async fn initiate_chunked(&self, session: &mut NewChunkSession) -> Result<()> {
        tokio::fs::create_dir_all(self.chunk_dir(&session.id))
            .await
            .map_err(|err| UploadError::backend("fs initiate chunked", err))?;
        Ok(())
    }

    #[tracing::instrument(name = "fs.upload_chunk", skip(self, session, payload), fields(session_id = %session.id, index = index, bytes = payload.len()), err)]
    async fn upload_chunk(
        &self,
        session: &ChunkSession,
        index: u32,
        payload: Bytes,
    ) -> Result<ChunkPart> {
        let dir = self.chunk_dir(&session.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| UploadError::backend("fs ensure chunk directory", err))?;

        let chunk_path = self.chunk_file(&session.id, index);
        if tokio::fs::try_exists(&chunk_path)
            .await
            .map_err(|err| UploadError::backend("fs stat chunk file", err))?
        {
            return Err(UploadError::PartDuplicate);
        }

        tokio::fs::write(&chunk_path, &payload)
            .await
            .map_err(|err| UploadError::backend("fs write chunk", err))?;

        Ok(ChunkPart {
            index,
            size: payload.len() as u64,
            checksum: String::new(),
            etag: String::new(),
            uploaded_at: Some(Utc::now()),
        })
    }

    #[tracing::instrument(name = "fs.complete_chunked", skip(self, session), fields(session_id = %session.id, key = %session.key, parts = session.uploaded_parts.len()), err)]
    async fn complete_chunked(&self, session: &ChunkSession) -> Result<FileMeta> {
        if session.uploaded_parts.is_empty() {
            return Err(UploadError::backend_msg(
                "fs complete chunked",
                format!("no parts uploaded for session {}", session.id),
            ));
        }

        let full = self.full_path(&session.key)?;
        if let Some(dir) = full.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|err| UploadError::backend("fs ensure destination dir", err))?;
        }

        let mut dest = tokio::fs::File::create(&full)
            .await
            .map_err(|err| UploadError::backend("fs create destination file", err))?;

        // BTreeMap iteration gives ascending index order.
        for index in session.uploaded_parts.keys() {
            let chunk = tokio::fs::read(self.chunk_file(&session.id, *index))
                .await
                .map_err(|err| UploadError::backend("fs read chunk", err))?;
            dest.write_all(&chunk)
                .await
                .map_err(|err| UploadError::backend("fs append chunk", err))?;
        }
        dest.flush()
            .await
            .map_err(|err| UploadError::backend("fs flush destination", err))?;

        tokio::fs::remove_dir_all(self.chunk_dir(&session.id))
            .await
            .map_err(|err| UploadError::backend("fs cleanup chunks", err))?;

        Ok(FileMeta {
            content: None,
            content_type: session.metadata.content_type.clone().unwrap_or_default(),
            name: session.key.clone(),
            original_name: session.key.clone(),
            size: session.total_size,
            url: full.to_string_lossy().into_owned(),
        })
    }

    async fn abort_chunked(&self, session: &ChunkSession) -> Result<()> {
        match tokio::fs::remove_dir_all(self.chunk_dir(&session.id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UploadError::backend("fs abort chunked", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChunkSessionStore;

    fn session_for(store: &ChunkSessionStore, id: &str, key: &str) -> ChunkSession {
        store.create(NewChunkSession::new(id, key)).unwrap()
    }

    #[tokio::test]
    async fn test_upload_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());

        provider
            .upload_file("a/b.bin", Bytes::from_static(b"hello"), &Metadata::new())
            .await
            .unwrap();
        assert_eq!(provider.get_file("a/b.bin").await.unwrap(), "hello");

        provider.delete_file("a/b.bin").await.unwrap();
        assert!(matches!(
            provider.get_file("a/b.bin").await,
            Err(UploadError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal_paths() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());

        assert!(matches!(
            provider.get_file("../outside").await,
            Err(UploadError::InvalidPath)
        ));
        assert!(matches!(
            provider
                .upload_file("/abs", Bytes::new(), &Metadata::new())
                .await,
            Err(UploadError::InvalidPath)
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_assemble_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        let store = ChunkSessionStore::default();

        let mut new = NewChunkSession::new("s1", "out.bin");
        provider.initiate_chunked(&mut new).await.unwrap();
        let mut session = store.create(new).unwrap();

        for (index, data) in [(2u32, "c"), (0, "a"), (1, "b")] {
            let part = provider
                .upload_chunk(&session, index, Bytes::from(data))
                .await
                .unwrap();
            session = store.add_part("s1", part).unwrap();
        }

        provider.complete_chunked(&session).await.unwrap();
        assert_eq!(provider.get_file("out.bin").await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_duplicate_chunk_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        let store = ChunkSessionStore::default();

        let mut new = NewChunkSession::new("s1", "dup.bin");
        provider.initiate_chunked(&mut new).await.unwrap();
        let session = store.create(new).unwrap();

        provider
            .upload_chunk(&session, 0, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(matches!(
            provider
                .upload_chunk(&session, 0, Bytes::from_static(b"y"))
                .await,
            Err(UploadError::PartDuplicate)
        ));
    }

    #[tokio::test]
    async fn test_complete_without_parts_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        let session = session_for(&ChunkSessionStore::default(), "s1", "never.bin");

        assert!(matches!(
            provider.complete_chunked(&session).await,
            Err(UploadError::Backend { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_removes_staged_chunks_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        let store = ChunkSessionStore::default();

        let mut new = NewChunkSession::new("s1", "gone.bin");
        provider.initiate_chunked(&mut new).await.unwrap();
        let session = store.create(new).unwrap();
        provider
            .upload_chunk(&session, 0, Bytes::from_static(b"x"))
            .await
            .unwrap();

        provider.abort_chunked(&session).await.unwrap();
        assert!(!provider.chunk_dir("s1").exists());
        provider.abort_chunked(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_presigned_url_joins_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path()).with_url_prefix("https://cdn.example.com");

        provider
            .upload_file("img/a.png", Bytes::from_static(b"png"), &Metadata::new())
            .await
            .unwrap();
        let url = provider
            .presigned_url("img/a.png", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/img/a.png");

        assert!(matches!(
            provider.presigned_url("missing.png", Duration::from_secs(60)).await,
            Err(UploadError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_validate_checks_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsProvider::new(dir.path()).validate().await.is_ok());
        assert!(matches!(
            FsProvider::new("/nonexistent/tsumiki").validate().await,
            Err(UploadError::ProviderValidation(_))
        ));
    }
}
