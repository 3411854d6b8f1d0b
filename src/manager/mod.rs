//! Upload orchestration.
//!
//! [`Manager`] sits between callers and a [`StorageProvider`]: it validates
//! inputs, tracks chunked-upload sessions, generates thumbnails and runs the
//! post-upload callback. Backend state always changes before bookkeeping, so
//! a failed backend call leaves the session untouched and the operation
//! retryable.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::callback::{
    CallbackExecutor, CallbackMode, SyncCallbackExecutor, UploadCallback,
};
use crate::error::{Result, UploadError};
use crate::processor::{
    validate_thumbnail_sizes, ImageProcessor, LocalImageProcessor, ThumbnailSize,
};
use crate::provider::{
    FileMeta, ImageMeta, IncomingFile, Metadata, PresignedPost, PresignedUploadResult,
    StorageProvider,
};
use crate::session::{ChunkSession, ChunkSessionStore, NewChunkSession, MAX_PARTS};
use crate::validation::Validator;

/// Part size advertised to clients when the caller does not pick one.
pub const DEFAULT_CHUNK_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Presigned post validity when the caller does not supply a TTL.
pub const DEFAULT_PRESIGNED_POST_TTL: Duration = Duration::from_secs(15 * 60);

/// Hard cap on presigned post lifetimes.
pub const MAX_PRESIGNED_POST_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Validity of the read URL returned by presigned-upload confirmation.
pub const DEFAULT_PRESIGNED_URL_TTL: Duration = Duration::from_secs(10 * 60);

enum ValidationState {
    Unchecked,
    Valid,
    Invalid(String),
}

pub struct Manager {
    provider: Option<Arc<dyn StorageProvider>>,
    validator: Validator,
    sessions: Arc<ChunkSessionStore>,
    chunk_part_size: u64,
    processor: Arc<dyn ImageProcessor>,
    on_upload_complete: Option<UploadCallback>,
    callback_mode: CallbackMode,
    callback_executor: Arc<dyn CallbackExecutor>,
    // Also serializes concurrent first-use probes so the backend sees one.
    validation: Mutex<ValidationState>,
}

pub struct ManagerBuilder {
    provider: Option<Arc<dyn StorageProvider>>,
    validator: Validator,
    sessions: Option<Arc<ChunkSessionStore>>,
    chunk_part_size: u64,
    processor: Arc<dyn ImageProcessor>,
    on_upload_complete: Option<UploadCallback>,
    callback_mode: CallbackMode,
    callback_executor: Arc<dyn CallbackExecutor>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self {
            provider: None,
            validator: Validator::new(),
            sessions: None,
            chunk_part_size: DEFAULT_CHUNK_PART_SIZE,
            processor: Arc::new(LocalImageProcessor::new()),
            on_upload_complete: None,
            callback_mode: CallbackMode::default(),
            callback_executor: Arc::new(SyncCallbackExecutor),
        }
    }
}

impl ManagerBuilder {
    pub fn provider(mut self, provider: Arc<dyn StorageProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn session_store(mut self, store: Arc<ChunkSessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn chunk_part_size(mut self, size: u64) -> Self {
        if size > 0 {
            self.chunk_part_size = size;
        }
        self
    }

    pub fn image_processor(mut self, processor: Arc<dyn ImageProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn on_upload_complete(mut self, callback: UploadCallback) -> Self {
        self.on_upload_complete = Some(callback);
        self
    }

    pub fn callback_mode(mut self, mode: CallbackMode) -> Self {
        self.callback_mode = mode;
        self
    }

    pub fn callback_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.callback_executor = executor;
        self
    }

    pub fn build(self) -> Manager {
        Manager {
            provider: self.provider,
            validator: self.validator,
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(ChunkSessionStore::default())),
            chunk_part_size: self.chunk_part_size,
            processor: self.processor,
            on_upload_complete: self.on_upload_complete,
            callback_mode: self.callback_mode,
            callback_executor: self.callback_executor,
            validation: Mutex::new(ValidationState::Unchecked),
        }
    }
}

impl Manager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::default()
    }

    /// The session store, e.g. for spawning the expiry sweeper.
    pub fn sessions(&self) -> &Arc<ChunkSessionStore> {
        &self.sessions
    }

    /// Start a chunked upload: the backend prepares its side first, then the
    /// session is registered in the store.
    #[tracing::instrument(name = "manager.initiate_chunked", skip(self, metadata), fields(key = %key, total_size = total_size), err)]
    pub async fn initiate_chunked(
        &self,
        key: &str,
        total_size: u64,
        metadata: Metadata,
    ) -> Result<ChunkSession> {
        if key.is_empty() {
            return Err(UploadError::InvalidPath);
        }
        if total_size == 0 {
            return Err(UploadError::validation(
                "total_size",
                "must be greater than zero",
            ));
        }

        let provider = self.ensure_provider().await?;
        let chunked = provider.chunked().ok_or(UploadError::NotImplemented)?;

        let mut new = NewChunkSession::new(Uuid::new_v4().to_string(), key);
        new.total_size = total_size;
        new.part_size = self.chunk_part_size;
        new.metadata = metadata;

        chunked.initiate_chunked(&mut new).await?;
        self.sessions.create(new)
    }

    /// Upload one chunk. The backend write happens before the part is
    /// recorded, so a backend failure leaves the session retryable.
    #[tracing::instrument(name = "manager.upload_chunk", skip(self, payload), fields(session_id = %session_id, index = index, bytes = payload.len()), err)]
    pub async fn upload_chunk(&self, session_id: &str, index: u32, payload: Bytes) -> Result<()> {
        if index >= MAX_PARTS {
            return Err(UploadError::PartOutOfRange);
        }

        let provider = self.ensure_provider().await?;
        let chunked = provider.chunked().ok_or(UploadError::NotImplemented)?;
        let session = self.get_session(session_id)?;

        let mut part = chunked.upload_chunk(&session, index, payload).await?;
        part.index = index;
        self.sessions.add_part(session_id, part)?;
        Ok(())
    }

    /// Assemble the final object, close the session and fire the callback.
    #[tracing::instrument(name = "manager.complete_chunked", skip(self), fields(session_id = %session_id), err)]
    pub async fn complete_chunked(&self, session_id: &str) -> Result<FileMeta> {
        let provider = self.ensure_provider().await?;
        let chunked = provider.chunked().ok_or(UploadError::NotImplemented)?;
        let session = self.get_session(session_id)?;

        let meta = chunked.complete_chunked(&session).await?;
        self.sessions.mark_completed(session_id)?;
        self.sessions.delete(session_id);

        self.dispatch_callback(&meta).await?;
        Ok(meta)
    }

    /// Drop backend staging state and close the session. No callback fires.
    #[tracing::instrument(name = "manager.abort_chunked", skip(self), fields(session_id = %session_id), err)]
    pub async fn abort_chunked(&self, session_id: &str) -> Result<()> {
        let provider = self.ensure_provider().await?;
        let chunked = provider.chunked().ok_or(UploadError::NotImplemented)?;
        let session = self.get_session(session_id)?;

        chunked.abort_chunked(&session).await?;
        self.sessions.mark_aborted(session_id)?;
        self.sessions.delete(session_id);
        Ok(())
    }

    #[tracing::instrument(name = "manager.create_presigned_post", skip(self, metadata), fields(key = %key), err)]
    pub async fn create_presigned_post(
        &self,
        key: &str,
        mut metadata: Metadata,
    ) -> Result<PresignedPost> {
        validate_object_key(key)?;

        let provider = self.ensure_provider().await?;
        let presigner = provider.presigned_post().ok_or(UploadError::NotImplemented)?;

        let content_type = metadata
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .ok_or_else(|| UploadError::validation("content_type", "content type is required"))?;
        if !self.validator.is_allowed_mime_type(content_type) {
            return Err(UploadError::validation(
                "content_type",
                format!("content type not allowed: {content_type}"),
            ));
        }

        let ttl = metadata.ttl.unwrap_or(DEFAULT_PRESIGNED_POST_TTL);
        if ttl > MAX_PRESIGNED_POST_TTL {
            return Err(UploadError::validation(
                "ttl",
                "requested ttl exceeds maximum",
            ));
        }
        metadata.ttl = Some(ttl);

        presigner.create_presigned_post(key, &metadata).await
    }

    /// Acknowledge a client-reported direct upload: re-validate what the
    /// client claims, mint a read URL and fire the callback.
    #[tracing::instrument(name = "manager.confirm_presigned_upload", skip(self, result), fields(key = %result.key), err)]
    pub async fn confirm_presigned_upload(
        &self,
        result: &PresignedUploadResult,
    ) -> Result<FileMeta> {
        validate_object_key(&result.key)?;

        if !result.content_type.is_empty()
            && !self.validator.is_allowed_mime_type(&result.content_type)
        {
            return Err(UploadError::validation(
                "content_type",
                format!("content type not allowed: {}", result.content_type),
            ));
        }
        if result.size > self.validator.max_file_size() {
            return Err(UploadError::validation(
                "size",
                "file size exceeds maximum allowed",
            ));
        }

        let provider = self.ensure_provider().await?;
        let url = provider
            .presigned_url(&result.key, DEFAULT_PRESIGNED_URL_TTL)
            .await?;

        let meta = FileMeta {
            content: None,
            content_type: result.content_type.clone(),
            name: result.key.clone(),
            original_name: result.original_name.clone(),
            size: result.size,
            url,
        };

        self.dispatch_callback(&meta).await?;
        Ok(meta)
    }

    /// Validate, name and store a whole file in one call.
    #[tracing::instrument(name = "manager.handle_file", skip(self, file), fields(original_name = %file.name, bytes = file.content.len()), err)]
    pub async fn handle_file(&self, file: &IncomingFile, path: Option<&str>) -> Result<FileMeta> {
        self.validator.validate_file(file)?;
        self.validator.validate_file_content(&file.content)?;

        let name = self.validator.random_name(file, path)?;
        let options = Metadata::new().with_content_type(&file.content_type);
        let url = self.upload_file(&name, file.content.clone(), &options).await?;

        let meta = FileMeta {
            content: Some(file.content.clone()),
            content_type: file.content_type.clone(),
            name,
            original_name: file.name.clone(),
            size: file.content.len() as u64,
            url,
        };

        self.dispatch_callback(&meta).await?;
        Ok(meta)
    }

    /// Store an image plus one derivative per requested size. The callback
    /// fires once, for the base image.
    #[tracing::instrument(name = "manager.handle_image", skip(self, file, sizes), fields(original_name = %file.name, sizes = sizes.len()), err)]
    pub async fn handle_image_with_thumbnails(
        &self,
        file: &IncomingFile,
        path: Option<&str>,
        sizes: &[ThumbnailSize],
    ) -> Result<ImageMeta> {
        validate_thumbnail_sizes(sizes)?;

        let base = self.handle_file(file, path).await?;
        let source = base
            .content
            .as_ref()
            .ok_or_else(|| UploadError::backend_msg("thumbnail generation", "source bytes missing"))?
            .clone();

        let mut thumbnails = std::collections::HashMap::with_capacity(sizes.len());
        for size in sizes {
            let (bytes, content_type) =
                self.processor
                    .generate(&source, size, &base.content_type)?;

            let name = thumbnail_key(&base.name, &size.name);
            let options = Metadata::new().with_content_type(&content_type);
            let len = bytes.len() as u64;
            let url = self.upload_file(&name, Bytes::from(bytes), &options).await?;

            thumbnails.insert(
                size.name.clone(),
                FileMeta {
                    content: None,
                    content_type,
                    name,
                    original_name: format!("{}__{}", base.original_name, size.name),
                    size: len,
                    url,
                },
            );
        }

        Ok(ImageMeta {
            file: base,
            thumbnails,
        })
    }

    pub async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        options: &Metadata,
    ) -> Result<String> {
        let provider = self.ensure_provider().await?;
        provider.upload_file(path, content, options).await
    }

    pub async fn get_file(&self, path: &str) -> Result<Bytes> {
        let provider = self.ensure_provider().await?;
        provider.get_file(path).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let provider = self.ensure_provider().await?;
        provider.delete_file(path).await
    }

    pub async fn presigned_url(&self, path: &str, expires: Duration) -> Result<String> {
        let provider = self.ensure_provider().await?;
        provider.presigned_url(path, expires).await
    }

    /// Force a fresh provider probe, replacing any cached outcome.
    pub async fn validate_provider(&self) -> Result<()> {
        let provider = self
            .provider
            .clone()
            .ok_or(UploadError::ProviderNotConfigured)?;
        let mut state = self.validation.lock().await;
        match provider.validate().await {
            Ok(()) => {
                *state = ValidationState::Valid;
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                *state = ValidationState::Invalid(message.clone());
                Err(UploadError::ProviderValidation(message))
            }
        }
    }

    /// The configured provider, validated at most once. The probe outcome is
    /// cached either way; a failure sticks until [`Manager::validate_provider`]
    /// clears it.
    async fn ensure_provider(&self) -> Result<Arc<dyn StorageProvider>> {
        let provider = self
            .provider
            .clone()
            .ok_or(UploadError::ProviderNotConfigured)?;

        let mut state = self.validation.lock().await;
        match &*state {
            ValidationState::Valid => Ok(provider),
            ValidationState::Invalid(message) => {
                Err(UploadError::ProviderValidation(message.clone()))
            }
            ValidationState::Unchecked => match provider.validate().await {
                Ok(()) => {
                    *state = ValidationState::Valid;
                    Ok(provider)
                }
                Err(err) => {
                    let message = err.to_string();
                    *state = ValidationState::Invalid(message.clone());
                    Err(UploadError::ProviderValidation(message))
                }
            },
        }
    }

    fn get_session(&self, id: &str) -> Result<ChunkSession> {
        if id.is_empty() {
            return Err(UploadError::SessionNotFound);
        }
        self.sessions.get(id).ok_or(UploadError::SessionNotFound)
    }

    /// Run the upload callback per the configured mode. A strict failure
    /// deletes the just-stored object before surfacing the error; best-effort
    /// failures are logged only. With the async executor the callback result
    /// is never observed here, so strict mode cannot propagate it.
    async fn dispatch_callback(&self, meta: &FileMeta) -> Result<()> {
        let Some(callback) = &self.on_upload_complete else {
            return Ok(());
        };

        let outcome = self
            .callback_executor
            .execute(Arc::clone(callback), meta.clone())
            .await;
        let Err(err) = outcome else {
            return Ok(());
        };

        match self.callback_mode {
            CallbackMode::Strict => {
                if let Some(provider) = &self.provider {
                    if let Err(delete_err) = provider.delete_file(&meta.name).await {
                        tracing::warn!(
                            file = %meta.name,
                            error = %delete_err,
                            "failed to remove object after strict callback failure"
                        );
                    }
                }
                Err(UploadError::CallbackFailed(err.to_string()))
            }
            CallbackMode::BestEffort => {
                tracing::warn!(file = %meta.name, error = %err, "upload callback failed");
                Ok(())
            }
        }
    }
}

fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') {
        return Err(UploadError::InvalidPath);
    }
    Ok(())
}

/// `photos/cat.png` + `small` becomes `photos/cat__small.png`.
fn thumbnail_key(name: &str, variant: &str) -> String {
    let ext = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let base = name.strip_suffix(ext.as_str()).unwrap_or(name);
    let base = if base.is_empty() { name } else { base };
    format!("{base}__{variant}{ext}")
}
