//! Post-upload callback dispatch.
//!
//! A callback runs after every successful upload (whole-file, completed
//! chunked session, or confirmed presigned upload). Two knobs control what a
//! callback failure means:
//!
//! * [`CallbackMode`] decides whether a failure fails the upload. In strict
//!   mode the manager compensates by deleting the stored object and returns
//!   the failure; in best-effort mode the failure is logged and the upload
//!   still succeeds.
//! * [`CallbackExecutor`] decides where the callback runs. The synchronous
//!   executor runs it inline and reports its result; the asynchronous
//!   executor spawns it onto the runtime and always reports success, so
//!   strict mode has nothing to propagate when paired with it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::FileMeta;

/// How a callback failure affects the upload result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallbackMode {
    /// Callback failure fails the upload and the stored object is removed.
    Strict,
    /// Callback failure is logged and otherwise ignored.
    #[default]
    BestEffort,
}

pub type CallbackFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Hook invoked with the metadata of a finished upload.
pub type UploadCallback = Arc<dyn Fn(FileMeta) -> CallbackFuture + Send + Sync>;

/// Build an [`UploadCallback`] from an async closure.
pub fn callback_fn<F, Fut>(f: F) -> UploadCallback
where
    F: Fn(FileMeta) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |meta| Box::pin(f(meta)))
}

/// Strategy for running the upload callback.
#[async_trait]
pub trait CallbackExecutor: Send + Sync {
    async fn execute(&self, callback: UploadCallback, meta: FileMeta) -> anyhow::Result<()>;
}

/// Runs the callback inline; the caller observes its result.
#[derive(Debug, Default)]
pub struct SyncCallbackExecutor;

#[async_trait]
impl CallbackExecutor for SyncCallbackExecutor {
    async fn execute(&self, callback: UploadCallback, meta: FileMeta) -> anyhow::Result<()> {
        callback(meta).await
    }
}

/// Spawns the callback onto the runtime and returns immediately. Failures
/// are logged, never surfaced to the caller.
#[derive(Debug, Default)]
pub struct AsyncCallbackExecutor;

#[async_trait]
impl CallbackExecutor for AsyncCallbackExecutor {
    async fn execute(&self, callback: UploadCallback, meta: FileMeta) -> anyhow::Result<()> {
        let name = meta.name.clone();
        tokio::spawn(async move {
            if let Err(err) = callback(meta).await {
                tracing::error!(file = %name, error = %err, "upload callback failed");
            }
        });
        Ok(())
    }
}
