//! Tsumiki
//!
//! A storage-agnostic file upload library: one [`Manager`] in front of
//! pluggable backends, with resumable chunked uploads, direct-to-storage
//! presigned POSTs, image derivatives and post-upload callbacks.
//!
//! # Features
//!
//! - **Pluggable backends**: filesystem, S3, in-memory, or a composite that
//!   mirrors an object store to local disk
//! - **Chunked uploads**: resumable sessions with TTL-based expiry
//! - **Presigned POSTs**: clients upload straight to the backend
//! - **Thumbnails**: configurable derivative sizes generated on upload
//! - **Callbacks**: strict or best-effort post-upload hooks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tsumiki::{Manager, provider::FsProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = Manager::builder()
//!         .provider(Arc::new(FsProvider::new("/var/lib/uploads")))
//!         .build();
//!     let content = manager.get_file("photos/cat.png").await?;
//!     println!("{} bytes", content.len());
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod config;
pub mod error;
pub mod manager;
pub mod processor;
pub mod provider;
pub mod session;
pub mod validation;

// Re-export commonly used types
pub use callback::{CallbackExecutor, CallbackMode, UploadCallback};
pub use config::Config;
pub use error::{Result, UploadError};
pub use manager::{Manager, ManagerBuilder};
pub use processor::{ImageProcessor, ThumbnailFit, ThumbnailSize};
pub use provider::{FileMeta, ImageMeta, IncomingFile, Metadata, PresignedPost, StorageProvider};
pub use session::{ChunkPart, ChunkSession, ChunkSessionState, ChunkSessionStore};
pub use validation::Validator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
