//! Session expiry observed through the public surface, with real time and
//! short TTLs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use tsumiki::provider::{MemoryProvider, Metadata, StorageProvider};
use tsumiki::session::ChunkSessionStore;
use tsumiki::{Manager, UploadError};

#[tokio::test]
async fn test_expired_session_is_gone_from_the_manager() {
    let store = Arc::new(ChunkSessionStore::new(Duration::from_millis(50)));
    let manager = Manager::builder()
        .provider(Arc::new(MemoryProvider::new()) as Arc<dyn StorageProvider>)
        .session_store(Arc::clone(&store))
        .build();

    let session = manager
        .initiate_chunked("slow.bin", 8, Metadata::new())
        .await
        .unwrap();
    manager
        .upload_chunk(&session.id, 0, Bytes::from_static(b"abcd"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(matches!(
        manager
            .upload_chunk(&session.id, 1, Bytes::from_static(b"efgh"))
            .await,
        Err(UploadError::SessionNotFound)
    ));
    assert!(matches!(
        manager.complete_chunked(&session.id).await,
        Err(UploadError::SessionNotFound)
    ));
}

#[tokio::test]
async fn test_sweeper_evicts_expired_sessions() {
    let store = Arc::new(ChunkSessionStore::new(Duration::from_millis(50)));
    let manager = Manager::builder()
        .provider(Arc::new(MemoryProvider::new()) as Arc<dyn StorageProvider>)
        .session_store(Arc::clone(&store))
        .build();

    manager
        .initiate_chunked("a.bin", 8, Metadata::new())
        .await
        .unwrap();
    manager
        .initiate_chunked("b.bin", 8, Metadata::new())
        .await
        .unwrap();
    assert_eq!(store.len(), 2);

    let handle = store.spawn_sweeper(Duration::from_millis(30));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.is_empty());
    handle.abort();
}

#[tokio::test]
async fn test_fresh_sessions_survive_the_sweeper() {
    let store = Arc::new(ChunkSessionStore::new(Duration::from_secs(3600)));
    let manager = Manager::builder()
        .provider(Arc::new(MemoryProvider::new()) as Arc<dyn StorageProvider>)
        .session_store(Arc::clone(&store))
        .build();

    let session = manager
        .initiate_chunked("keep.bin", 8, Metadata::new())
        .await
        .unwrap();

    let handle = store.spawn_sweeper(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();

    assert_eq!(store.len(), 1);
    manager
        .upload_chunk(&session.id, 0, Bytes::from_static(b"data"))
        .await
        .unwrap();
}
