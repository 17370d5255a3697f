use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;

use sweeper::engine::{DeletionEngine, EngineConfig};
use sweeper::error::DeleteError;
use sweeper::namespace::{Container, ContainerId};
use sweeper::ObjectStoreNamespace;

async fn put(store: &Arc<dyn ObjectStore>, key: &str) {
    store
        .put(&Path::from(key), Bytes::from_static(b"payload").into())
        .await
        .unwrap();
}

async fn seed(store: &Arc<dyn ObjectStore>) {
    for key in [
        "a/.folder",
        "a/b/.folder",
        "a/b/file1",
        "a/b/file2",
        "a/b/c/.folder",
        "a/b/c/deep",
        "a/bc/.folder",
        "a/bc/keep",
    ] {
        put(store, key).await;
    }
}

async fn remaining(store: &Arc<dyn ObjectStore>) -> Vec<String> {
    let mut keys: Vec<String> = store
        .list(None)
        .map_ok(|meta| meta.location.to_string())
        .try_collect()
        .await
        .unwrap();
    keys.sort();
    keys
}

fn folder(path: &str, force: bool) -> Container {
    Container::from_id(ContainerId::new("bucket", path).unwrap()).with_force_destroy(force)
}

async fn force_delete_subtree(store: Arc<dyn ObjectStore>) {
    seed(&store).await;
    let namespace = Arc::new(ObjectStoreNamespace::new("bucket", store.clone()));
    let engine = DeletionEngine::new(namespace, EngineConfig::default());

    let report = engine.delete_container(&folder("a/b/", true)).await.unwrap();

    assert_eq!(report.objects_deleted, 3);
    assert_eq!(
        report.folders_deleted,
        vec!["a/b/c/".to_string(), "a/b/".to_string()]
    );
    assert_eq!(
        remaining(&store).await,
        vec![
            "a/.folder".to_string(),
            "a/bc/.folder".to_string(),
            "a/bc/keep".to_string()
        ]
    );
}

#[tokio::test]
async fn test_force_delete_in_memory() {
    let _ = env_logger::builder().is_test(true).try_init();
    force_delete_subtree(Arc::new(InMemory::new())).await;
}

#[tokio::test]
async fn test_force_delete_on_local_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalFileSystem::new_with_prefix(dir.path()).unwrap();
    force_delete_subtree(Arc::new(store)).await;
}

#[tokio::test]
async fn test_refused_without_force_leaves_everything() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    seed(&store).await;
    let before = remaining(&store).await;

    let namespace = Arc::new(ObjectStoreNamespace::new("bucket", store.clone()));
    let engine = DeletionEngine::new(namespace, EngineConfig::default());
    let err = engine
        .delete_container(&folder("a/b/", false))
        .await
        .unwrap_err();

    assert!(matches!(err, DeleteError::Conflict { .. }));
    assert_eq!(remaining(&store).await, before);
}

#[tokio::test]
async fn test_plan_and_refresh_through_dsn_store() -> anyhow::Result<()> {
    let store = common::storage::create_object_store_from_dsn("memory://")?;
    seed(&store).await;

    let namespace = Arc::new(ObjectStoreNamespace::new("bucket", store.clone()));
    let engine = DeletionEngine::new(namespace, EngineConfig::default());

    let plan = engine.plan(&folder("a/b/", false)).await?;
    assert!(plan.requires_force);
    assert_eq!(plan.objects.len(), 3);
    assert_eq!(plan.folders, vec!["a/b/c/".to_string(), "a/b/".to_string()]);

    let container = engine.refresh(&ContainerId::new("bucket", "a/bc/")?).await?;
    assert_eq!(container.id.path, "a/bc/");

    Ok(())
}

#[tokio::test]
async fn test_force_delete_with_reserved_characters_converges() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    for key in ["f/.folder", "f/report#1.csv", "f/100%.txt", "f/[raw]/.folder", "f/[raw]/{a}|b"] {
        put(&store, key).await;
    }

    let namespace = Arc::new(ObjectStoreNamespace::new("bucket", store.clone()));
    let engine = DeletionEngine::new(
        namespace,
        EngineConfig {
            max_list_iterations: 5,
            ..EngineConfig::default()
        },
    );

    let report = engine.delete_container(&folder("f/", true)).await.unwrap();

    assert_eq!(report.objects_deleted, 3);
    assert_eq!(report.objects_already_gone, 0);
    assert_eq!(report.list_iterations, 2);
    assert_eq!(
        report.folders_deleted,
        vec!["f/[raw]/".to_string(), "f/".to_string()]
    );
    assert!(remaining(&store).await.is_empty());
}

#[tokio::test]
async fn test_reserved_characters_in_folder_name_keep_conflict_guard() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    put(&store, "r#1/.folder").await;
    put(&store, "r#1/data").await;
    let before = remaining(&store).await;

    let namespace = Arc::new(ObjectStoreNamespace::new("bucket", store.clone()));
    let engine = DeletionEngine::new(namespace, EngineConfig::default());

    let err = engine
        .delete_container(&folder("r#1/", false))
        .await
        .unwrap_err();

    assert!(matches!(err, DeleteError::Conflict { .. }));
    assert_eq!(remaining(&store).await, before);
    assert_eq!(before.len(), 2);
}
