//! Integration tests for the daemon's native adapters: the filesystem
//! implementation, the glob-filtered file watcher, and the snapshot store,
//! exercised against real temp directories rather than in-memory fakes.

use std::time::Duration;

use sync_core::fs::FileSystem as _;
use sync_core::persistence::{Persistence, Settings, Snapshot};
use sync_daemon::{FileEventKind, FileSnapshotStore, FileWatcher, NativeFs};
use tempfile::TempDir;
use tokio::time::timeout;

#[tokio::test]
async fn native_fs_round_trips_nested_writes() {
    let temp = TempDir::new().expect("tempdir");
    let fs = NativeFs::new(temp.path().to_path_buf());

    let path = sync_core::RelativePath::new("knowledge/topic.md");
    fs.write(&path, b"# Topic").await.expect("write");

    assert!(fs.exists(&path).await.expect("exists"));
    assert_eq!(fs.read(&path).await.expect("read"), b"# Topic");
    assert!(fs.list_all().await.expect("list_all").contains(&path));

    fs.delete(&path).await.expect("delete");
    assert!(!fs.exists(&path).await.expect("exists"));
}

#[tokio::test]
async fn native_fs_rename_moves_content() {
    let temp = TempDir::new().expect("tempdir");
    let fs = NativeFs::new(temp.path().to_path_buf());

    let old = sync_core::RelativePath::new("a.md");
    let new = sync_core::RelativePath::new("sub/b.md");
    fs.write(&old, b"hello").await.expect("write");

    fs.rename(&old, &new).await.expect("rename");

    assert!(!fs.exists(&old).await.expect("exists"));
    assert_eq!(fs.read(&new).await.expect("read"), b"hello");
}

#[tokio::test]
async fn native_fs_list_all_skips_sync_directory() {
    let temp = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(temp.path().join(".sync")).expect("mkdir");
    std::fs::write(temp.path().join(".sync/snapshot.json"), "{}").expect("write");
    std::fs::write(temp.path().join("note.md"), "hi").expect("write");

    let fs = NativeFs::new(temp.path().to_path_buf());
    let files = fs.list_all().await.expect("list_all");

    assert_eq!(files, vec![sync_core::RelativePath::new("note.md")]);
}

#[tokio::test]
async fn watcher_detects_create_then_modify() {
    let temp = TempDir::new().expect("tempdir");
    let mut watcher =
        FileWatcher::new(temp.path().to_path_buf(), &[]).expect("watcher should start");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let test_file = temp.path().join("test.md");
    std::fs::write(&test_file, "# Hello").expect("write");

    let created = timeout(Duration::from_secs(10), watcher.event_rx().recv())
        .await
        .expect("timed out waiting for create")
        .expect("channel closed");
    assert_eq!(created.kind, FileEventKind::Created);
    assert_eq!(created.path, sync_core::RelativePath::new("test.md"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&test_file, "# Hello World").expect("modify");

    let modified = timeout(Duration::from_secs(10), watcher.event_rx().recv())
        .await
        .expect("timed out waiting for modify")
        .expect("channel closed");
    assert_eq!(modified.kind, FileEventKind::Modified);
}

#[tokio::test]
async fn watcher_ignores_sync_directory_and_configured_globs() {
    let temp = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(temp.path().join(".sync")).expect("mkdir");

    let ignore_patterns = vec!["*.tmp".to_string()];
    let mut watcher = FileWatcher::new(temp.path().to_path_buf(), &ignore_patterns)
        .expect("watcher should start");

    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(temp.path().join(".sync/state.json"), "{}").expect("write sync file");
    std::fs::write(temp.path().join("scratch.tmp"), "draft").expect("write ignored file");

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(temp.path().join("note.md"), "# Hello").expect("write tracked file");

    let event = timeout(Duration::from_secs(10), watcher.event_rx().recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed");

    assert_eq!(event.path, sync_core::RelativePath::new("note.md"));
}

#[tokio::test]
async fn snapshot_store_persists_settings_across_instances() {
    let temp = TempDir::new().expect("tempdir");

    {
        let store = FileSnapshotStore::new(temp.path());
        let mut settings = Settings::default();
        settings.remote_uri = "https://sync.example.com".to_string();
        settings.sync_concurrency = 8;
        store
            .save(&Snapshot {
                documents: Vec::new(),
                last_seen_update_id: 42,
                has_initial_sync_completed: true,
                settings: Some(settings),
            })
            .await
            .expect("save");
    }

    let store = FileSnapshotStore::new(temp.path());
    let loaded = store.load().await.expect("load").expect("present");
    assert_eq!(loaded.last_seen_update_id, 42);
    assert_eq!(loaded.settings.unwrap().remote_uri, "https://sync.example.com");
}
