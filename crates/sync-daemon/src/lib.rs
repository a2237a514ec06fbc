//! sync-daemon library: exposes internal modules for testing.
//!
//! Thin library layer over the daemon components, letting integration tests
//! reach internal types directly.

pub mod file_persistence;
pub mod http_transport;
pub mod native_fs;
pub mod watcher;

pub use file_persistence::FileSnapshotStore;
pub use http_transport::HttpTransport;
pub use native_fs::NativeFs;
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
