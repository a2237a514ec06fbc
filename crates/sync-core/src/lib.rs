//! sync-core: the transport-agnostic vault sync engine.
//!
//! Indexes a vault's documents by metadata (not content), schedules the
//! bounded-concurrency work needed to keep a local vault and a remote store
//! converged, and exposes a small `Client` surface for a host binary to
//! drive from filesystem events, remote notifications, and a boot-time
//! reconciliation pass.

pub mod client;
pub mod covered_min;
pub mod file_ops;
pub mod fs;
pub mod hash;
pub mod history;
pub mod ids;
pub mod keyed_locks;
pub mod merge;
pub mod metadata;
pub mod path;
pub mod persistence;
pub mod remote_loop;
pub mod reset;
pub mod scheduler;
pub mod syncer;
pub mod transport;

pub use client::{Client, SettingUpdate};
pub use file_ops::FileOps;
pub use fs::{FileSystem, FsError, SafeFsFacade};
pub use hash::ContentHash;
pub use history::{History, HistoryEntry, HistoryKind, HistoryStatus, Subscription};
pub use ids::{DocumentId, VaultUpdateId};
pub use merge::{Merge, TextMerge, Tokenizer};
pub use metadata::{DocumentMetadata, DocumentRecord, MetadataError, MetadataStore, PendingHandle};
pub use path::RelativePath;
pub use persistence::{Persistence, PersistenceError, Settings, Snapshot};
pub use remote_loop::RemoteLoop;
pub use reset::{ResetCoordinator, ResetToken};
pub use scheduler::Scheduler;
pub use syncer::{CoreSyncer, SyncError};
pub use transport::{
    DocumentListing, DocumentUpdate, DocumentVersion, DocumentVersionNoContent, GetAllResponse,
    PingResponse, Transport, TransportError, VaultUpdateNotification,
};
