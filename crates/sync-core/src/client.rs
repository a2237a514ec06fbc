//! `Client`: the surface a host binary talks to (spec §6 Exposed — Client
//! API). Grounded in the teacher's top-level `Vault<F>` — the single object
//! `sync-daemon/src/main.rs` constructs and calls into for the whole of its
//! `tokio::select!` loop.

use crate::fs::FileSystem;
use crate::history::{History, HistoryEntry, Subscription};
use crate::merge::Merge;
use crate::metadata::MetadataStore;
use crate::persistence::{Persistence, Settings};
use crate::path::RelativePath;
use crate::scheduler::Scheduler;
use crate::transport::{Transport, VaultUpdateNotification};
use std::sync::Arc;
use tokio::sync::watch;

/// One field of [`Settings`], named rather than inferred from a dynamically
/// typed `(key, value)` pair (the same "branch on the tag" discipline
/// `DocumentUpdate` uses for the transport's responses).
#[derive(Debug, Clone, PartialEq)]
pub enum SettingUpdate {
    RemoteUri(String),
    Token(String),
    VaultName(String),
    /// Clamped to 1..16 by `Client::set_setting`.
    SyncConcurrency(usize),
    IsSyncEnabled(bool),
    /// Clamped to 1..64 by `Client::set_setting`.
    MaxFileSizeMb(u64),
    IgnorePatterns(Vec<String>),
    PollIntervalSeconds(u64),
}

/// The vault-sync engine's public API. Owns every collaborator reached by
/// `sync-daemon`'s main loop; none of its fields are exposed directly.
pub struct Client<F: FileSystem, M: Merge, T: Transport, P: Persistence> {
    scheduler: Arc<Scheduler<F, M, T, P>>,
    metadata: Arc<MetadataStore<P>>,
    history: Arc<History>,
}

impl<F: FileSystem + 'static, M: Merge + 'static, T: Transport + 'static, P: Persistence + 'static>
    Client<F, M, T, P>
{
    pub fn new(
        scheduler: Arc<Scheduler<F, M, T, P>>,
        metadata: Arc<MetadataStore<P>>,
        history: Arc<History>,
    ) -> Self {
        Self {
            scheduler,
            metadata,
            history,
        }
    }

    pub async fn local_created(&self, path: RelativePath) {
        self.scheduler.sync_local_create(path).await;
    }

    pub async fn local_deleted(&self, path: RelativePath) {
        self.scheduler.sync_local_delete(path).await;
    }

    pub async fn local_updated(&self, old_path: Option<RelativePath>, path: RelativePath) {
        self.scheduler.sync_local_update(old_path, path).await;
    }

    pub async fn remote_update_received(&self, notification: VaultUpdateNotification) {
        self.scheduler.sync_remote_update(notification).await;
    }

    pub async fn schedule_offline_reconciliation(&self) {
        self.scheduler.schedule_offline_reconciliation().await;
    }

    pub async fn reset(&self) {
        self.scheduler.reset().await;
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    /// Subscription for the remaining-operations count (spec §6).
    pub fn subscribe_remaining(&self) -> watch::Receiver<usize> {
        self.scheduler.subscribe_remaining()
    }

    /// Subscription for appended history entries (spec §6).
    pub fn subscribe_history(
        &self,
        callback: impl Fn(&HistoryEntry) + Send + Sync + 'static,
    ) -> Subscription {
        self.history.subscribe(callback)
    }

    pub fn get_history(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub async fn get_settings(&self) -> Settings {
        self.metadata.settings().await
    }

    /// Read-modify-write a single field through `MetadataStore::set_settings`,
    /// so the mutation is atomic from the caller's perspective even though
    /// `Settings` is stored and persisted wholesale.
    pub async fn set_setting(&self, update: SettingUpdate) {
        let mut settings = self.metadata.settings().await;
        match update {
            SettingUpdate::RemoteUri(v) => settings.remote_uri = v,
            SettingUpdate::Token(v) => settings.token = v,
            SettingUpdate::VaultName(v) => settings.vault_name = v,
            SettingUpdate::SyncConcurrency(v) => settings.sync_concurrency = v.clamp(1, 16),
            SettingUpdate::IsSyncEnabled(v) => settings.is_sync_enabled = v,
            SettingUpdate::MaxFileSizeMb(v) => settings.max_file_size_mb = v.clamp(1, 64),
            SettingUpdate::IgnorePatterns(v) => settings.ignore_patterns = v,
            SettingUpdate::PollIntervalSeconds(v) => settings.poll_interval_seconds = v,
        }
        self.metadata.set_settings(settings).await;
    }

    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }
}
