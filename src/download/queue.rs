// Flixor - Offline Media for Plex Libraries
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Download queue management
//!
//! The queue manager orders pending work, enforces the concurrency ceiling,
//! and drains items into the executor. The persisted queue is written before
//! every dequeue and after every enqueue/resume/retry, so an abrupt process
//! exit loses at most the in-memory active-slot state: an interrupted item
//! simply restores as `queued`.
//!
//! Mutual exclusion over records is structural — a key is drained at most
//! once, so only one executor ever owns a given key; the manager and the
//! executor never race on the same record.
//!
//! Pause/cancel abort the in-flight transfer through its cancellation token;
//! the worker task releases its slot exactly once on the way out and
//! immediately triggers another drain pass.

use crate::download::executor::Executor;
use crate::download::transfer::Transfer;
use crate::download::types::{
    DownloadProgress, DownloadQueueItem, DownloadRequest, DownloadStatus, DownloadedMedia,
    GlobalKey, MediaKind,
};
use crate::error::{OfflineError, Result};
use crate::file::FileStore;
use crate::source::MediaSource;
use crate::state::LibraryStore;
use crate::storage::RecordStore;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Queue manager configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Concurrency ceiling; changes take effect on the next drain pass
    pub max_concurrent: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { max_concurrent: 1 }
    }
}

/// Handle to an in-flight transfer occupying a slot
struct ActiveTransfer {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// The download queue manager.
///
/// One instance per process, constructed with explicit dependencies and
/// shared as `Arc<DownloadManager>`; worker tasks hold a clone (through the
/// cyclic back-reference) so they can release their slot and re-drain when
/// they finish.
pub struct DownloadManager {
    records: Arc<RecordStore>,
    files: Arc<FileStore>,
    store: Arc<LibraryStore>,
    executor: Executor,
    source: RwLock<Option<Arc<dyn MediaSource>>>,
    config: RwLock<DownloadConfig>,
    queue: Mutex<Vec<DownloadQueueItem>>,
    active: Mutex<HashMap<GlobalKey, ActiveTransfer>>,
    draining: AtomicBool,
    this: Weak<DownloadManager>,
}

impl DownloadManager {
    pub fn new(
        records: Arc<RecordStore>,
        files: Arc<FileStore>,
        store: Arc<LibraryStore>,
        transfer: Arc<dyn Transfer>,
        config: DownloadConfig,
    ) -> Arc<Self> {
        let executor = Executor::new(
            Arc::clone(&records),
            Arc::clone(&files),
            Arc::clone(&store),
            transfer,
        );

        Arc::new_cyclic(|this| Self {
            records,
            files,
            store,
            executor,
            source: RwLock::new(None),
            config: RwLock::new(config),
            queue: Mutex::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Attach or detach the media source connection
    pub async fn set_source(&self, source: Option<Arc<dyn MediaSource>>) {
        *self.source.write().await = source;
    }

    /// Update the concurrency ceiling; in-flight transfers are unaffected
    pub async fn set_max_concurrent(&self, max_concurrent: usize) -> Result<()> {
        if max_concurrent == 0 {
            return Err(OfflineError::InvalidConfiguration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        self.config.write().await.max_concurrent = max_concurrent;
        Ok(())
    }

    /// Number of transfers currently occupying slots
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Keys currently waiting in the queue, in drain order
    pub async fn queued_keys(&self) -> Vec<GlobalKey> {
        let mut queue = self.queue.lock().await.clone();
        queue.sort_by_key(|item| (item.priority, item.enqueued_at));
        queue.into_iter().map(|item| item.key).collect()
    }

    // ===== Enqueue =====

    /// Enqueue a download request.
    ///
    /// Returns `Ok(false)` without touching any state when the key is
    /// already queued, actively downloading, or completed. Fails fast when
    /// no media source is attached or free space is insufficient for the
    /// request's estimated size; in both cases nothing is persisted.
    pub async fn enqueue(&self, request: DownloadRequest) -> Result<bool> {
        if self.source.read().await.is_none() {
            return Err(OfflineError::NoActiveSource);
        }

        let key = request.global_key();

        if let Some(existing) = self.records.media(&key).await? {
            match existing.status {
                DownloadStatus::Queued
                | DownloadStatus::Downloading
                | DownloadStatus::Completed => {
                    debug!(key = %key, status = %existing.status, "Enqueue ignored, already present");
                    return Ok(false);
                }
                // Paused/failed/cancelled records are replaced by a fresh enqueue
                _ => {}
            }
        }

        if let Some(need) = request.estimated_bytes {
            let have = self.files.available_space()?;
            if need > have {
                return Err(OfflineError::InsufficientSpace { need, have });
            }
        }

        let now = Utc::now();
        let item = DownloadQueueItem {
            key: key.clone(),
            kind: request.kind,
            priority: now.timestamp_millis(),
            enqueued_at: now,
            parent_id: request.parent_id.clone(),
            grandparent_id: request.grandparent_id.clone(),
        };

        {
            let mut queue = self.queue.lock().await;
            if queue.iter().any(|queued| queued.key == key) {
                return Ok(false);
            }
            queue.push(item);
            self.records.save_queue(&queue).await?;
        }

        let media = DownloadedMedia::queued(key.clone(), request.kind, now);
        let metadata = request.to_metadata();
        let progress = DownloadProgress::from_media(&media);

        self.records.save_media(&media).await?;
        self.records.save_metadata(&metadata).await?;
        self.records.save_progress(&progress).await?;
        self.records.add_download_key(&key).await?;

        self.store.apply_metadata(metadata);
        self.store.apply_media(media);
        self.store.update_progress(progress);

        info!(key = %key, "Enqueued download");
        self.drain().await;
        Ok(true)
    }

    // ===== Drain =====

    /// Drain queued items into free slots.
    ///
    /// Idempotent and reentrant-safe: overlapping calls collapse into one
    /// pass via the in-progress flag. After a pass finishes, the flag is
    /// cleared and the check re-run once so a slot freed mid-pass is not
    /// stranded until the next event.
    pub async fn drain(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            while let Some((item, source)) = self.next_ready_item().await {
                self.spawn_item(item, source).await;
            }
            self.draining.store(false, Ordering::SeqCst);

            if !self.has_pending_work().await {
                break;
            }
            if self.draining.swap(true, Ordering::SeqCst) {
                // Another caller picked the work up
                break;
            }
        }
    }

    /// Pop the head of the queue if a slot and a source are available,
    /// persisting the shortened queue before handing the item out.
    async fn next_ready_item(&self) -> Option<(DownloadQueueItem, Arc<dyn MediaSource>)> {
        let ceiling = self.config.read().await.max_concurrent;
        if self.active.lock().await.len() >= ceiling {
            return None;
        }
        let source = self.source.read().await.clone()?;

        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            return None;
        }
        // Lowest priority first; enqueue order breaks ties
        queue.sort_by_key(|item| (item.priority, item.enqueued_at));
        let item = queue.remove(0);
        if let Err(e) = self.records.save_queue(&queue).await {
            error!(key = %item.key, error = %e, "Failed to persist queue, not dequeuing");
            queue.insert(0, item);
            return None;
        }

        Some((item, source))
    }

    async fn has_pending_work(&self) -> bool {
        if self.source.read().await.is_none() {
            return false;
        }
        let ceiling = self.config.read().await.max_concurrent;
        if self.active.lock().await.len() >= ceiling {
            return false;
        }
        !self.queue.lock().await.is_empty()
    }

    // Returns a boxed, type-erased `Send` future rather than an `async fn` to
    // break the `drain` → `spawn_item` → worker-task → `drain` recursion cycle:
    // with a concrete `Send`-asserting return type here, the auto-trait solver
    // no longer has to prove `Send` for a self-referential future chain. The
    // body and its await order are unchanged.
    fn spawn_item<'a>(
        &'a self,
        item: DownloadQueueItem,
        source: Arc<dyn MediaSource>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let Some(manager) = self.this.upgrade() else {
            return;
        };
        let key = item.key.clone();
        let cancel = CancellationToken::new();

        // Occupy the slot before the worker starts so the ceiling holds
        self.active.lock().await.insert(
            key.clone(),
            ActiveTransfer {
                cancel: cancel.clone(),
                handle: None,
            },
        );
        let handle = tokio::spawn(async move {
            let outcome = manager.executor.run(&item, source, cancel).await;
            debug!(key = %item.key, ?outcome, "Download worker finished");

            // Release the slot exactly once, whatever the outcome
            manager.active.lock().await.remove(&item.key);
            manager.drain().await;
        });

        if let Some(entry) = self.active.lock().await.get_mut(&key) {
            entry.handle = Some(handle);
        }
        })
    }

    // ===== User operations =====

    /// Pause a queued or downloading item.
    ///
    /// Aborts the in-flight transfer (observed by the executor as an abort,
    /// not an error), drops any queue entry, and flips the record to
    /// `paused`.
    pub async fn pause(&self, key: &GlobalKey) -> Result<()> {
        if let Some(entry) = self.active.lock().await.get(key) {
            entry.cancel.cancel();
        }
        self.remove_queue_entry(key).await?;

        let mut media = self.require_media(key).await?;
        match media.status {
            DownloadStatus::Queued | DownloadStatus::Downloading => {
                media.status = DownloadStatus::Paused;
                self.persist_and_publish(&media).await?;
                info!(key = %key, "Paused download");
                Ok(())
            }
            status => Err(OfflineError::invalid_state(format!(
                "Cannot pause download in status {status}"
            ))),
        }
    }

    /// Resume a paused item at the head of the queue with a fresh priority
    pub async fn resume(&self, key: &GlobalKey) -> Result<()> {
        let mut media = self.require_media(key).await?;
        if media.status != DownloadStatus::Paused {
            return Err(OfflineError::invalid_state(format!(
                "Cannot resume download in status {}",
                media.status
            )));
        }

        let grandparent_id = self
            .records
            .metadata(key)
            .await?
            .and_then(|m| m.grandparent_key)
            .map(|k| k.content_id);
        self.insert_at_head(key.clone(), media.kind, grandparent_id)
            .await?;

        media.status = DownloadStatus::Queued;
        self.persist_and_publish(&media).await?;

        info!(key = %key, "Resumed download");
        self.drain().await;
        Ok(())
    }

    /// Cancel a queued, downloading, or paused item. Cancelled is terminal;
    /// the record stays around until explicit removal.
    pub async fn cancel(&self, key: &GlobalKey) -> Result<()> {
        if let Some(entry) = self.active.lock().await.get(key) {
            entry.cancel.cancel();
        }
        self.remove_queue_entry(key).await?;

        let mut media = self.require_media(key).await?;
        match media.status {
            DownloadStatus::Queued | DownloadStatus::Downloading | DownloadStatus::Paused => {
                media.status = DownloadStatus::Cancelled;
                self.persist_and_publish(&media).await?;
                info!(key = %key, "Cancelled download");
                Ok(())
            }
            status => Err(OfflineError::invalid_state(format!(
                "Cannot cancel download in status {status}"
            ))),
        }
    }

    /// Retry a failed item: counters reset, retry count incremented, and the
    /// item goes back in ahead of everything currently queued.
    pub async fn retry(&self, key: &GlobalKey) -> Result<()> {
        let mut media = self.require_media(key).await?;
        if media.status != DownloadStatus::Failed {
            return Err(OfflineError::invalid_state(format!(
                "Can only retry failed downloads, not {}",
                media.status
            )));
        }

        let grandparent_id = self
            .records
            .metadata(key)
            .await?
            .and_then(|m| m.grandparent_key)
            .map(|k| k.content_id);
        self.insert_at_head(key.clone(), media.kind, grandparent_id)
            .await?;

        media.status = DownloadStatus::Queued;
        media.progress = 0.0;
        media.bytes_downloaded = 0;
        media.error = None;
        media.retry_count += 1;
        self.persist_and_publish(&media).await?;

        info!(key = %key, retry = media.retry_count, "Retrying download");
        self.drain().await;
        Ok(())
    }

    /// Remove an item entirely: abort if active, delete the video file with
    /// empty-directory pruning, delete every persisted record, and drop it
    /// from the reactive store. Shared artwork stays in the pool.
    pub async fn remove(&self, key: &GlobalKey) -> Result<()> {
        if let Some(entry) = self.active.lock().await.remove(key) {
            entry.cancel.cancel();
            if let Some(handle) = entry.handle {
                let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
            }
        }
        self.remove_queue_entry(key).await?;

        if let Some(media) = self.records.media(key).await? {
            if let Some(path) = &media.file_path {
                self.files.remove_media_file(Path::new(path)).await?;
            }
        }

        self.records.remove_item(key).await?;
        self.store.remove(key);

        info!(key = %key, "Removed download");
        Ok(())
    }

    // ===== Startup reconciliation =====

    /// Reload persisted state after a process restart.
    ///
    /// Any record left `downloading` by an abrupt exit flips back to
    /// `queued` (re-inserted at the head if its queue entry was already
    /// consumed), the reactive store is rebuilt from the persisted maps, and
    /// a drain pass starts the work again. Transfers restart from zero.
    pub async fn restore(&self) -> Result<()> {
        let mut queue = self.records.queue().await?;
        let mut media_all = self.records.all_media().await?;

        for media in &mut media_all {
            if media.status != DownloadStatus::Downloading {
                continue;
            }

            media.status = DownloadStatus::Queued;
            media.progress = 0.0;
            media.bytes_downloaded = 0;
            self.records.save_media(media).await?;
            self.records
                .save_progress(&DownloadProgress::from_media(media))
                .await?;

            if !queue.iter().any(|item| item.key == media.key) {
                let grandparent_id = self
                    .records
                    .metadata(&media.key)
                    .await?
                    .and_then(|m| m.grandparent_key)
                    .map(|k| k.content_id);
                let priority = head_priority(&queue);
                queue.insert(
                    0,
                    DownloadQueueItem {
                        key: media.key.clone(),
                        kind: media.kind,
                        priority,
                        enqueued_at: Utc::now(),
                        parent_id: None,
                        grandparent_id,
                    },
                );
            }
            info!(key = %media.key, "Restored interrupted download as queued");
        }

        self.records.save_queue(&queue).await?;
        *self.queue.lock().await = queue;

        let metadata_all = self.records.all_metadata().await?;
        let progress_all = self.records.all_progress().await?;
        self.store.replace_all(media_all, metadata_all, progress_all);

        self.drain().await;
        Ok(())
    }

    // ===== Internals =====

    async fn require_media(&self, key: &GlobalKey) -> Result<DownloadedMedia> {
        self.records
            .media(key)
            .await?
            .ok_or_else(|| OfflineError::not_found(format!("download {key}")))
    }

    async fn remove_queue_entry(&self, key: &GlobalKey) -> Result<()> {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|item| item.key != *key);
        if queue.len() != before {
            self.records.save_queue(&queue).await?;
        }
        Ok(())
    }

    /// Insert at the queue head: priority strictly below the current minimum
    /// so the drain sort puts this item first.
    async fn insert_at_head(
        &self,
        key: GlobalKey,
        kind: MediaKind,
        grandparent_id: Option<String>,
    ) -> Result<()> {
        let mut queue = self.queue.lock().await;
        if queue.iter().any(|item| item.key == key) {
            return Ok(());
        }

        let priority = head_priority(&queue);
        queue.insert(
            0,
            DownloadQueueItem {
                key,
                kind,
                priority,
                enqueued_at: Utc::now(),
                parent_id: None,
                grandparent_id,
            },
        );
        self.records.save_queue(&queue).await
    }

    async fn persist_and_publish(&self, media: &DownloadedMedia) -> Result<()> {
        self.records.save_media(media).await?;
        let progress = DownloadProgress::from_media(media);
        self.records.save_progress(&progress).await?;
        self.store.apply_media(media.clone());
        self.store.update_progress(progress);
        Ok(())
    }
}

/// Priority that sorts ahead of everything currently queued while staying
/// timestamp-shaped: one below the queue minimum, or now for an empty queue.
fn head_priority(queue: &[DownloadQueueItem]) -> i64 {
    let now = Utc::now().timestamp_millis();
    queue
        .iter()
        .map(|item| item.priority)
        .min()
        .map(|min| min.min(now) - 1)
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::transfer::ChunkCallback;
    use crate::download::types::MediaKind;
    use crate::source::{MediaSource, ResolvedStream};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::path::Path;

    struct StaticSource;

    #[async_trait]
    impl MediaSource for StaticSource {
        async fn resolve_stream_url(&self, content_id: &str) -> Result<ResolvedStream> {
            Ok(ResolvedStream {
                url: format!("https://media.test/{content_id}"),
                total_bytes: Some(1000),
                container: "mp4".to_string(),
            })
        }

        async fn resolve_image_url(&self, image_ref: &str, width: u32) -> Result<String> {
            Ok(format!("https://media.test/image{image_ref}?w={width}"))
        }

        async fn resolve_chapter_markers(
            &self,
            _content_id: &str,
        ) -> Result<Vec<crate::download::types::ChapterMarker>> {
            Ok(Vec::new())
        }
    }

    /// Transfer that never completes until cancelled; keeps items in
    /// `downloading` so queue behavior can be observed.
    struct PendingTransfer;

    #[async_trait]
    impl Transfer for PendingTransfer {
        async fn fetch_to_file(
            &self,
            _url: &str,
            _dest: &Path,
            cancel: &CancellationToken,
            _on_chunk: ChunkCallback<'_>,
        ) -> Result<u64> {
            cancel.cancelled().await;
            Err(OfflineError::Aborted)
        }
    }

    fn movie_request(content_id: &str, title: &str) -> DownloadRequest {
        DownloadRequest {
            server_id: "srv".to_string(),
            content_id: content_id.to_string(),
            kind: MediaKind::Movie,
            title: title.to_string(),
            year: Some(2021),
            summary: None,
            image_ref: None,
            duration_ms: None,
            estimated_bytes: None,
            show_title: None,
            show_year: None,
            season: None,
            episode: None,
            parent_id: None,
            grandparent_id: None,
        }
    }

    async fn manager(tmp: &tempfile::TempDir) -> Arc<DownloadManager> {
        let records = Arc::new(RecordStore::new(Arc::new(MemoryStore::new())));
        let files = Arc::new(FileStore::new(tmp.path().join("offline")));
        let store = Arc::new(LibraryStore::new());
        let manager = DownloadManager::new(
            records,
            files,
            store,
            Arc::new(PendingTransfer),
            DownloadConfig::default(),
        );
        manager.set_source(Some(Arc::new(StaticSource))).await;
        manager
    }

    #[tokio::test]
    async fn enqueue_requires_a_source() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp).await;
        manager.set_source(None).await;

        let err = manager.enqueue(movie_request("1", "Dune")).await.unwrap_err();
        assert!(matches!(err, OfflineError::NoActiveSource));
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp).await;

        assert!(manager.enqueue(movie_request("1", "Dune")).await.unwrap());
        tokio::task::yield_now().await;
        // First is downloading now (pending transfer); second call is a no-op
        assert!(!manager.enqueue(movie_request("1", "Dune")).await.unwrap());
        assert_eq!(manager.active_count().await, 1);
        assert!(manager.queued_keys().await.is_empty());
    }

    #[tokio::test]
    async fn ceiling_keeps_second_item_queued() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp).await;

        manager.enqueue(movie_request("1", "Dune")).await.unwrap();
        manager.enqueue(movie_request("2", "Tenet")).await.unwrap();

        assert_eq!(manager.active_count().await, 1);
        assert_eq!(
            manager.queued_keys().await,
            vec![GlobalKey::new("srv", "2")]
        );
    }

    #[tokio::test]
    async fn pause_of_queued_item_leaves_no_queue_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp).await;

        manager.enqueue(movie_request("1", "Dune")).await.unwrap();
        manager.enqueue(movie_request("2", "Tenet")).await.unwrap();

        let second = GlobalKey::new("srv", "2");
        manager.pause(&second).await.unwrap();

        assert!(manager.queued_keys().await.is_empty());
        let media = manager.records.media(&second).await.unwrap().unwrap();
        assert_eq!(media.status, DownloadStatus::Paused);
    }

    #[tokio::test]
    async fn head_priority_sorts_first() {
        let now = Utc::now().timestamp_millis();
        let queue = vec![
            DownloadQueueItem {
                key: GlobalKey::new("srv", "1"),
                kind: MediaKind::Movie,
                priority: now - 500,
                enqueued_at: Utc::now(),
                parent_id: None,
                grandparent_id: None,
            },
            DownloadQueueItem {
                key: GlobalKey::new("srv", "2"),
                kind: MediaKind::Movie,
                priority: now,
                enqueued_at: Utc::now(),
                parent_id: None,
                grandparent_id: None,
            },
        ];

        assert!(head_priority(&queue) < now - 500);
        // An empty queue falls back to the current timestamp
        assert!(head_priority(&[]) >= now);
    }
}
