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


//! Single-item download lifecycle
//!
//! The executor owns every status transition out of `queued`:
//! `queued → downloading → {completed | failed}`. Pause and cancel are the
//! queue manager's transitions — the executor observes them as an abort of
//! the transfer and returns without touching the record.
//!
//! Steps, each best-effort except the video transfer itself:
//! 1. mark `downloading`, persist, notify
//! 2. resolve the direct stream URL from the media source
//! 3. derive the destination path from the metadata record
//! 4. ensure the destination directory exists
//! 5. stream to disk, forwarding throttled progress
//! 6. localize artwork and cache chapter markers (best-effort), then persist
//!    the terminal record
//!
//! Raw transfer errors are classified here: an error matching the abort
//! marker (or arriving with the token already cancelled) is not a failure.

use crate::download::progress::{ProgressThrottle, SpeedTracker};
use crate::download::transfer::Transfer;
use crate::download::types::{
    DownloadProgress, DownloadQueueItem, DownloadStatus, DownloadedMedia, GlobalKey,
};
use crate::error::{OfflineError, Result};
use crate::file::FileStore;
use crate::source::MediaSource;
use crate::state::LibraryStore;
use crate::storage::RecordStore;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Width requested for localized artwork
const ARTWORK_WIDTH: u32 = 600;

/// How a single-item run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecOutcome {
    Completed,
    Failed,
    /// Pause or cancel aborted the transfer; the queue manager owns the status
    Aborted,
}

/// Runs the full lifecycle for one dequeued item
pub(crate) struct Executor {
    records: Arc<RecordStore>,
    files: Arc<FileStore>,
    store: Arc<LibraryStore>,
    transfer: Arc<dyn Transfer>,
}

impl Executor {
    pub fn new(
        records: Arc<RecordStore>,
        files: Arc<FileStore>,
        store: Arc<LibraryStore>,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        Self {
            records,
            files,
            store,
            transfer,
        }
    }

    pub async fn run(
        &self,
        item: &DownloadQueueItem,
        source: Arc<dyn MediaSource>,
        cancel: CancellationToken,
    ) -> ExecOutcome {
        match self.execute(item, source, &cancel).await {
            Ok(()) => ExecOutcome::Completed,
            Err(e) if e.is_abort() || cancel.is_cancelled() => {
                debug!(key = %item.key, "Transfer aborted, leaving status to the queue manager");
                ExecOutcome::Aborted
            }
            Err(e) => {
                self.mark_failed(&item.key, &e).await;
                ExecOutcome::Failed
            }
        }
    }

    async fn execute(
        &self,
        item: &DownloadQueueItem,
        source: Arc<dyn MediaSource>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = &item.key;
        let mut media = self
            .records
            .media(key)
            .await?
            .ok_or_else(|| OfflineError::not_found(format!("media record for {key}")))?;
        let mut metadata = self
            .records
            .metadata(key)
            .await?
            .ok_or_else(|| OfflineError::not_found(format!("metadata record for {key}")))?;

        // An abort can land before the first transition; the manager already
        // wrote the paused/cancelled status this write would clobber
        if cancel.is_cancelled() {
            return Err(OfflineError::Aborted);
        }

        // Transfers restart from zero; counters from a previous attempt are stale
        media.status = DownloadStatus::Downloading;
        media.progress = 0.0;
        media.bytes_downloaded = 0;
        media.error = None;
        self.persist_and_publish(&media).await?;

        let stream = source.resolve_stream_url(&key.content_id).await?;

        let dest = self.files.media_path(&metadata, &stream.container)?;
        if let Some(parent) = dest.parent() {
            self.files.ensure_directory_exists(parent).await?;
        }

        // A pause/cancel that landed during URL resolution has already set
        // the record's status; stop before overwriting it
        if cancel.is_cancelled() {
            return Err(OfflineError::Aborted);
        }

        media.file_path = Some(dest.to_string_lossy().into_owned());
        media.total_bytes = stream.total_bytes.unwrap_or(0);
        self.records.save_media(&media).await?;
        self.store.apply_media(media.clone());

        debug!(key = %key, dest = %dest.display(), "Starting transfer");

        let written = {
            let store = Arc::clone(&self.store);
            let progress_key = key.clone();
            let size_hint = stream.total_bytes;
            let mut throttle = ProgressThrottle::new();
            let mut speed = SpeedTracker::new();

            let mut on_chunk = move |written: u64, total: Option<u64>| {
                speed.add_position(written);
                let total = total.or(size_hint).unwrap_or(0);
                let percent = if total > 0 {
                    (written as f64 / total as f64) * 100.0
                } else {
                    0.0
                };
                if throttle.should_forward(percent) {
                    store.update_progress(DownloadProgress {
                        key: progress_key.clone(),
                        status: DownloadStatus::Downloading,
                        percent,
                        bytes_downloaded: written,
                        total_bytes: total,
                        speed_bps: speed.average_speed(),
                    });
                }
            };

            self.transfer
                .fetch_to_file(&stream.url, &dest, cancel, &mut on_chunk)
                .await?
        };

        // Best-effort: a failure here must never fail the download
        if let Some(image_ref) = metadata.image_ref.clone() {
            match self
                .localize_artwork(source.as_ref(), cancel, &key.server_id, &image_ref)
                .await
            {
                Ok(path) => {
                    let path = path.to_string_lossy().into_owned();
                    media.artwork_path = Some(path.clone());
                    metadata.artwork_file = Some(path);
                }
                Err(e) if e.is_abort() => return Err(e),
                Err(e) => warn!(key = %key, error = %e, "Artwork localization failed"),
            }
        }

        match source.resolve_chapter_markers(&key.content_id).await {
            Ok(markers) if !markers.is_empty() => {
                self.records.save_markers(key, &markers).await?;
                metadata.has_chapter_markers = true;
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Chapter marker caching failed"),
        }

        // An abort that raced the end of the transfer wins: the queue manager
        // already set paused/cancelled and this record must not become completed.
        if cancel.is_cancelled() {
            return Err(OfflineError::Aborted);
        }

        let file_size = FileStore::file_size(&dest).await.unwrap_or(written);
        media.status = DownloadStatus::Completed;
        media.progress = 100.0;
        media.bytes_downloaded = file_size;
        media.total_bytes = file_size;
        media.completed_at = Some(Utc::now());
        media.error = None;

        self.records.save_metadata(&metadata).await?;
        self.records.save_media(&media).await?;
        self.records
            .save_progress(&DownloadProgress::from_media(&media))
            .await?;

        self.store.apply_metadata(metadata);
        self.store.apply_media(media.clone());
        self.store
            .update_progress(DownloadProgress::from_media(&media));

        info!(key = %key, bytes = file_size, "Download completed");
        Ok(())
    }

    async fn localize_artwork(
        &self,
        source: &dyn MediaSource,
        cancel: &CancellationToken,
        server_id: &str,
        image_ref: &str,
    ) -> Result<std::path::PathBuf> {
        let url = source.resolve_image_url(image_ref, ARTWORK_WIDTH).await?;
        self.files
            .localize_artwork(self.transfer.as_ref(), cancel, server_id, image_ref, &url)
            .await
    }

    /// Persist `failed` with the error message. The partial file stays on
    /// disk and no automatic retry happens; retry is a user-triggered
    /// operation on the queue manager.
    async fn mark_failed(&self, key: &GlobalKey, error: &OfflineError) {
        warn!(key = %key, error = %error, "Download failed");

        let mut media = match self.records.media(key).await {
            Ok(Some(media)) => media,
            Ok(None) => return,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not load media record to mark failure");
                return;
            }
        };

        media.status = DownloadStatus::Failed;
        media.error = Some(error.to_string());

        if let Err(e) = self.persist_and_publish(&media).await {
            warn!(key = %key, error = %e, "Could not persist failure state");
        }
    }

    /// Write media + progress records through, then notify the store
    async fn persist_and_publish(&self, media: &DownloadedMedia) -> Result<()> {
        self.records.save_media(media).await?;
        self.records
            .save_progress(&DownloadProgress::from_media(media))
            .await?;
        self.store.apply_media(media.clone());
        self.store
            .update_progress(DownloadProgress::from_media(media));
        Ok(())
    }
}
