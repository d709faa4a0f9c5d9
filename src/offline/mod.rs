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


//! Offline metadata accessor
//!
//! Thin lookups over the persisted records for the player to consume when no
//! server is reachable. Read-only apart from [`set_playback_offset`], the one
//! write the player performs.
//!
//! [`set_playback_offset`]: OfflineMediaAccessor::set_playback_offset

use crate::download::types::{
    ChapterMarker, DownloadStatus, DownloadedMedia, DownloadedMetadata, GlobalKey,
};
use crate::error::{OfflineError, Result};
use crate::storage::RecordStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Read-mostly view over the persisted download records
pub struct OfflineMediaAccessor {
    records: Arc<RecordStore>,
}

impl OfflineMediaAccessor {
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    pub async fn media(&self, key: &GlobalKey) -> Result<Option<DownloadedMedia>> {
        self.records.media(key).await
    }

    pub async fn metadata(&self, key: &GlobalKey) -> Result<Option<DownloadedMetadata>> {
        self.records.metadata(key).await
    }

    /// Cached intro/credits markers; empty when none were cached
    pub async fn chapter_markers(&self, key: &GlobalKey) -> Result<Vec<ChapterMarker>> {
        Ok(self.records.markers(key).await?.unwrap_or_default())
    }

    /// Whether the item finished downloading and can play offline
    pub async fn is_available(&self, key: &GlobalKey) -> Result<bool> {
        Ok(self.playable_path(key).await?.is_some())
    }

    /// Local file path for playback; `None` unless the download completed
    pub async fn playable_path(&self, key: &GlobalKey) -> Result<Option<PathBuf>> {
        let media = match self.records.media(key).await? {
            Some(media) => media,
            None => return Ok(None),
        };

        if media.status != DownloadStatus::Completed {
            return Ok(None);
        }
        Ok(media.file_path.map(PathBuf::from))
    }

    /// All completed items, paired with their metadata, for the offline shelf
    pub async fn completed(&self) -> Result<Vec<(DownloadedMedia, DownloadedMetadata)>> {
        let mut out = Vec::new();
        for media in self.records.all_media().await? {
            if media.status != DownloadStatus::Completed {
                continue;
            }
            if let Some(metadata) = self.records.metadata(&media.key).await? {
                out.push((media, metadata));
            }
        }
        Ok(out)
    }

    /// Persist the player's last playback position for an item
    pub async fn set_playback_offset(&self, key: &GlobalKey, offset_ms: u64) -> Result<()> {
        let mut metadata = self
            .records
            .metadata(key)
            .await?
            .ok_or_else(|| OfflineError::not_found(format!("metadata for {key}")))?;
        metadata.playback_offset_ms = offset_ms;
        self.records.save_metadata(&metadata).await
    }
}
