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


//! Typed record layer over the key-value store
//!
//! # Persisted State Layout
//! - `offline:downloads` — master list of known global keys
//! - `offline:queue` — the pending queue, ordered as last persisted
//! - `offline:media:{key}` — authoritative execution record
//! - `offline:meta:{key}` — descriptive metadata record
//! - `offline:progress:{key}` — last persisted progress snapshot
//! - `offline:markers:{key}` — cached chapter markers
//!
//! Every mutation is written through before the corresponding in-memory
//! notification fires, so the reactive store is never more than one event
//! ahead of durable state.

use crate::download::types::{
    ChapterMarker, DownloadProgress, DownloadQueueItem, DownloadedMedia, DownloadedMetadata,
    GlobalKey,
};
use crate::error::Result;
use crate::storage::kv::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const NAMESPACE: &str = "offline";

fn downloads_key() -> String {
    format!("{NAMESPACE}:downloads")
}

fn queue_key() -> String {
    format!("{NAMESPACE}:queue")
}

fn media_key(key: &GlobalKey) -> String {
    format!("{NAMESPACE}:media:{key}")
}

fn metadata_key(key: &GlobalKey) -> String {
    format!("{NAMESPACE}:meta:{key}")
}

fn progress_key(key: &GlobalKey) -> String {
    format!("{NAMESPACE}:progress:{key}")
}

fn markers_key(key: &GlobalKey) -> String {
    format!("{NAMESPACE}:markers:{key}")
}

/// Typed JSON records over the injected [`KeyValueStore`]
pub struct RecordStore {
    kv: Arc<dyn KeyValueStore>,
}

impl RecordStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, &raw).await
    }

    // ===== Queue =====

    /// Load the persisted queue; an absent record is an empty queue
    pub async fn queue(&self) -> Result<Vec<DownloadQueueItem>> {
        Ok(self.read_json(&queue_key()).await?.unwrap_or_default())
    }

    pub async fn save_queue(&self, queue: &[DownloadQueueItem]) -> Result<()> {
        self.write_json(&queue_key(), &queue).await
    }

    // ===== Master download list =====

    pub async fn download_keys(&self) -> Result<Vec<GlobalKey>> {
        Ok(self.read_json(&downloads_key()).await?.unwrap_or_default())
    }

    /// Append a key to the master list if not already present
    pub async fn add_download_key(&self, key: &GlobalKey) -> Result<()> {
        let mut keys = self.download_keys().await?;
        if !keys.contains(key) {
            keys.push(key.clone());
            self.write_json(&downloads_key(), &keys).await?;
        }
        Ok(())
    }

    pub async fn remove_download_key(&self, key: &GlobalKey) -> Result<()> {
        let mut keys = self.download_keys().await?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            self.write_json(&downloads_key(), &keys).await?;
        }
        Ok(())
    }

    // ===== Per-item records =====

    pub async fn media(&self, key: &GlobalKey) -> Result<Option<DownloadedMedia>> {
        self.read_json(&media_key(key)).await
    }

    pub async fn save_media(&self, media: &DownloadedMedia) -> Result<()> {
        self.write_json(&media_key(&media.key), media).await
    }

    pub async fn metadata(&self, key: &GlobalKey) -> Result<Option<DownloadedMetadata>> {
        self.read_json(&metadata_key(key)).await
    }

    pub async fn save_metadata(&self, metadata: &DownloadedMetadata) -> Result<()> {
        self.write_json(&metadata_key(&metadata.key), metadata).await
    }

    pub async fn progress(&self, key: &GlobalKey) -> Result<Option<DownloadProgress>> {
        self.read_json(&progress_key(key)).await
    }

    pub async fn save_progress(&self, progress: &DownloadProgress) -> Result<()> {
        self.write_json(&progress_key(&progress.key), progress).await
    }

    pub async fn markers(&self, key: &GlobalKey) -> Result<Option<Vec<ChapterMarker>>> {
        self.read_json(&markers_key(key)).await
    }

    pub async fn save_markers(&self, key: &GlobalKey, markers: &[ChapterMarker]) -> Result<()> {
        self.write_json(&markers_key(key), &markers).await
    }

    /// Delete all four per-item records and drop the key from the master list
    pub async fn remove_item(&self, key: &GlobalKey) -> Result<()> {
        self.kv.remove(&media_key(key)).await?;
        self.kv.remove(&metadata_key(key)).await?;
        self.kv.remove(&progress_key(key)).await?;
        self.kv.remove(&markers_key(key)).await?;
        self.remove_download_key(key).await
    }

    // ===== Bulk loads (startup reconciliation) =====

    /// Load every media record listed in the master download list.
    /// Keys whose record is missing are skipped.
    pub async fn all_media(&self) -> Result<Vec<DownloadedMedia>> {
        let mut out = Vec::new();
        for key in self.download_keys().await? {
            if let Some(media) = self.media(&key).await? {
                out.push(media);
            }
        }
        Ok(out)
    }

    pub async fn all_metadata(&self) -> Result<Vec<DownloadedMetadata>> {
        let mut out = Vec::new();
        for key in self.download_keys().await? {
            if let Some(metadata) = self.metadata(&key).await? {
                out.push(metadata);
            }
        }
        Ok(out)
    }

    pub async fn all_progress(&self) -> Result<Vec<DownloadProgress>> {
        let mut out = Vec::new();
        for key in self.download_keys().await? {
            if let Some(progress) = self.progress(&key).await? {
                out.push(progress);
            }
        }
        Ok(out)
    }
}
