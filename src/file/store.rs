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


//! Content-addressed file store
//!
//! Owns the download base directory: derived video paths, the shared artwork
//! pool, directory creation, and the cascading empty-directory cleanup that
//! runs after files are removed. Artwork localization checks the pool before
//! any network call, so a source image shared by several catalog entries is
//! fetched at most once.

use crate::download::transfer::Transfer;
use crate::download::types::DownloadedMetadata;
use crate::error::{OfflineError, Result};
use crate::file::paths;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// File store rooted at the configured download directory
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Absolute path for the metadata record's video file
    pub fn media_path(&self, metadata: &DownloadedMetadata, ext: &str) -> Result<PathBuf> {
        Ok(self.base.join(paths::media_path(metadata, ext)?))
    }

    /// Absolute path in the shared artwork pool
    pub fn artwork_path(&self, server_id: &str, image_ref: &str) -> PathBuf {
        self.base.join(paths::artwork_path(server_id, image_ref))
    }

    /// Ensure a directory exists, creating every missing segment.
    ///
    /// Idempotent: partial pre-existence is the common case and never errors.
    pub async fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }

        fs::create_dir_all(path).await.map_err(|e| {
            OfflineError::file_io(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    pub async fn file_size(path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path).await.map_err(|e| {
            OfflineError::file_io(format!("Failed to stat {}: {}", path.display(), e))
        })?;
        Ok(metadata.len())
    }

    /// Delete a file; a missing file is not an error
    pub async fn remove_file(path: &Path) -> Result<()> {
        if !Self::file_exists(path).await {
            return Ok(());
        }

        fs::remove_file(path).await.map_err(|e| {
            OfflineError::file_io(format!("Failed to delete {}: {}", path.display(), e))
        })
    }

    /// Delete a media file, then prune directories it leaves empty.
    ///
    /// Pruning cascades one level at a time (season, then show) and only
    /// removes a directory after a listing proves it is empty. It stops at
    /// the first non-empty parent and never crosses the base directory.
    pub async fn remove_media_file(&self, path: &Path) -> Result<()> {
        Self::remove_file(path).await?;
        self.prune_empty_parents(path).await
    }

    async fn prune_empty_parents(&self, path: &Path) -> Result<()> {
        // The base and the fixed layout directories stay in place; only the
        // per-title levels (movie folder, season, show) are candidates.
        let downloads = self.base.join("Downloads");
        let floors = [
            self.base.clone(),
            downloads.join("Movies"),
            downloads.join("TV Shows"),
            downloads,
            self.base.join("artwork"),
        ];

        let mut current = path.parent();

        while let Some(dir) = current {
            if !dir.starts_with(&self.base) || floors.iter().any(|floor| floor == dir) || !dir.exists() {
                break;
            }

            let mut entries = fs::read_dir(dir).await.map_err(|e| {
                OfflineError::file_io(format!("Failed to read {}: {}", dir.display(), e))
            })?;
            let has_entries = entries.next_entry().await.map_err(|e| {
                OfflineError::file_io(format!("Failed to list {}: {}", dir.display(), e))
            })?;
            if has_entries.is_some() {
                break;
            }

            debug!(dir = %dir.display(), "Removing empty download directory");
            fs::remove_dir(dir).await.map_err(|e| {
                OfflineError::file_io(format!("Failed to remove {}: {}", dir.display(), e))
            })?;

            current = dir.parent();
        }

        Ok(())
    }

    /// Free space at the download location, for the enqueue-time check
    pub fn available_space(&self) -> Result<u64> {
        if !self.base.exists() {
            std::fs::create_dir_all(&self.base)?;
        }
        fs2::available_space(&self.base).map_err(|e| {
            OfflineError::file_io(format!(
                "Failed to query free space at {}: {}",
                self.base.display(),
                e
            ))
        })
    }

    /// Fetch a source image into the shared artwork pool.
    ///
    /// The pool path is derived from (server id, image ref); if the file is
    /// already present the network call is skipped entirely and the existing
    /// path is returned.
    pub async fn localize_artwork(
        &self,
        transfer: &dyn Transfer,
        cancel: &CancellationToken,
        server_id: &str,
        image_ref: &str,
        url: &str,
    ) -> Result<PathBuf> {
        let dest = self.artwork_path(server_id, image_ref);
        if Self::file_exists(&dest).await {
            debug!(path = %dest.display(), "Artwork already in pool, skipping fetch");
            return Ok(dest);
        }

        if let Some(parent) = dest.parent() {
            self.ensure_directory_exists(parent).await?;
        }

        transfer
            .fetch_to_file(url, &dest, cancel, &mut |_, _| {})
            .await?;

        Ok(dest)
    }
}
