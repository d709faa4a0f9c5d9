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


//! Media source collaborator contract
//!
//! The concrete server clients live in the application layer and are out of
//! scope here; the download core only needs the narrow surface below, called
//! with a bearer credential already resolved by the caller. The queue manager
//! holds an `Option<Arc<dyn MediaSource>>` — enqueue fails with
//! [`crate::error::OfflineError::NoActiveSource`] when nothing is attached.

use crate::download::types::ChapterMarker;
use crate::error::Result;
use async_trait::async_trait;

/// A direct-playable stream resolved for one content item
#[derive(Debug, Clone)]
pub struct ResolvedStream {
    /// Direct URL the transfer can stream from
    pub url: String,
    /// Total size when the source reports it up front
    pub total_bytes: Option<u64>,
    /// Container extension for the local file name (e.g. "mp4", "mkv")
    pub container: String,
}

/// Contract for the external media source (server catalog + CDN)
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Resolve a direct playable URL for a content item
    async fn resolve_stream_url(&self, content_id: &str) -> Result<ResolvedStream>;

    /// Resolve a fetchable URL for an image reference at the given width
    async fn resolve_image_url(&self, image_ref: &str, width: u32) -> Result<String>;

    /// Fetch intro/credits markers for a content item
    async fn resolve_chapter_markers(&self, content_id: &str) -> Result<Vec<ChapterMarker>>;
}
