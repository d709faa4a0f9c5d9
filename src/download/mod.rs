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


//! Download queue, executor, and transfer plumbing
//!
//! The queue manager ([`queue::DownloadManager`]) persists and orders pending
//! work and enforces the concurrency ceiling; the executor (private to this
//! module) runs the single-item lifecycle; [`transfer`] carries the bytes.
//! Progress throttling lives in [`progress`] so UI churn is bounded at the
//! emitting side.

pub mod progress;
pub mod queue;
pub mod transfer;
pub mod types;

mod executor;

// Re-export commonly used types
pub use queue::{DownloadConfig, DownloadManager};
pub use transfer::{HttpTransfer, Transfer};
pub use types::{
    ChapterMarker, DownloadProgress, DownloadQueueItem, DownloadRequest, DownloadStatus,
    DownloadedMedia, DownloadedMetadata, GlobalKey, MarkerKind, MediaKind,
};
