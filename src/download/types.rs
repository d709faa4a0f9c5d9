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


//! Data model for the download subsystem
//!
//! # Record Lifecycle
//! - [`DownloadQueueItem`]: created on enqueue, removed on dequeue, re-inserted
//!   at the head on resume/retry.
//! - [`DownloadedMedia`]: the authoritative per-item execution record; exactly
//!   one exists per global key once enqueued, deleted only on explicit removal.
//! - [`DownloadedMetadata`]: descriptive record paired 1:1 with the media
//!   record; created at enqueue from the catalog item, updated once artwork
//!   is localized.
//! - [`ChapterMarker`]: written once after a successful download, read-only
//!   thereafter.
//! - [`DownloadProgress`]: ephemeral UI snapshot; persisted only at status
//!   transitions and always reconstructable from the media record.

use crate::error::OfflineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Composite identifier `{serverId}:{contentId}` uniquely identifying a
/// downloadable item across all connected servers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GlobalKey {
    pub server_id: String,
    pub content_id: String,
}

impl GlobalKey {
    pub fn new<S: Into<String>, C: Into<String>>(server_id: S, content_id: C) -> Self {
        Self {
            server_id: server_id.into(),
            content_id: content_id.into(),
        }
    }
}

impl fmt::Display for GlobalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_id, self.content_id)
    }
}

impl FromStr for GlobalKey {
    type Err = OfflineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((server, content)) if !server.is_empty() && !content.is_empty() => {
                Ok(Self::new(server, content))
            }
            _ => Err(OfflineError::InvalidInput(format!(
                "Invalid global key: {s}"
            ))),
        }
    }
}

impl TryFrom<String> for GlobalKey {
    type Error = OfflineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GlobalKey> for String {
    fn from(key: GlobalKey) -> Self {
        key.to_string()
    }
}

/// Kind of downloadable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Episode,
}

/// Status of a download record
///
/// Terminal states are `Completed` and `Cancelled`; `Failed` is terminal
/// until an explicit retry moves it back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// States from which no automatic transition occurs without user action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    /// States that occupy or are waiting for a concurrency slot
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DownloadStatus::Queued | DownloadStatus::Downloading)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending work request in the persisted queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadQueueItem {
    pub key: GlobalKey,
    pub kind: MediaKind,
    /// Millisecond timestamp; drain pops the lowest value first
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
    /// Season identifier for episodes, used for path derivation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Show identifier for episodes, used for grouping and path derivation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grandparent_id: Option<String>,
}

/// The authoritative per-item execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedMedia {
    pub key: GlobalKey,
    pub server_id: String,
    pub content_id: String,
    pub kind: MediaKind,
    pub status: DownloadStatus,
    /// Percent complete (0.0 - 100.0)
    pub progress: f64,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    /// Resolved local video file path once the transfer starts
    pub file_path: Option<String>,
    /// Resolved local artwork path once artwork is localized
    pub artwork_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl DownloadedMedia {
    /// Create the initial record for a freshly enqueued item
    pub fn queued(key: GlobalKey, kind: MediaKind, now: DateTime<Utc>) -> Self {
        Self {
            server_id: key.server_id.clone(),
            content_id: key.content_id.clone(),
            key,
            kind,
            status: DownloadStatus::Queued,
            progress: 0.0,
            bytes_downloaded: 0,
            total_bytes: 0,
            file_path: None,
            artwork_path: None,
            created_at: now,
            completed_at: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Timestamp used for ordering the derived lists: completion time when
    /// available, creation time otherwise.
    pub fn sort_time(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }
}

/// Descriptive, presentation-oriented record paired 1:1 with [`DownloadedMedia`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedMetadata {
    pub key: GlobalKey,
    pub kind: MediaKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Source image reference; artwork localization resolves it to a pool file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Localized artwork file, set once artwork is fetched into the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_year: Option<u32>,
    /// Back-reference used to group episodes into a show aggregate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grandparent_key: Option<GlobalKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Last playback position, written by the offline player
    #[serde(default)]
    pub playback_offset_ms: u64,
    /// Whether chapter markers were cached for this item
    #[serde(default)]
    pub has_chapter_markers: bool,
}

/// Kind of a cached chapter marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Intro,
    Credits,
    #[serde(other)]
    Other,
}

/// Immutable marker cached per item for offline intro/credits skipping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMarker {
    pub start_ms: u64,
    pub end_ms: u64,
    pub kind: MarkerKind,
}

/// Transient progress snapshot used for UI notification
///
/// Reconstructable from [`DownloadedMedia`] at any time, so losing it on a
/// crash is not data loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub key: GlobalKey,
    pub status: DownloadStatus,
    /// Percent complete (0.0 - 100.0)
    pub percent: f64,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    /// Current transfer speed in bytes per second
    pub speed_bps: f64,
}

impl DownloadProgress {
    /// Rebuild a snapshot from the persisted media record
    pub fn from_media(media: &DownloadedMedia) -> Self {
        Self {
            key: media.key.clone(),
            status: media.status,
            percent: media.progress,
            bytes_downloaded: media.bytes_downloaded,
            total_bytes: media.total_bytes,
            speed_bps: 0.0,
        }
    }
}

/// Enqueue input built by the UI from a catalog item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub server_id: String,
    pub content_id: String,
    pub kind: MediaKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Size hint used for the enqueue-time free-space check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<u64>,
    // Episode-only fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grandparent_id: Option<String>,
}

impl DownloadRequest {
    pub fn global_key(&self) -> GlobalKey {
        GlobalKey::new(&self.server_id, &self.content_id)
    }

    /// Show-level key for grouping episodes, when the request carries one
    pub fn grandparent_key(&self) -> Option<GlobalKey> {
        self.grandparent_id
            .as_ref()
            .map(|id| GlobalKey::new(&self.server_id, id))
    }

    /// Build the initial metadata record for this request
    pub fn to_metadata(&self) -> DownloadedMetadata {
        DownloadedMetadata {
            key: self.global_key(),
            kind: self.kind,
            title: self.title.clone(),
            year: self.year,
            summary: self.summary.clone(),
            image_ref: self.image_ref.clone(),
            artwork_file: None,
            show_title: self.show_title.clone(),
            show_year: self.show_year,
            grandparent_key: self.grandparent_key(),
            season: self.season,
            episode: self.episode,
            duration_ms: self.duration_ms,
            playback_offset_ms: 0,
            has_chapter_markers: false,
        }
    }
}
