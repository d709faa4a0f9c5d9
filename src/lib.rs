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


//! Offline download core for the Flixor media client
//!
//! This crate is the engine behind offline playback: a persisted download
//! queue with bounded concurrency, a single-item executor with cooperative
//! cancellation, a content-addressed file store with a deduplicated artwork
//! pool, and a reactive in-memory store the UI subscribes to. Server API
//! clients and screens live in the application layer; they reach this crate
//! through [`source::MediaSource`], [`storage::KeyValueStore`], and the
//! [`download::DownloadManager`] surface.
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use flixor_core::download::{DownloadConfig, DownloadManager, HttpTransfer};
//! use flixor_core::file::FileStore;
//! use flixor_core::state::LibraryStore;
//! use flixor_core::storage::{RecordStore, SqliteStore};
//!
//! # async fn wire() -> flixor_core::error::Result<()> {
//! let kv = Arc::new(SqliteStore::new("offline.db").await?);
//! let records = Arc::new(RecordStore::new(kv));
//! let files = Arc::new(FileStore::new("/data/flixor".into()));
//! let store = Arc::new(LibraryStore::new());
//! let transfer = Arc::new(HttpTransfer::new()?);
//!
//! let manager = DownloadManager::new(records, files, store, transfer, DownloadConfig::default());
//! manager.restore().await?;
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod error;
pub mod file;
pub mod offline;
pub mod source;
pub mod state;
pub mod storage;

// Re-export the main surface
pub use download::{DownloadConfig, DownloadManager, DownloadRequest, DownloadStatus, GlobalKey};
pub use error::{OfflineError, Result};
pub use offline::OfflineMediaAccessor;
pub use state::LibraryStore;
