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


//! Persistent storage for download state
//!
//! Durable state lives behind the narrow [`KeyValueStore`] string contract;
//! [`RecordStore`] adds the typed JSON layer and key namespacing on top.
//! [`SqliteStore`] is the shipped durable implementation, [`MemoryStore`]
//! backs tests.

pub mod kv;
pub mod records;
pub mod sqlite;

// Re-export commonly used types
pub use kv::{KeyValueStore, MemoryStore};
pub use records::RecordStore;
pub use sqlite::SqliteStore;
