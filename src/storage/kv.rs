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


//! Persistent key-value collaborator contract
//!
//! All durable state (queue, per-item records, chapter markers) is small JSON
//! records behind this narrow string interface. The application injects its
//! own implementation; the crate ships [`SqliteStore`](super::SqliteStore)
//! for durable storage and [`MemoryStore`] for tests.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Port for durable storage of small string records.
///
/// Implementations must be safe to call from concurrent tasks. Writes must be
/// visible to subsequent reads once the future resolves; the queue manager
/// relies on that ordering to keep persisted state ahead of in-memory
/// notifications.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a record, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write (insert or replace) a record
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a record; deleting a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// List every stored key
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// In-memory store used by unit and integration tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
