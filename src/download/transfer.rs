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


//! Streaming transfer collaborator
//!
//! [`Transfer`] is the narrow file-primitive contract the executor and the
//! artwork pool stream through: bytes from a URL to a destination file, with
//! a per-chunk progress callback and cooperative cancellation. [`HttpTransfer`]
//! is the production implementation; tests substitute a scripted one.
//!
//! Cancellation is observed between chunks via `select!` on the token. On
//! abort the partial file is left as-is — no cleanup — and the dedicated
//! [`OfflineError::Aborted`] marker is returned so the executor can tell a
//! deliberate abort from a transfer failure.

use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Write buffer size for streamed chunks
const WRITE_BUFF_SZ: usize = 8 * 1024;

/// Connect timeout; no total-request timeout, transfers can run for hours
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-chunk progress callback: (bytes written so far, total when known)
pub type ChunkCallback<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

/// Contract for streaming a URL to a local file
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Stream `url` into `dest`, reporting progress per chunk.
    ///
    /// Returns the number of bytes written. Must return
    /// [`OfflineError::Aborted`] when the token fires, leaving any partial
    /// file in place.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64>;
}

/// Production transfer over reqwest's streaming body
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64> {
        let parsed = Url::parse(url)
            .map_err(|e| OfflineError::InvalidDownloadUrl(format!("{url}: {e}")))?;

        let response = self.client.get(parsed).send().await.map_err(|e| {
            OfflineError::network_error(format!("Request failed: {e}"), true)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OfflineError::UnexpectedStatusCode(status.as_u16()));
        }

        let total = response.content_length();

        // Transfers always restart from zero; truncate any previous partial
        let file = File::create(dest).await?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFF_SZ, file);

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Partial state stays on disk; flush what we have
                    let _ = writer.flush().await;
                    return Err(OfflineError::Aborted);
                }
                next = stream.next() => match next {
                    None => break,
                    Some(chunk) => chunk.map_err(|e| {
                        OfflineError::network_error(format!("Stream error: {e}"), true)
                    })?,
                },
            };

            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(written, total);
        }

        writer.flush().await?;

        if let Some(expected) = total {
            if written < expected {
                return Err(OfflineError::TransferFailed(format!(
                    "Transfer incomplete: {written}/{expected} bytes"
                )));
            }
        }

        Ok(written)
    }
}
