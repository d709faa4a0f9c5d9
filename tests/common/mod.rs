//! Shared harness for the download-flow integration tests
//!
//! Provides a scriptable media source and transfer so the full queue →
//! executor → store pipeline runs without any network, plus a fully wired
//! [`TestEnv`] over the in-memory key-value store.

use async_trait::async_trait;
use flixor_core::download::transfer::ChunkCallback;
use flixor_core::download::{
    ChapterMarker, DownloadConfig, DownloadManager, DownloadRequest, DownloadStatus, GlobalKey,
    MediaKind, Transfer,
};
use flixor_core::error::{OfflineError, Result};
use flixor_core::file::FileStore;
use flixor_core::source::{MediaSource, ResolvedStream};
use flixor_core::state::LibraryStore;
use flixor_core::storage::{MemoryStore, RecordStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const SERVER: &str = "srv1";

/// Media source with scriptable streams and chapter markers
#[derive(Default)]
pub struct MockSource {
    streams: Mutex<HashMap<String, ResolvedStream>>,
    markers: Mutex<HashMap<String, Vec<ChapterMarker>>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Default stream URL for a content id
    pub fn stream_url(content_id: &str) -> String {
        format!("https://cdn.test/{content_id}.mp4")
    }

    /// Artwork URL the source resolves an image ref to
    pub fn artwork_url(image_ref: &str) -> String {
        format!("https://cdn.test/art{image_ref}?w=600")
    }

    pub fn set_stream(&self, content_id: &str, stream: ResolvedStream) {
        self.streams
            .lock()
            .unwrap()
            .insert(content_id.to_string(), stream);
    }

    pub fn set_markers(&self, content_id: &str, markers: Vec<ChapterMarker>) {
        self.markers
            .lock()
            .unwrap()
            .insert(content_id.to_string(), markers);
    }
}

#[async_trait]
impl MediaSource for MockSource {
    async fn resolve_stream_url(&self, content_id: &str) -> Result<ResolvedStream> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(content_id)
            .cloned()
            .unwrap_or_else(|| ResolvedStream {
                url: Self::stream_url(content_id),
                total_bytes: None,
                container: "mp4".to_string(),
            }))
    }

    async fn resolve_image_url(&self, image_ref: &str, _width: u32) -> Result<String> {
        Ok(Self::artwork_url(image_ref))
    }

    async fn resolve_chapter_markers(&self, content_id: &str) -> Result<Vec<ChapterMarker>> {
        Ok(self
            .markers
            .lock()
            .unwrap()
            .get(content_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Per-URL transfer behavior
#[derive(Clone)]
pub enum Behavior {
    /// Emit the body in the given number of chunk callbacks, then succeed
    Complete { body: Vec<u8>, chunks: usize },
    /// Fail with a transfer error
    Fail(String),
    /// Wait until released (then complete with the default body) or cancelled
    Hold(Arc<Notify>),
}

impl Behavior {
    fn default_complete() -> Self {
        Behavior::Complete {
            body: b"offline-video-bytes".to_vec(),
            chunks: 4,
        }
    }
}

/// Transfer that follows scripted behaviors instead of the network
#[derive(Default)]
pub struct ScriptedTransfer {
    behaviors: Mutex<HashMap<String, Behavior>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransfer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, url: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    /// Park transfers for this URL until the returned handle is notified
    pub fn hold(&self, url: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.set(url, Behavior::Hold(Arc::clone(&release)));
        release
    }

    /// How many times this URL was fetched
    pub fn fetch_count(&self, url: &str) -> usize {
        self.counts.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let mut behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(Behavior::default_complete);

        let hold = match &behavior {
            Behavior::Hold(release) => Some(Arc::clone(release)),
            _ => None,
        };
        if let Some(release) = hold {
            tokio::select! {
                _ = cancel.cancelled() => return Err(OfflineError::Aborted),
                _ = release.notified() => behavior = Behavior::default_complete(),
            }
        }

        match behavior {
            Behavior::Fail(message) => Err(OfflineError::TransferFailed(message)),
            Behavior::Complete { body, chunks } => {
                let total = body.len() as u64;
                let step = (body.len() / chunks.max(1)).max(1);
                let mut written = 0u64;
                for part in body.chunks(step) {
                    if cancel.is_cancelled() {
                        return Err(OfflineError::Aborted);
                    }
                    written += part.len() as u64;
                    on_chunk(written, Some(total));
                    tokio::task::yield_now().await;
                }
                tokio::fs::write(dest, &body).await?;
                Ok(total)
            }
            Behavior::Hold(_) => unreachable!("hold resolved above"),
        }
    }
}

/// Fully wired manager over in-memory storage and a temp download directory
pub struct TestEnv {
    pub manager: Arc<DownloadManager>,
    pub store: Arc<LibraryStore>,
    pub records: Arc<RecordStore>,
    pub files: Arc<FileStore>,
    pub transfer: Arc<ScriptedTransfer>,
    pub source: Arc<MockSource>,
    pub tmp: TempDir,
}

pub async fn env() -> TestEnv {
    env_with_config(DownloadConfig::default()).await
}

pub async fn env_with_config(config: DownloadConfig) -> TestEnv {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();

    let tmp = TempDir::new().expect("temp dir");
    let records = Arc::new(RecordStore::new(Arc::new(MemoryStore::new())));
    let files = Arc::new(FileStore::new(tmp.path().join("flixor")));
    let store = Arc::new(LibraryStore::new());
    let transfer = ScriptedTransfer::new();
    let source = MockSource::new();

    let manager = DownloadManager::new(
        Arc::clone(&records),
        Arc::clone(&files),
        Arc::clone(&store),
        Arc::clone(&transfer) as Arc<dyn Transfer>,
        config,
    );
    manager
        .set_source(Some(Arc::clone(&source) as Arc<dyn MediaSource>))
        .await;

    TestEnv {
        manager,
        store,
        records,
        files,
        transfer,
        source,
        tmp,
    }
}

impl TestEnv {
    pub fn key(&self, content_id: &str) -> GlobalKey {
        GlobalKey::new(SERVER, content_id)
    }

    /// Poll until the scripted transfer for this URL has been entered,
    /// i.e. the executor is parked inside the transfer call
    pub async fn wait_for_fetch(&self, url: &str) {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            while self.transfer.fetch_count(url) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for a fetch of {url}"));
    }

    /// Poll the reactive store until the key reaches the wanted status
    pub async fn wait_for_status(&self, key: &GlobalKey, status: DownloadStatus) {
        let deadline = Duration::from_secs(5);
        let store = Arc::clone(&self.store);
        let poll_key = key.clone();
        tokio::time::timeout(deadline, async move {
            loop {
                if store.status(&poll_key) == Some(status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {key} to reach {status}"));
    }
}

pub fn movie_request(content_id: &str, title: &str, year: u32) -> DownloadRequest {
    DownloadRequest {
        server_id: SERVER.to_string(),
        content_id: content_id.to_string(),
        kind: MediaKind::Movie,
        title: title.to_string(),
        year: Some(year),
        summary: None,
        image_ref: None,
        duration_ms: None,
        estimated_bytes: None,
        show_title: None,
        show_year: None,
        season: None,
        episode: None,
        parent_id: None,
        grandparent_id: None,
    }
}

pub fn episode_request(
    content_id: &str,
    show_title: &str,
    show_year: u32,
    season: u32,
    episode: u32,
    title: &str,
) -> DownloadRequest {
    DownloadRequest {
        server_id: SERVER.to_string(),
        content_id: content_id.to_string(),
        kind: MediaKind::Episode,
        title: title.to_string(),
        year: None,
        summary: None,
        image_ref: None,
        duration_ms: None,
        estimated_bytes: None,
        show_title: Some(show_title.to_string()),
        show_year: Some(show_year),
        season: Some(season),
        episode: Some(episode),
        parent_id: Some(format!("{content_id}-season")),
        grandparent_id: Some(format!("{show_title}-show")),
    }
}
