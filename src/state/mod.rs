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


//! Reactive in-memory store for the download UI
//!
//! Single source of truth the UI subscribes to, projected from the three
//! persisted maps (media, metadata, progress). Derived movie/show lists are
//! recomputed after structural changes (add/remove/status/metadata) and
//! deliberately skipped after pure progress updates — progress can never
//! change which items appear in the lists. The `revision` on
//! [`DerivedLists`] makes that optimization observable.
//!
//! Getters are synchronous; every mutation notifies listeners synchronously
//! after the state is updated, and listeners treat the event as immutable.
//! Per-key lookups are memoized on `Arc` pointer identity so a progress
//! storm does not allocate fresh snapshots for untouched items.

use crate::download::types::{
    DownloadProgress, DownloadStatus, DownloadedMedia, DownloadedMetadata, GlobalKey, MediaKind,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// One movie entry in the derived list
#[derive(Debug, Clone, PartialEq)]
pub struct MovieDownload {
    pub key: GlobalKey,
    pub title: String,
    pub year: Option<u32>,
    pub status: DownloadStatus,
    pub sort_time: DateTime<Utc>,
}

/// One episode entry inside a show aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeDownload {
    pub key: GlobalKey,
    pub title: String,
    pub season: u32,
    pub episode: u32,
    pub status: DownloadStatus,
}

/// A derived show aggregate grouping its downloaded episodes
#[derive(Debug, Clone, PartialEq)]
pub struct ShowDownload {
    /// Grandparent (show) key the episodes reference
    pub key: GlobalKey,
    pub title: String,
    pub year: Option<u32>,
    /// Episodes sorted by (season, episode) ascending
    pub episodes: Vec<EpisodeDownload>,
    /// Number of episodes whose download completed
    pub downloaded_count: usize,
    /// Most recent activity across the episodes, used for list ordering
    pub sort_time: DateTime<Utc>,
}

/// The two derived projections plus their recompute revision
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedLists {
    pub movies: Vec<MovieDownload>,
    pub shows: Vec<ShowDownload>,
    /// Bumped on every recompute; progress-only updates leave it unchanged
    pub revision: u64,
}

impl DerivedLists {
    fn empty() -> Self {
        Self {
            movies: Vec::new(),
            shows: Vec::new(),
            revision: 0,
        }
    }
}

/// Memoized per-key snapshot handed to the UI
#[derive(Debug)]
pub struct ItemState {
    pub media: Option<Arc<DownloadedMedia>>,
    pub metadata: Option<Arc<DownloadedMetadata>>,
    pub progress: Option<Arc<DownloadProgress>>,
}

impl ItemState {
    pub fn status(&self) -> Option<DownloadStatus> {
        self.media.as_ref().map(|m| m.status)
    }
}

/// Change class carried by store events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Add/remove/status/metadata change; derived lists were recomputed
    Structural,
    /// Pure progress update; derived lists untouched
    Progress,
}

/// Event handed to listeners after every mutation
#[derive(Clone)]
pub struct StoreEvent {
    /// The key that changed, `None` for bulk reloads
    pub key: Option<GlobalKey>,
    pub change: ChangeKind,
    /// Current derived-lists snapshot; immutable
    pub lists: Arc<DerivedLists>,
}

/// Handle returned from [`LibraryStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct Inner {
    media: HashMap<GlobalKey, Arc<DownloadedMedia>>,
    metadata: HashMap<GlobalKey, Arc<DownloadedMetadata>>,
    progress: HashMap<GlobalKey, Arc<DownloadProgress>>,
    derived: Arc<DerivedLists>,
}

/// Reactive state store; one instance per process, injected where needed
pub struct LibraryStore {
    inner: RwLock<Inner>,
    memo: Mutex<HashMap<GlobalKey, Arc<ItemState>>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
}

impl Default for LibraryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                media: HashMap::new(),
                metadata: HashMap::new(),
                progress: HashMap::new(),
                derived: Arc::new(DerivedLists::empty()),
            }),
            memo: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    // ===== Subscription =====

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Invoke listeners outside the registry lock so they can read the store
    fn notify(&self, event: StoreEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(&event);
        }
    }

    // ===== Mutators =====

    /// Upsert a media record; structural — derived lists are recomputed
    pub fn apply_media(&self, media: DownloadedMedia) {
        let key = media.key.clone();
        let lists = {
            let mut inner = self.inner.write().expect("library state poisoned");
            inner.media.insert(key.clone(), Arc::new(media));
            Self::recompute(&mut inner)
        };
        self.notify(StoreEvent {
            key: Some(key),
            change: ChangeKind::Structural,
            lists,
        });
    }

    /// Upsert a metadata record; structural — derived lists are recomputed
    pub fn apply_metadata(&self, metadata: DownloadedMetadata) {
        let key = metadata.key.clone();
        let lists = {
            let mut inner = self.inner.write().expect("library state poisoned");
            inner.metadata.insert(key.clone(), Arc::new(metadata));
            Self::recompute(&mut inner)
        };
        self.notify(StoreEvent {
            key: Some(key),
            change: ChangeKind::Structural,
            lists,
        });
    }

    /// Update a progress snapshot. Progress cannot change list membership,
    /// so derived lists are deliberately not recomputed.
    pub fn update_progress(&self, progress: DownloadProgress) {
        let key = progress.key.clone();
        let lists = {
            let mut inner = self.inner.write().expect("library state poisoned");
            inner.progress.insert(key.clone(), Arc::new(progress));
            Arc::clone(&inner.derived)
        };
        self.notify(StoreEvent {
            key: Some(key),
            change: ChangeKind::Progress,
            lists,
        });
    }

    /// Drop every record for a key; structural
    pub fn remove(&self, key: &GlobalKey) {
        let lists = {
            let mut inner = self.inner.write().expect("library state poisoned");
            inner.media.remove(key);
            inner.metadata.remove(key);
            inner.progress.remove(key);
            Self::recompute(&mut inner)
        };
        self.memo
            .lock()
            .expect("memo cache poisoned")
            .remove(key);
        self.notify(StoreEvent {
            key: Some(key.clone()),
            change: ChangeKind::Structural,
            lists,
        });
    }

    /// Replace the whole projection, used for startup reconciliation
    pub fn replace_all(
        &self,
        media: Vec<DownloadedMedia>,
        metadata: Vec<DownloadedMetadata>,
        progress: Vec<DownloadProgress>,
    ) {
        let lists = {
            let mut inner = self.inner.write().expect("library state poisoned");
            inner.media = media
                .into_iter()
                .map(|m| (m.key.clone(), Arc::new(m)))
                .collect();
            inner.metadata = metadata
                .into_iter()
                .map(|m| (m.key.clone(), Arc::new(m)))
                .collect();
            inner.progress = progress
                .into_iter()
                .map(|p| (p.key.clone(), Arc::new(p)))
                .collect();
            Self::recompute(&mut inner)
        };
        self.memo.lock().expect("memo cache poisoned").clear();
        self.notify(StoreEvent {
            key: None,
            change: ChangeKind::Structural,
            lists,
        });
    }

    fn recompute(inner: &mut Inner) -> Arc<DerivedLists> {
        let next_revision = inner.derived.revision + 1;
        let derived = Arc::new(compute_derived(
            &inner.media,
            &inner.metadata,
            next_revision,
        ));
        inner.derived = Arc::clone(&derived);
        derived
    }

    // ===== Synchronous getters =====

    pub fn derived(&self) -> Arc<DerivedLists> {
        Arc::clone(&self.inner.read().expect("library state poisoned").derived)
    }

    pub fn derived_revision(&self) -> u64 {
        self.inner
            .read()
            .expect("library state poisoned")
            .derived
            .revision
    }

    pub fn media(&self, key: &GlobalKey) -> Option<Arc<DownloadedMedia>> {
        self.inner
            .read()
            .expect("library state poisoned")
            .media
            .get(key)
            .cloned()
    }

    pub fn metadata(&self, key: &GlobalKey) -> Option<Arc<DownloadedMetadata>> {
        self.inner
            .read()
            .expect("library state poisoned")
            .metadata
            .get(key)
            .cloned()
    }

    pub fn progress(&self, key: &GlobalKey) -> Option<Arc<DownloadProgress>> {
        self.inner
            .read()
            .expect("library state poisoned")
            .progress
            .get(key)
            .cloned()
    }

    pub fn status(&self, key: &GlobalKey) -> Option<DownloadStatus> {
        self.media(key).map(|m| m.status)
    }

    /// Memoized per-key snapshot.
    ///
    /// Returns the identical `Arc` across calls unless one of the underlying
    /// media/metadata/progress references changed (pointer identity, not deep
    /// comparison), so repeated UI reads during a progress storm do not
    /// allocate for untouched keys.
    pub fn item_state(&self, key: &GlobalKey) -> Arc<ItemState> {
        let (media, metadata, progress) = {
            let inner = self.inner.read().expect("library state poisoned");
            (
                inner.media.get(key).cloned(),
                inner.metadata.get(key).cloned(),
                inner.progress.get(key).cloned(),
            )
        };

        let mut memo = self.memo.lock().expect("memo cache poisoned");
        if let Some(cached) = memo.get(key) {
            if same_ref(&cached.media, &media)
                && same_ref(&cached.metadata, &metadata)
                && same_ref(&cached.progress, &progress)
            {
                return Arc::clone(cached);
            }
        }

        let fresh = Arc::new(ItemState {
            media,
            metadata,
            progress,
        });
        memo.insert(key.clone(), Arc::clone(&fresh));
        fresh
    }
}

fn same_ref<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Whether a status keeps an item visible in the derived lists.
///
/// Everything except `cancelled` stays visible: failed items need their retry
/// action and paused items their resume action.
fn is_listed(status: DownloadStatus) -> bool {
    status != DownloadStatus::Cancelled
}

/// Build the derived projections from the source maps.
///
/// Pure and deterministic: identical inputs yield identical outputs. Movies
/// are sorted by completion/queue time descending (key ascending as the
/// tie-break); episodes within a show by (season, episode) ascending; shows
/// by their most recent activity descending.
pub fn compute_derived(
    media: &HashMap<GlobalKey, Arc<DownloadedMedia>>,
    metadata: &HashMap<GlobalKey, Arc<DownloadedMetadata>>,
    revision: u64,
) -> DerivedLists {
    let mut movies = Vec::new();
    let mut shows: HashMap<GlobalKey, ShowDownload> = HashMap::new();

    for (key, item) in media {
        if !is_listed(item.status) {
            continue;
        }
        let Some(meta) = metadata.get(key) else {
            continue;
        };

        match item.kind {
            MediaKind::Movie => movies.push(MovieDownload {
                key: key.clone(),
                title: meta.title.clone(),
                year: meta.year,
                status: item.status,
                sort_time: item.sort_time(),
            }),
            MediaKind::Episode => {
                let Some(show_key) = meta.grandparent_key.clone() else {
                    continue;
                };
                let (Some(season), Some(episode)) = (meta.season, meta.episode) else {
                    continue;
                };

                let entry = shows.entry(show_key.clone()).or_insert_with(|| ShowDownload {
                    key: show_key,
                    title: meta.show_title.clone().unwrap_or_else(|| meta.title.clone()),
                    year: meta.show_year,
                    episodes: Vec::new(),
                    downloaded_count: 0,
                    sort_time: item.sort_time(),
                });

                if item.status == DownloadStatus::Completed {
                    entry.downloaded_count += 1;
                }
                if item.sort_time() > entry.sort_time {
                    entry.sort_time = item.sort_time();
                }
                entry.episodes.push(EpisodeDownload {
                    key: key.clone(),
                    title: meta.title.clone(),
                    season,
                    episode,
                    status: item.status,
                });
            }
        }
    }

    movies.sort_by(|a, b| {
        b.sort_time
            .cmp(&a.sort_time)
            .then_with(|| a.key.cmp(&b.key))
    });

    let mut shows: Vec<ShowDownload> = shows.into_values().collect();
    for show in &mut shows {
        show.episodes.sort_by(|a, b| {
            (a.season, a.episode, &a.key).cmp(&(b.season, b.episode, &b.key))
        });
    }
    shows.sort_by(|a, b| {
        b.sort_time
            .cmp(&a.sort_time)
            .then_with(|| a.key.cmp(&b.key))
    });

    DerivedLists {
        movies,
        shows,
        revision,
    }
}
