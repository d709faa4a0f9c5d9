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


//! Deterministic path derivation for downloaded media
//!
//! # Layout
//! - Movies: `Downloads/Movies/{title} ({year})/{title}.{ext}`
//! - Episodes: `Downloads/TV Shows/{show} ({year})/Season {NN}/S{NN}E{NN} - {title}.{ext}`
//! - Artwork pool: `artwork/{sha256(serverId + imageRef)}.{ext}`
//!
//! Free-text components are sanitized (path-breaking characters stripped,
//! whitespace collapsed, length capped) so every derived name is
//! filesystem-legal. Derivation is pure; the same inputs always produce the
//! same relative path, which is what makes the artwork pool deduplicate.

use crate::download::types::{DownloadedMetadata, MediaKind};
use crate::error::{OfflineError, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Byte cap for a single sanitized component
const MAX_COMPONENT_LENGTH: usize = 120;

/// Characters that break paths on at least one supported filesystem
const INVALID_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Sanitize one free-text path component.
///
/// Strips path-breaking and control characters, collapses whitespace runs,
/// trims surrounding whitespace and trailing dots, and caps the length at a
/// UTF-8 boundary. Never returns an empty string.
pub fn sanitize_component(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !INVALID_CHARS.contains(c) && !c.is_control())
        .collect();

    let ws = Regex::new(r"\s+").unwrap();
    let collapsed = ws.replace_all(stripped.trim(), " ");
    let mut result = collapsed.trim_end_matches('.').trim().to_string();

    result = truncate_component(&result, MAX_COMPONENT_LENGTH);

    if result.is_empty() {
        result = "Untitled".to_string();
    }

    result
}

/// Truncate to a byte limit at a valid UTF-8 boundary
fn truncate_component(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut index = max_bytes;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }

    text[..index].trim_end().to_string()
}

/// Directory name `{title} ({year})`, or just the title when no year is known
fn titled_dir(title: &str, year: Option<u32>) -> String {
    let title = sanitize_component(title);
    match year {
        Some(year) => format!("{title} ({year})"),
        None => title,
    }
}

/// Relative path for a movie file
pub fn movie_path(title: &str, year: Option<u32>, ext: &str) -> PathBuf {
    let mut path = PathBuf::from("Downloads");
    path.push("Movies");
    path.push(titled_dir(title, year));
    path.push(format!("{}.{}", sanitize_component(title), ext));
    path
}

/// Relative path for an episode file
pub fn episode_path(
    show_title: &str,
    show_year: Option<u32>,
    season: u32,
    episode: u32,
    episode_title: &str,
    ext: &str,
) -> PathBuf {
    let mut path = PathBuf::from("Downloads");
    path.push("TV Shows");
    path.push(titled_dir(show_title, show_year));
    path.push(format!("Season {season:02}"));
    path.push(format!(
        "S{season:02}E{episode:02} - {}.{}",
        sanitize_component(episode_title),
        ext
    ));
    path
}

/// Relative path for the metadata record's video file
pub fn media_path(metadata: &DownloadedMetadata, ext: &str) -> Result<PathBuf> {
    match metadata.kind {
        MediaKind::Movie => Ok(movie_path(&metadata.title, metadata.year, ext)),
        MediaKind::Episode => {
            let show = metadata.show_title.as_deref().ok_or_else(|| {
                OfflineError::InvalidInput(format!("Episode {} has no show title", metadata.key))
            })?;
            let (season, episode) = match (metadata.season, metadata.episode) {
                (Some(s), Some(e)) => (s, e),
                _ => {
                    return Err(OfflineError::InvalidInput(format!(
                        "Episode {} has no season/episode numbering",
                        metadata.key
                    )))
                }
            };
            Ok(episode_path(
                show,
                metadata.show_year,
                season,
                episode,
                &metadata.title,
                ext,
            ))
        }
    }
}

/// Relative path in the shared artwork pool.
///
/// Keyed by a hash of server id and source image reference, so two catalog
/// entries pointing at the same source image resolve to the same local file.
pub fn artwork_path(server_id: &str, image_ref: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(server_id.as_bytes());
    hasher.update(image_ref.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let ext = image_ref
        .rsplit('.')
        .next()
        .filter(|ext| ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("jpg");

    let mut path = PathBuf::from("artwork");
    path.push(format!("{digest}.{ext}"));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::types::GlobalKey;

    #[test]
    fn sanitize_strips_path_breaking_chars() {
        assert_eq!(sanitize_component("Mission: Impossible"), "Mission Impossible");
        assert_eq!(sanitize_component("What/If?"), "WhatIf");
        assert_eq!(sanitize_component("a<b>c|d*e"), "abcde");
    }

    #[test]
    fn sanitize_collapses_whitespace_and_trims() {
        assert_eq!(sanitize_component("  The   Show \t Title "), "The Show Title");
        assert_eq!(sanitize_component("Ends with dots..."), "Ends with dots");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_component("???"), "Untitled");
        assert_eq!(sanitize_component("   "), "Untitled");
    }

    #[test]
    fn sanitize_caps_length_at_char_boundary() {
        let long = "ü".repeat(200);
        let result = sanitize_component(&long);
        assert!(result.len() <= 120);
        assert!(result.chars().all(|c| c == 'ü'));
    }

    #[test]
    fn movie_path_layout() {
        let path = movie_path("Dune", Some(2021), "mp4");
        assert_eq!(
            path,
            PathBuf::from("Downloads/Movies/Dune (2021)/Dune.mp4")
        );
    }

    #[test]
    fn episode_path_layout_zero_pads() {
        let path = episode_path("Show X", Some(2020), 1, 2, "Second Episode", "mkv");
        assert_eq!(
            path,
            PathBuf::from("Downloads/TV Shows/Show X (2020)/Season 01/S01E02 - Second Episode.mkv")
        );
    }

    #[test]
    fn media_path_requires_episode_numbering() {
        let mut metadata = DownloadedMetadata {
            key: GlobalKey::new("srv", "1"),
            kind: MediaKind::Episode,
            title: "Pilot".to_string(),
            year: None,
            summary: None,
            image_ref: None,
            artwork_file: None,
            show_title: Some("Show X".to_string()),
            show_year: Some(2020),
            grandparent_key: None,
            season: None,
            episode: Some(1),
            duration_ms: None,
            playback_offset_ms: 0,
            has_chapter_markers: false,
        };
        assert!(media_path(&metadata, "mp4").is_err());

        metadata.season = Some(1);
        let path = media_path(&metadata, "mp4").unwrap();
        assert!(path.ends_with("Season 01/S01E01 - Pilot.mp4"));
    }

    #[test]
    fn artwork_path_is_deterministic_per_source_image() {
        let a = artwork_path("srv1", "/library/metadata/1/thumb/42.jpg");
        let b = artwork_path("srv1", "/library/metadata/1/thumb/42.jpg");
        let c = artwork_path("srv2", "/library/metadata/1/thumb/42.jpg");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string_lossy().ends_with(".jpg"));
        assert!(a.starts_with("artwork"));
    }

    #[test]
    fn artwork_path_defaults_extension() {
        let path = artwork_path("srv1", "/library/metadata/1/thumb/42");
        assert!(path.to_string_lossy().ends_with(".jpg"));
    }
}
