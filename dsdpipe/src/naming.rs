//! Sink-side filename policy: sanitisation, the track and album naming
//! shapes, and collision-free path probing.

use std::path::{Path, PathBuf};

use dsdmeta::{AlbumInfo, TrackInfo};

use crate::options::{AlbumDirPolicy, TrackFilenamePolicy};

/// Replace everything a filesystem might object to.
pub fn sanitise_component(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').to_string();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed
    }
}

/// File stem for one track under a naming policy.
pub fn track_file_stem(
    policy: TrackFilenamePolicy,
    track: &TrackInfo,
    album: &AlbumInfo,
) -> String {
    let number = format!("{:02}", track.number);
    let title = track.title.as_deref().unwrap_or("Unknown Title");
    let artist = track
        .performer
        .as_deref()
        .or(album.artist.as_deref())
        .unwrap_or("Unknown Artist");
    let stem = match policy {
        TrackFilenamePolicy::NumberOnly => number,
        TrackFilenamePolicy::NumberTitle => format!("{number} - {title}"),
        TrackFilenamePolicy::NumberArtistTitle => format!("{number} - {artist} - {title}"),
    };
    sanitise_component(&stem)
}

/// Directory name for the album under a naming policy.
pub fn album_dir_name(policy: AlbumDirPolicy, album: &AlbumInfo) -> String {
    let title = album.title.as_deref().unwrap_or("Unknown Album");
    let name = match policy {
        AlbumDirPolicy::TitleOnly => title.to_string(),
        AlbumDirPolicy::ArtistTitle => {
            let artist = album.artist.as_deref().unwrap_or("Unknown Artist");
            format!("{artist} - {title}")
        }
    };
    sanitise_component(&name)
}

/// First non-colliding path for `stem.ext` in `dir`, probing
/// `" (1)", " (2)", …` suffixes.
pub fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    for n in 1.. {
        let candidate = dir.join(format!("{stem} ({n}).{extension}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}
