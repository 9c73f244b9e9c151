//! Minimal ID3v2.3 tag builder for the trailing metadata blob.
//!
//! Only text frames are emitted, Latin-1 encoded, which is what the
//! per-track container's tag slot conventionally carries. Parsing foreign
//! tags is out of scope; existing blobs are preserved as opaque bytes.

use dsdmeta::{AlbumInfo, TrackInfo};

fn syncsafe(len: u32) -> [u8; 4] {
    [
        ((len >> 21) & 0x7F) as u8,
        ((len >> 14) & 0x7F) as u8,
        ((len >> 7) & 0x7F) as u8,
        (len & 0x7F) as u8,
    ]
}

fn push_text_frame(out: &mut Vec<u8>, id: &[u8; 4], text: &str) {
    if text.is_empty() {
        return;
    }
    // Latin-1 with lossy replacement for anything outside it.
    let encoded: Vec<u8> = text
        .chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect();
    out.extend_from_slice(id);
    out.extend_from_slice(&(encoded.len() as u32 + 1).to_be_bytes());
    out.extend_from_slice(&[0, 0]); // flags
    out.push(0); // ISO-8859-1
    out.extend_from_slice(&encoded);
}

/// Build an ID3v2.3 tag from album- and track-scope metadata.
pub fn build_tag(album: &AlbumInfo, track: &TrackInfo) -> Vec<u8> {
    let mut frames = Vec::new();
    if let Some(title) = &track.title {
        push_text_frame(&mut frames, b"TIT2", title);
    }
    if let Some(performer) = track.performer.as_ref().or(album.artist.as_ref()) {
        push_text_frame(&mut frames, b"TPE1", performer);
    }
    if let Some(album_title) = &album.title {
        push_text_frame(&mut frames, b"TALB", album_title);
    }
    if let Some(year) = album.year {
        push_text_frame(&mut frames, b"TYER", &year.to_string());
    }
    if let Some(genre) = &album.genre {
        push_text_frame(&mut frames, b"TCON", genre);
    }
    if let Some(copyright) = &album.copyright {
        push_text_frame(&mut frames, b"TCOP", copyright);
    }
    if let Some(composer) = &track.composer {
        push_text_frame(&mut frames, b"TCOM", composer);
    }
    if let Some(isrc) = &track.isrc {
        push_text_frame(&mut frames, b"TSRC", isrc.as_str());
    }
    if track.number > 0 {
        let text = if track.total > 0 {
            format!("{}/{}", track.number, track.total)
        } else {
            track.number.to_string()
        };
        push_text_frame(&mut frames, b"TRCK", &text);
    }

    let mut tag = Vec::with_capacity(10 + frames.len());
    tag.extend_from_slice(b"ID3");
    tag.extend_from_slice(&[3, 0, 0]); // v2.3.0, no flags
    tag.extend_from_slice(&syncsafe(frames.len() as u32));
    tag.extend_from_slice(&frames);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdmeta::Isrc;

    #[test]
    fn tag_carries_title_and_track_number() {
        let album = AlbumInfo {
            title: Some("Album".into()),
            artist: Some("Artist".into()),
            year: Some(2004),
            ..Default::default()
        };
        let track = TrackInfo {
            title: Some("Song".into()),
            number: 3,
            total: 12,
            isrc: Some(Isrc::new("USRC17607839").unwrap()),
            ..Default::default()
        };

        let tag = build_tag(&album, &track);
        assert_eq!(&tag[..3], b"ID3");
        assert_eq!(tag[3], 3);

        let body = &tag[10..];
        let find = |id: &[u8]| body.windows(4).position(|w| w == id);
        assert!(find(b"TIT2").is_some());
        assert!(find(b"TALB").is_some());
        assert!(find(b"TYER").is_some());
        assert!(find(b"TSRC").is_some());
        let trck = find(b"TRCK").unwrap();
        let text = &body[trck + 11..trck + 11 + 4];
        assert_eq!(text, b"3/12");
    }

    #[test]
    fn empty_metadata_still_yields_a_header() {
        let tag = build_tag(&AlbumInfo::default(), &TrackInfo::default());
        assert_eq!(tag.len(), 10);
    }

    #[test]
    fn syncsafe_size_has_clear_high_bits() {
        let tag = build_tag(
            &AlbumInfo {
                title: Some("x".repeat(300)),
                ..Default::default()
            },
            &TrackInfo::default(),
        );
        for byte in &tag[6..10] {
            assert_eq!(byte & 0x80, 0);
        }
    }
}
