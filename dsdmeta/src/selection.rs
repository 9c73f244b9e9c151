use crate::MetadataError;

/// A sorted, de-duplicated list of 1-based track indices.
///
/// Parsed from the grammar `"all" | range ("," range)*` with
/// `range := N | N "-" M`. Reversed ranges are normalised, so `"5-1"`
/// selects tracks 1 through 5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSelection {
    tracks: Vec<u32>,
}

impl TrackSelection {
    /// Select every track of a source with `track_count` tracks.
    pub fn all(track_count: u32) -> Self {
        TrackSelection {
            tracks: (1..=track_count).collect(),
        }
    }

    /// Parse a selection string against a source with `track_count` tracks.
    ///
    /// Indices are 1-based; `0` or anything above `track_count` is an error.
    pub fn parse(input: &str, track_count: u32) -> Result<Self, MetadataError> {
        let invalid = |reason: &str| MetadataError::InvalidSelection {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty selection"));
        }
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::all(track_count));
        }

        let mut tracks = Vec::new();
        for range in trimmed.split(',') {
            let range = range.trim();
            let (lo, hi) = match range.split_once('-') {
                Some((a, b)) => {
                    let a = parse_index(a).ok_or_else(|| invalid("malformed range bound"))?;
                    let b = parse_index(b).ok_or_else(|| invalid("malformed range bound"))?;
                    (a.min(b), a.max(b))
                }
                None => {
                    let n = parse_index(range).ok_or_else(|| invalid("malformed track index"))?;
                    (n, n)
                }
            };
            if lo == 0 {
                return Err(invalid("track indices are 1-based"));
            }
            if hi > track_count {
                return Err(invalid("track index exceeds track count"));
            }
            tracks.extend(lo..=hi);
        }

        tracks.sort_unstable();
        tracks.dedup();
        Ok(TrackSelection { tracks })
    }

    pub fn tracks(&self) -> &[u32] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.tracks.iter().copied()
    }
}

fn parse_index(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_selects_every_track() {
        let sel = TrackSelection::parse("all", 4).unwrap();
        assert_eq!(sel.tracks(), &[1, 2, 3, 4]);
    }

    #[test]
    fn ranges_normalise_and_dedup() {
        let sel = TrackSelection::parse("5-1", 8).unwrap();
        assert_eq!(sel.tracks(), &[1, 2, 3, 4, 5]);

        let sel = TrackSelection::parse("3,1-2,2,7", 8).unwrap();
        assert_eq!(sel.tracks(), &[1, 2, 3, 7]);
    }

    #[test]
    fn zero_and_out_of_range_rejected() {
        assert!(TrackSelection::parse("0", 4).is_err());
        assert!(TrackSelection::parse("5", 4).is_err());
        assert!(TrackSelection::parse("1-9", 4).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(TrackSelection::parse("", 4).is_err());
        assert!(TrackSelection::parse("1,,2", 4).is_err());
        assert!(TrackSelection::parse("one", 4).is_err());
        assert!(TrackSelection::parse("1-2-3", 4).is_err());
    }
}
