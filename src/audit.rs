//! Detection of scrobbles with missing artist or album metadata.
//!
//! Problems are grouped per track so a track scrobbled a hundred times without
//! an album shows up once, with its count, instead of a hundred times.

use crate::types::ScrobbleRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

const MUSIC_URL_PREFIX: &str = "https://www.last.fm/music/";

/// Which metadata fields of a scrobble are missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissingFields {
    pub artist: bool,
    pub album: bool,
}

impl MissingFields {
    pub fn any(&self) -> bool {
        self.artist || self.album
    }

    /// Column labels for the missing fields, artist first.
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.artist {
            labels.push("Artist");
        }
        if self.album {
            labels.push("Album");
        }
        labels
    }
}

impl std::fmt::Display for MissingFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.labels().join(", "))
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl ScrobbleRecord {
    /// Missing-field flags; whitespace-only text counts as missing.
    pub fn missing_fields(&self) -> MissingFields {
        MissingFields {
            artist: is_blank(&self.artist),
            album: is_blank(&self.album),
        }
    }
}

/// A track with missing metadata and how often it was scrobbled that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemTrack {
    /// First scrobble seen for this track, i.e. the most recent one
    pub scrobble: ScrobbleRecord,
    /// Number of scrobbles sharing the track name and artist text
    pub count: usize,
    /// Fields missing on the representative scrobble
    pub missing: MissingFields,
}

impl ProblemTrack {
    /// Link to the track in the user's own library, where Last.fm offers editing.
    ///
    /// URLs outside `https://www.last.fm/music/` are returned unchanged.
    pub fn library_edit_url(&self, username: &str) -> String {
        match self.scrobble.url.strip_prefix(MUSIC_URL_PREFIX) {
            Some(rest) => format!(
                "https://www.last.fm/user/{}/library/music/{rest}",
                urlencoding::encode(username)
            ),
            None => self.scrobble.url.clone(),
        }
    }
}

/// Case-insensitive ordering, falling back to exact text for a stable order.
fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Find scrobbles with a blank artist or album, grouped per track.
///
/// Scrobbles are grouped by track name and artist text. Groups are ordered by
/// scrobble count (highest first), then artist, then album, ignoring case.
pub fn find_problem_tracks(scrobbles: &[ScrobbleRecord]) -> Vec<ProblemTrack> {
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    let mut problems: Vec<ProblemTrack> = Vec::new();

    for scrobble in scrobbles {
        let missing = scrobble.missing_fields();
        if !missing.any() {
            continue;
        }

        let key = (scrobble.name.as_str(), scrobble.artist.as_str());
        match index.get(&key) {
            Some(&i) => problems[i].count += 1,
            None => {
                index.insert(key, problems.len());
                problems.push(ProblemTrack {
                    scrobble: scrobble.clone(),
                    count: 1,
                    missing,
                });
            }
        }
    }

    problems.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| compare_text(&a.scrobble.artist, &b.scrobble.artist))
            .then_with(|| compare_text(&a.scrobble.album, &b.scrobble.album))
    });

    log::debug!(
        "Found {} problem tracks in {} scrobbles",
        problems.len(),
        scrobbles.len()
    );

    problems
}

/// Totals shown once a fetch completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_scrobbles: usize,
    /// Number of problem tracks (groups, not scrobbles)
    pub issues: usize,
    pub missing_artist: usize,
    pub missing_album: usize,
}

impl AuditSummary {
    pub fn from_records(scrobbles: &[ScrobbleRecord]) -> Self {
        let problems = find_problem_tracks(scrobbles);
        Self {
            total_scrobbles: scrobbles.len(),
            issues: problems.len(),
            missing_artist: problems.iter().filter(|p| p.missing.artist).count(),
            missing_album: problems.iter().filter(|p| p.missing.album).count(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.issues == 0
    }
}
