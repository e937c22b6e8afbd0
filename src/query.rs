//! Filtering and ranking over the joined datasets.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::models::{JoinedArtist, JoinedTrack};

/// Closed numeric range. A missing end is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Parse `"a..b"`, `"a.."` or `"..b"` into [`Bounds`].
pub fn parse_bounds(s: &str) -> Result<Bounds, String> {
    let (lo, hi) = s
        .split_once("..")
        .ok_or_else(|| format!("expected a range like 0.2..0.8, got '{s}'"))?;

    let end = |part: &str| -> Result<Option<f64>, String> {
        let part = part.trim();
        if part.is_empty() {
            return Ok(None);
        }
        part.parse::<f64>()
            .map(Some)
            .map_err(|_| format!("'{part}' is not a number"))
    };

    let bounds = Bounds {
        min: end(lo)?,
        max: end(hi)?,
    };
    if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
        if min > max {
            return Err(format!("range start {min} is after its end {max}"));
        }
    }
    Ok(bounds)
}

/// Release-date window over the raw `album_release_date` strings.
///
/// Dates come at year, month or day precision ("1977", "1977-05", "1977-05-08").
/// `to = "1979"` includes every date within 1979.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseWindow {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl ReleaseWindow {
    pub fn contains(&self, released: &str) -> bool {
        let after = self.from.as_deref().is_none_or(|from| released >= from);
        let before = self
            .to
            .as_deref()
            .is_none_or(|to| released <= to || released.starts_with(to));
        after && before
    }
}

/// Track filters. Defaults accept everything.
#[derive(Debug, Clone, Default)]
pub struct TrackFilter {
    /// Artist names to keep; empty keeps all.
    pub artists: Vec<String>,
    pub popularity: Bounds,
    pub tempo: Bounds,
    pub energy: Bounds,
    pub valence: Bounds,
    pub danceability: Bounds,
    pub acousticness: Bounds,
    pub instrumentalness: Bounds,
    pub released: ReleaseWindow,
}

impl TrackFilter {
    pub fn matches(&self, t: &JoinedTrack) -> bool {
        (self.artists.is_empty() || self.artists.iter().any(|a| *a == t.artist_name))
            && self.popularity.contains(t.current_track_popularity as f64)
            && self.tempo.contains(t.tempo)
            && self.energy.contains(t.energy)
            && self.valence.contains(t.valence)
            && self.danceability.contains(t.danceability)
            && self.acousticness.contains(t.acousticness)
            && self.instrumentalness.contains(t.instrumentalness)
            && self.released.contains(&t.album_release_date)
    }

    pub fn apply<'a>(&self, tracks: &'a [JoinedTrack]) -> Vec<&'a JoinedTrack> {
        tracks.iter().filter(|t| self.matches(t)).collect()
    }
}

/// The `n` most popular tracks. Ties keep their input order.
pub fn top_tracks<'a>(filtered: &[&'a JoinedTrack], n: usize) -> Vec<&'a JoinedTrack> {
    let mut sorted = filtered.to_vec();
    sorted.sort_by(|a, b| b.current_track_popularity.cmp(&a.current_track_popularity));
    sorted.truncate(n);
    sorted
}

/// Tracks per artist, most tracks first, then by name.
pub fn artist_track_counts(selected: &[&JoinedTrack]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in selected {
        *counts.entry(t.artist_name.as_str()).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(artist, n)| (artist.to_string(), n))
        .collect();
    // Stable sort keeps name order within equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelativeCount {
    pub artist_name: String,
    pub selected: usize,
    pub total: usize,
    /// `selected / total` as a percentage.
    pub percent: f64,
}

/// Share of each artist's catalog that survived the filters, highest share first.
pub fn relative_track_counts(selected: &[&JoinedTrack], all: &[JoinedTrack]) -> Vec<RelativeCount> {
    let mut totals: HashMap<&str, usize> = HashMap::new();
    for t in all {
        *totals.entry(t.artist_name.as_str()).or_default() += 1;
    }

    let mut relative: Vec<RelativeCount> = artist_track_counts(selected)
        .into_iter()
        .filter_map(|(artist_name, selected)| {
            let total = *totals.get(artist_name.as_str())?;
            Some(RelativeCount {
                percent: selected as f64 / total as f64 * 100.0,
                artist_name,
                selected,
                total,
            })
        })
        .collect();
    relative.sort_by(|a, b| b.percent.total_cmp(&a.percent));
    relative
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ArtistRanking {
    Popularity,
    Followers,
}

/// Artists ranked by their current popularity or follower count, highest first.
pub fn rank_artists(artists: &[JoinedArtist], by: ArtistRanking) -> Vec<&JoinedArtist> {
    let mut ranked: Vec<&JoinedArtist> = artists.iter().collect();
    match by {
        ArtistRanking::Popularity => {
            ranked.sort_by(|a, b| b.current_artist_popularity.cmp(&a.current_artist_popularity))
        }
        ArtistRanking::Followers => {
            ranked.sort_by(|a, b| b.current_followers.cmp(&a.current_followers))
        }
    }
    ranked
}

/// Number of selected tracks per release date, oldest first.
pub fn release_date_histogram(selected: &[&JoinedTrack]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in selected {
        *counts.entry(t.album_release_date.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(date, n)| (date.to_string(), n))
        .collect()
}

/// Find a joined track by id or by case-insensitive name substring.
pub fn find_track<'a>(tracks: &'a [JoinedTrack], needle: &str) -> Option<&'a JoinedTrack> {
    if let Some(t) = tracks.iter().find(|t| t.track_id == needle) {
        return Some(t);
    }
    let needle = needle.to_lowercase();
    tracks
        .iter()
        .filter(|t| t.original_track_name.to_lowercase().contains(&needle))
        .max_by_key(|t| t.current_track_popularity)
}

/// Find a joined artist by id or by case-insensitive name substring.
/// Several name matches resolve to the most popular artist.
pub fn find_artist<'a>(artists: &'a [JoinedArtist], needle: &str) -> Option<&'a JoinedArtist> {
    if let Some(a) = artists.iter().find(|a| a.artist_id == needle) {
        return Some(a);
    }
    let needle = needle.to_lowercase();
    artists
        .iter()
        .filter(|a| a.artist_name.to_lowercase().contains(&needle))
        .max_by_key(|a| a.current_artist_popularity)
}

/// Audio features that can be binned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TrackFeature {
    Acousticness,
    Danceability,
    Energy,
    Instrumentalness,
    Valence,
    Tempo,
}

impl TrackFeature {
    pub fn value(self, t: &JoinedTrack) -> f64 {
        match self {
            TrackFeature::Acousticness => t.acousticness,
            TrackFeature::Danceability => t.danceability,
            TrackFeature::Energy => t.energy,
            TrackFeature::Instrumentalness => t.instrumentalness,
            TrackFeature::Valence => t.valence,
            TrackFeature::Tempo => t.tempo,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrackFeature::Acousticness => "acousticness",
            TrackFeature::Danceability => "danceability",
            TrackFeature::Energy => "energy",
            TrackFeature::Instrumentalness => "instrumentalness",
            TrackFeature::Valence => "valence",
            TrackFeature::Tempo => "tempo",
        }
    }
}

/// One equal-width histogram bin. `end` is exclusive except on the last bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

/// Distribution of one feature over the selected tracks in `bins` equal-width bins
/// spanning the observed minimum to maximum.
///
/// Returns no bins for an empty selection or `bins == 0`. When every value is
/// equal there is a single bin holding all tracks.
pub fn feature_histogram(
    selected: &[&JoinedTrack],
    feature: TrackFeature,
    bins: usize,
) -> Vec<HistogramBin> {
    let values: Vec<f64> = selected
        .iter()
        .map(|t| feature.value(t))
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == min {
        return vec![HistogramBin {
            start: min,
            end: max,
            count: values.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            start: min + width * i as f64,
            end: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();
    for v in values {
        let i = (((v - min) / width) as usize).min(bins - 1);
        histogram[i].count += 1;
    }
    histogram
}
