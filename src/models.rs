use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Static reference tables, loaded once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticTable {
    Tracks,
    Albums,
    Artists,
    TrackFeatures,
}

impl StaticTable {
    pub const ALL: [StaticTable; 4] = [
        StaticTable::Tracks,
        StaticTable::Albums,
        StaticTable::Artists,
        StaticTable::TrackFeatures,
    ];

    /// File stem (local) of the table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tracks => "tracks_table",
            Self::Albums => "albums_table",
            Self::Artists => "artists_table",
            Self::TrackFeatures => "tracks_features_table",
        }
    }
}

/// Append-only, date-indexed observation tables synced from the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DynamicTable {
    TrackPopularity,
    AlbumPopularity,
    ArtistPopularity,
    ArtistFollowers,
}

impl DynamicTable {
    /// Sync order. Tables are always processed one at a time in this order.
    pub const ALL: [DynamicTable; 4] = [
        DynamicTable::TrackPopularity,
        DynamicTable::AlbumPopularity,
        DynamicTable::ArtistPopularity,
        DynamicTable::ArtistFollowers,
    ];

    /// Table name, shared by the local CSV file stem and the remote table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TrackPopularity => "tracks_popularity_table",
            Self::AlbumPopularity => "albums_popularity_table",
            Self::ArtistPopularity => "artists_popularity_table",
            Self::ArtistFollowers => "artists_followers_table",
        }
    }

    /// Column holding the entity id.
    pub fn key_column(&self) -> &'static str {
        match self {
            Self::TrackPopularity => "track_id",
            Self::AlbumPopularity => "album_id",
            Self::ArtistPopularity | Self::ArtistFollowers => "artist_id",
        }
    }

    /// Column holding the observed metric.
    pub fn value_column(&self) -> &'static str {
        match self {
            Self::TrackPopularity => "track_popularity",
            Self::AlbumPopularity => "album_popularity",
            Self::ArtistPopularity => "artist_popularity",
            Self::ArtistFollowers => "followers",
        }
    }
}

impl fmt::Display for DynamicTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DynamicTable {
    type Err = String;

    /// Accepts the full table name or a short alias (`tracks`, `albums`, `artists`, `followers`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .or(match s.as_str() {
                "tracks" => Some(Self::TrackPopularity),
                "albums" => Some(Self::AlbumPopularity),
                "artists" => Some(Self::ArtistPopularity),
                "followers" => Some(Self::ArtistFollowers),
                _ => None,
            })
            .ok_or_else(|| format!("unknown dynamic table '{s}'"))
    }
}

/// A catalog track.
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub original_track_name: String,
    pub album_id: String,
    #[serde(default)]
    pub track_spotify_url: Option<String>,
    #[serde(default)]
    pub track_preview_url: Option<String>,
}

/// A catalog album.
#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    pub album_id: String,
    pub artist_id: String,
    /// Year, month or day precision (`1977`, `1977-05`, `1977-05-08`).
    pub album_release_date: String,
    #[serde(default)]
    pub album_image_medium: Option<String>,
    #[serde(default)]
    pub album_image_large: Option<String>,
}

/// A catalog artist.
#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    pub artist_id: String,
    pub artist_name: String,
    #[serde(default, alias = "artist_image")]
    pub artist_image_medium: Option<String>,
    #[serde(default, alias = "artist_spotify_url")]
    pub artist_url: Option<String>,
}

/// Audio features for a track.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackFeatures {
    pub track_id: String,
    pub tempo: f64,
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    /// 1 = major, 0 = minor. Read as a float since exports may write `1.0`.
    pub mode: f64,
}

/// Musical mode label derived from the binary `mode` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn from_flag(flag: f64) -> Self {
        if flag == 1.0 { Self::Major } else { Self::Minor }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
        }
    }
}

/// One row of a dynamic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub entity_id: String,
    pub date: NaiveDate,
    pub value: i64,
}

impl Observation {
    pub fn new(entity_id: impl Into<String>, date: NaiveDate, value: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            date,
            value,
        }
    }
}

/// Per-entity time series built from a dynamic table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedSeries {
    /// (date, value) ascending by date, dates unique.
    pub points: Vec<(NaiveDate, i64)>,
    /// Values of `points`, same order.
    pub values: Vec<i64>,
    /// Chronologically last value.
    pub current: i64,
}

/// A deduplicated track with its static attributes and popularity history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedTrack {
    pub track_id: String,
    pub original_track_name: String,
    pub artist_name: String,
    pub album_image_medium: Option<String>,
    pub current_track_popularity: i64,
    pub track_popularity_list: Vec<i64>,
    pub date_track_popularity_list: Vec<(NaiveDate, i64)>,
    pub track_spotify_url: Option<String>,
    pub track_preview_url: Option<String>,
    pub album_release_date: String,
    pub acousticness: f64,
    pub danceability: f64,
    pub energy: f64,
    pub instrumentalness: f64,
    pub valence: f64,
    pub tempo: f64,
    pub mode: Mode,
    pub tempo_scaled: f64,
}

/// An artist with popularity and follower histories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedArtist {
    pub artist_id: String,
    pub artist_name: String,
    pub artist_image_medium: Option<String>,
    pub artist_url: Option<String>,
    pub artist_popularity_list: Vec<i64>,
    pub date_artist_popularity_list: Vec<(NaiveDate, i64)>,
    pub followers_list: Vec<i64>,
    pub date_followers_list: Vec<(NaiveDate, i64)>,
    pub current_artist_popularity: i64,
    pub current_followers: i64,
}

/// Mean track popularity across the catalog on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanPopularity {
    pub date: NaiveDate,
    pub mean_track_popularity: f64,
}

/// A pre-computed cluster assignment (`tracks_clustered.csv`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterAssignment {
    pub track_id: String,
    pub original_track_name: String,
    pub artist_name: String,
    pub cluster: String,
    pub danceability: f64,
    pub energy: f64,
    pub loudness_scaled: f64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo_scaled: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_table_from_str() {
        assert_eq!(
            "tracks_popularity_table".parse::<DynamicTable>().unwrap(),
            DynamicTable::TrackPopularity
        );
        assert_eq!("Followers".parse::<DynamicTable>().unwrap(), DynamicTable::ArtistFollowers);
        assert!("playlists".parse::<DynamicTable>().is_err());
    }

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(Mode::from_flag(1.0), Mode::Major);
        assert_eq!(Mode::from_flag(0.0), Mode::Minor);
        assert_eq!(Mode::Major.label(), "major");
    }
}
