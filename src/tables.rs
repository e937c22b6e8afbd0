//! Flat-file table loading.
//!
//! Every table lives in `<data_dir>/<name>.csv` with a header row. Static
//! tables deserialize straight into their records; dynamic tables are read
//! column-by-name into [`Observation`]s so each table can keep its own
//! column naming.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{
    Album, Artist, ClusterAssignment, DynamicTable, Observation, StaticTable, Track,
    TrackFeatures,
};

/// File stem of the pre-computed cluster assignments.
pub const CLUSTERS_TABLE: &str = "tracks_clustered";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: missing column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("{path} row {row}: unrecognised date '{value}'")]
    BadDate {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("{path} row {row}: non-integer value '{value}'")]
    BadValue {
        path: PathBuf,
        row: usize,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, TableError>;

/// Path of a table inside the data directory.
pub fn table_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.csv"))
}

/// Read a whole CSV table into typed records. Unknown columns are ignored.
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let csv_err = |source| TableError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(csv_err)
}

/// Boundary form of [`read_table`]: logs the failure and returns `None`.
pub fn load_table<T: DeserializeOwned>(dir: &Path, name: &str) -> Option<Vec<T>> {
    let path = table_path(dir, name);
    match read_table(&path) {
        Ok(rows) => {
            log::debug!("Loaded {} rows from {}", rows.len(), path.display());
            Some(rows)
        }
        Err(e) => {
            log::warn!("Could not load table {name}: {e}");
            None
        }
    }
}

/// Read a dynamic table, resolving its entity-key, `date` and value columns by name.
pub fn read_observations(path: &Path, table: DynamicTable) -> Result<Vec<Observation>> {
    let csv_err = |source| TableError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();

    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| TableError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })
    };
    let key_idx = column(table.key_column())?;
    let date_idx = column("date")?;
    let value_idx = column(table.value_column())?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        // Header is line 1.
        let row = i + 2;

        let raw_date = record.get(date_idx).unwrap_or("");
        let date = parse_date(raw_date).ok_or_else(|| TableError::BadDate {
            path: path.to_path_buf(),
            row,
            value: raw_date.to_string(),
        })?;

        let raw_value = record.get(value_idx).unwrap_or("");
        let value = parse_value(raw_value).ok_or_else(|| TableError::BadValue {
            path: path.to_path_buf(),
            row,
            value: raw_value.to_string(),
        })?;

        let entity_id = record.get(key_idx).unwrap_or("").trim().to_string();
        rows.push(Observation {
            entity_id,
            date,
            value,
        });
    }

    Ok(rows)
}

/// Boundary form of [`read_observations`].
pub fn load_observations(dir: &Path, table: DynamicTable) -> Option<Vec<Observation>> {
    let path = table_path(dir, table.name());
    match read_observations(&path, table) {
        Ok(rows) => {
            log::debug!("Loaded {} observations from {}", rows.len(), path.display());
            Some(rows)
        }
        Err(e) => {
            log::warn!("Could not load table {table}: {e}");
            None
        }
    }
}

/// Overwrite a dynamic table's CSV with `rows`.
///
/// Writes to a sibling temp file and renames it over the target, so a failed
/// write never leaves a truncated table behind.
pub fn write_observations(path: &Path, table: DynamicTable, rows: &[Observation]) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    let csv_err = |source| TableError::Csv {
        path: tmp.clone(),
        source,
    };

    let mut writer = csv::Writer::from_path(&tmp).map_err(csv_err)?;
    writer
        .write_record([table.key_column(), "date", table.value_column()])
        .map_err(csv_err)?;
    for o in rows {
        let date = o.date.format("%Y-%m-%d").to_string();
        let value = o.value.to_string();
        writer
            .write_record([o.entity_id.as_str(), date.as_str(), value.as_str()])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(writer);

    std::fs::rename(&tmp, path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Normalize a date cell to a calendar date.
/// Handles: "2024-01-05", "2024-01-05 00:00:00", "2024-01-05T00:00:00.000", "2024-01-05T00:00:00Z"
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Parse an integer metric. Integral floats ("70.0") are accepted.
pub fn parse_value(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

/// The four reference tables.
#[derive(Debug, Clone)]
pub struct StaticTables {
    pub tracks: Vec<Track>,
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
    pub features: Vec<TrackFeatures>,
}

impl StaticTables {
    /// Load every reference table. On failure, names the first table that could not be read.
    pub fn load(dir: &Path) -> std::result::Result<Self, StaticTable> {
        Ok(Self {
            tracks: load_table(dir, StaticTable::Tracks.name()).ok_or(StaticTable::Tracks)?,
            albums: load_table(dir, StaticTable::Albums.name()).ok_or(StaticTable::Albums)?,
            artists: load_table(dir, StaticTable::Artists.name()).ok_or(StaticTable::Artists)?,
            features: load_table(dir, StaticTable::TrackFeatures.name())
                .ok_or(StaticTable::TrackFeatures)?,
        })
    }
}

/// The dynamic observation tables, keyed by table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicTables {
    tables: BTreeMap<DynamicTable, Vec<Observation>>,
}

impl DynamicTables {
    /// Load every dynamic table. Unreadable tables start empty so a sync can rebuild them.
    pub fn load(dir: &Path) -> Self {
        let mut tables = Self::default();
        for table in DynamicTable::ALL {
            tables.insert(table, load_observations(dir, table).unwrap_or_default());
        }
        tables
    }

    pub fn get(&self, table: DynamicTable) -> &[Observation] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn insert(&mut self, table: DynamicTable, rows: Vec<Observation>) {
        self.tables.insert(table, rows);
    }

    /// Remove a table's rows, leaving it empty.
    pub fn take(&mut self, table: DynamicTable) -> Vec<Observation> {
        self.tables.remove(&table).unwrap_or_default()
    }
}

/// Load `tracks_clustered.csv`.
pub fn load_cluster_assignments(dir: &Path) -> Option<Vec<ClusterAssignment>> {
    load_table(dir, CLUSTERS_TABLE)
}

/// Write a CSV fixture file; used by tests across the crate.
#[cfg(test)]
pub(crate) fn write_fixture(dir: &Path, name: &str, contents: &str) -> PathBuf {
    use std::io::Write;

    let path = table_path(dir, name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-01-05"), Some(d("2024-01-05")));
        assert_eq!(parse_date(" 2024-01-05 00:00:00 "), Some(d("2024-01-05")));
        assert_eq!(parse_date("2024-01-05 13:45:10.123"), Some(d("2024-01-05")));
        assert_eq!(parse_date("2024-01-05T00:00:00"), Some(d("2024-01-05")));
        assert_eq!(parse_date("2024-01-05T23:00:00+00:00"), Some(d("2024-01-05")));
        assert_eq!(parse_date("05/01/2024"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("70"), Some(70));
        assert_eq!(parse_value("70.0"), Some(70));
        assert_eq!(parse_value(" 1234567 "), Some(1234567));
        assert_eq!(parse_value("70.5"), None);
        assert_eq!(parse_value("NaN"), None);
        assert_eq!(parse_value(""), None);
    }

    #[test]
    fn test_read_observations_by_column_name() {
        let dir = tempfile::tempdir().unwrap();
        // Column order differs from the canonical one and carries an extra column.
        let path = write_fixture(
            dir.path(),
            "artists_followers_table",
            "date,followers,artist_id,source\n\
             2024-01-01,1000,A1,api\n\
             2024-01-02 00:00:00,1100.0,A1,api\n",
        );

        let rows = read_observations(&path, DynamicTable::ArtistFollowers).unwrap();
        assert_eq!(
            rows,
            vec![
                Observation::new("A1", d("2024-01-01"), 1000),
                Observation::new("A1", d("2024-01-02"), 1100),
            ]
        );
    }

    #[test]
    fn test_read_observations_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "tracks_popularity_table",
            "track_id,date,popularity\nT1,2024-01-01,10\n",
        );

        let err = read_observations(&path, DynamicTable::TrackPopularity).unwrap_err();
        assert!(matches!(
            err,
            TableError::MissingColumn { column: "track_popularity", .. }
        ));
    }

    #[test]
    fn test_read_observations_bad_date_reports_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "tracks_popularity_table",
            "track_id,date,track_popularity\nT1,2024-01-01,10\nT1,yesterday,11\n",
        );

        match read_observations(&path, DynamicTable::TrackPopularity).unwrap_err() {
            TableError::BadDate { row, value, .. } => {
                assert_eq!(row, 3);
                assert_eq!(value, "yesterday");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_write_observations_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "tracks_popularity_table",
            "track_id,date,track_popularity\nT1,2024-01-01 00:00:00,10\n",
        );
        let rows = vec![
            Observation::new("T1", d("2024-01-01"), 10),
            Observation::new("T1", d("2024-01-02"), 12),
        ];

        write_observations(&path, DynamicTable::TrackPopularity, &rows).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "track_id,date,track_popularity\nT1,2024-01-01,10\nT1,2024-01-02,12\n"
        );
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_load_table_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_table::<Track>(dir.path(), "tracks_table").is_none());
        assert!(load_observations(dir.path(), DynamicTable::AlbumPopularity).is_none());
    }

    #[test]
    fn test_static_tables_ignore_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(
            dir.path(),
            "tracks_table",
            "track_id,original_track_name,track_name,album_id,track_spotify_url,track_preview_url\n\
             T1,Song,song,AL1,https://open.spotify.com/track/T1,\n",
        );
        write_fixture(
            dir.path(),
            "albums_table",
            "album_id,artist_id,album_name,album_release_date,album_image_medium\nAL1,AR1,Album,1977-05-08,img\n",
        );
        write_fixture(dir.path(), "artists_table", "artist_id,artist_name\nAR1,Band\n");

        // Features missing: load names the failing table.
        assert_eq!(
            StaticTables::load(dir.path()).unwrap_err(),
            StaticTable::TrackFeatures
        );

        write_fixture(
            dir.path(),
            "tracks_features_table",
            "track_id,tempo,energy,valence,danceability,acousticness,instrumentalness,mode,loudness\n\
             T1,120.5,0.8,0.4,0.5,0.1,0.0,1,-5.2\n",
        );
        let tables = StaticTables::load(dir.path()).unwrap();
        assert_eq!(tables.tracks.len(), 1);
        assert_eq!(tables.tracks[0].track_preview_url, None);
        assert_eq!(tables.albums[0].album_image_large, None);
        assert_eq!(tables.features[0].mode, 1.0);
    }

    #[test]
    fn test_artist_artwork_and_link_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(
            dir.path(),
            "artists_table",
            "artist_id,artist_name,artist_image_medium,artist_url\n\
             AR1,Band,https://i.scdn.co/image/ar1,https://open.spotify.com/artist/AR1\n\
             AR2,Other,,\n",
        );
        let artists: Vec<Artist> = load_table(dir.path(), "artists_table").unwrap();
        assert_eq!(
            artists[0].artist_image_medium.as_deref(),
            Some("https://i.scdn.co/image/ar1")
        );
        assert_eq!(
            artists[0].artist_url.as_deref(),
            Some("https://open.spotify.com/artist/AR1")
        );
        assert_eq!(artists[1].artist_url, None);

        // Older exports used different names for the same columns.
        write_fixture(
            dir.path(),
            "artists_table",
            "artist_id,artist_name,artist_image,artist_spotify_url\nAR1,Band,img,url\n",
        );
        let artists: Vec<Artist> = load_table(dir.path(), "artists_table").unwrap();
        assert_eq!(artists[0].artist_image_medium.as_deref(), Some("img"));
        assert_eq!(artists[0].artist_url.as_deref(), Some("url"));
    }

    #[test]
    fn test_dynamic_tables_missing_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(
            dir.path(),
            "tracks_popularity_table",
            "track_id,date,track_popularity\nT1,2024-01-01,10\n",
        );

        let tables = DynamicTables::load(dir.path());
        assert_eq!(tables.get(DynamicTable::TrackPopularity).len(), 1);
        assert!(tables.get(DynamicTable::ArtistFollowers).is_empty());
    }
}
