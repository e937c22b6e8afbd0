//! Joins static reference data with aggregated time series.
//!
//! All joins are inner joins: a row with no partner at any step is dropped.
//! Drop counts are logged at debug level since the joins themselves stay silent.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::aggregate::{aggregate, mean_by_date};
use crate::models::{
    AggregatedSeries, Album, Artist, DynamicTable, JoinedArtist, JoinedTrack, MeanPopularity,
    Mode, Track, TrackFeatures,
};
use crate::tables::{DynamicTables, StaticTables};

/// A track merged with its album, artist name and audio features.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTrack {
    pub track_id: String,
    pub original_track_name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_image_medium: Option<String>,
    pub album_release_date: String,
    pub track_spotify_url: Option<String>,
    pub track_preview_url: Option<String>,
    pub tempo: f64,
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub mode: f64,
}

/// The three datasets every view is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Datasets {
    pub tracks: Vec<JoinedTrack>,
    pub artists: Vec<JoinedArtist>,
    pub mean_popularity: Vec<MeanPopularity>,
}

/// Index reference rows by key. The first row wins when a key repeats.
fn index_by<'a, T>(rows: &'a [T], key: impl Fn(&T) -> &str) -> HashMap<&'a str, &'a T> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        index.entry(key(row)).or_insert(row);
    }
    index
}

fn log_dropped(step: &str, before: usize, after: usize) {
    if after < before {
        log::debug!("{step}: {} of {before} rows had no match", before - after);
    }
}

/// Track ⋈ Album ⋈ Artist(id, name) ⋈ TrackFeatures, in track order.
pub fn merge_tracks(
    tracks: &[Track],
    albums: &[Album],
    artists: &[Artist],
    features: &[TrackFeatures],
) -> Vec<MergedTrack> {
    let albums = index_by(albums, |a| a.album_id.as_str());
    let artists = index_by(artists, |a| a.artist_id.as_str());
    let features = index_by(features, |f| f.track_id.as_str());

    let with_album: Vec<(&Track, &Album)> = tracks
        .iter()
        .filter_map(|t| albums.get(t.album_id.as_str()).map(|a| (t, *a)))
        .collect();
    log_dropped("tracks ⋈ albums", tracks.len(), with_album.len());

    let with_artist: Vec<(&Track, &Album, &Artist)> = with_album
        .iter()
        .filter_map(|&(t, al)| artists.get(al.artist_id.as_str()).map(|ar| (t, al, *ar)))
        .collect();
    log_dropped("⋈ artists", with_album.len(), with_artist.len());

    let merged: Vec<MergedTrack> = with_artist
        .iter()
        .filter_map(|&(t, al, ar)| {
            let f = features.get(t.track_id.as_str())?;
            Some(MergedTrack {
                track_id: t.track_id.clone(),
                original_track_name: t.original_track_name.clone(),
                artist_id: ar.artist_id.clone(),
                artist_name: ar.artist_name.clone(),
                album_image_medium: al.album_image_medium.clone(),
                album_release_date: al.album_release_date.clone(),
                track_spotify_url: t.track_spotify_url.clone(),
                track_preview_url: t.track_preview_url.clone(),
                tempo: f.tempo,
                energy: f.energy,
                valence: f.valence,
                danceability: f.danceability,
                acousticness: f.acousticness,
                instrumentalness: f.instrumentalness,
                mode: f.mode,
            })
        })
        .collect();
    log_dropped("⋈ features", with_artist.len(), merged.len());

    merged
}

/// Min-max scale `tempo` over the merged rows to [0, 1]. All-equal tempi scale to 0.
fn tempo_scaler(rows: &[MergedTrack]) -> impl Fn(f64) -> f64 {
    let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
        (lo.min(r.tempo), hi.max(r.tempo))
    });
    let span = max - min;
    move |tempo| if span > 0.0 { (tempo - min) / span } else { 0.0 }
}

/// Whether `candidate` should replace `incumbent` as the kept catalog version.
///
/// Highest current popularity wins; ties go to the earliest release date,
/// then the smallest track id.
fn preferred(candidate: &JoinedTrack, incumbent: &JoinedTrack) -> bool {
    candidate
        .current_track_popularity
        .cmp(&incumbent.current_track_popularity)
        .then_with(|| incumbent.album_release_date.cmp(&candidate.album_release_date))
        .then_with(|| incumbent.track_id.cmp(&candidate.track_id))
        == Ordering::Greater
}

/// Attach popularity series, derive mode label and scaled tempo, and keep one
/// version per (artist name, track name). Output is ordered by that pair.
pub fn join_tracks(
    merged: &[MergedTrack],
    popularity: &BTreeMap<String, AggregatedSeries>,
) -> Vec<JoinedTrack> {
    let scale = tempo_scaler(merged);

    let mut kept: BTreeMap<(String, String), JoinedTrack> = BTreeMap::new();
    let mut matched = 0;
    for m in merged {
        let Some(series) = popularity.get(&m.track_id) else {
            continue;
        };
        matched += 1;

        let candidate = JoinedTrack {
            track_id: m.track_id.clone(),
            original_track_name: m.original_track_name.clone(),
            artist_name: m.artist_name.clone(),
            album_image_medium: m.album_image_medium.clone(),
            current_track_popularity: series.current,
            track_popularity_list: series.values.clone(),
            date_track_popularity_list: series.points.clone(),
            track_spotify_url: m.track_spotify_url.clone(),
            track_preview_url: m.track_preview_url.clone(),
            album_release_date: m.album_release_date.clone(),
            acousticness: m.acousticness,
            danceability: m.danceability,
            energy: m.energy,
            instrumentalness: m.instrumentalness,
            valence: m.valence,
            tempo: m.tempo,
            mode: Mode::from_flag(m.mode),
            tempo_scaled: scale(m.tempo),
        };

        let key = (m.artist_name.clone(), m.original_track_name.clone());
        let replace = kept
            .get(&key)
            .is_none_or(|incumbent| preferred(&candidate, incumbent));
        if replace {
            kept.insert(key, candidate);
        }
    }
    log_dropped("⋈ track popularity", merged.len(), matched);
    log::debug!("{matched} track versions collapsed to {}", kept.len());

    kept.into_values().collect()
}

/// Artist ⋈ popularity series ⋈ followers series, in artist order.
pub fn join_artists(
    artists: &[Artist],
    popularity: &BTreeMap<String, AggregatedSeries>,
    followers: &BTreeMap<String, AggregatedSeries>,
) -> Vec<JoinedArtist> {
    let joined: Vec<JoinedArtist> = artists
        .iter()
        .filter_map(|a| {
            let pop = popularity.get(&a.artist_id)?;
            let fol = followers.get(&a.artist_id)?;
            Some(JoinedArtist {
                artist_id: a.artist_id.clone(),
                artist_name: a.artist_name.clone(),
                artist_image_medium: a.artist_image_medium.clone(),
                artist_url: a.artist_url.clone(),
                artist_popularity_list: pop.values.clone(),
                date_artist_popularity_list: pop.points.clone(),
                followers_list: fol.values.clone(),
                date_followers_list: fol.points.clone(),
                current_artist_popularity: pop.current,
                current_followers: fol.current,
            })
        })
        .collect();
    log_dropped("artists ⋈ series", artists.len(), joined.len());
    joined
}

/// Build every dataset from scratch.
pub fn build_datasets(statics: &StaticTables, dynamic: &DynamicTables) -> Datasets {
    let merged = merge_tracks(
        &statics.tracks,
        &statics.albums,
        &statics.artists,
        &statics.features,
    );
    let track_popularity = dynamic.get(DynamicTable::TrackPopularity);
    let tracks = join_tracks(&merged, &aggregate(track_popularity));

    let artists = join_artists(
        &statics.artists,
        &aggregate(dynamic.get(DynamicTable::ArtistPopularity)),
        &aggregate(dynamic.get(DynamicTable::ArtistFollowers)),
    );

    log::info!(
        "Built datasets: {} tracks, {} artists",
        tracks.len(),
        artists.len()
    );

    Datasets {
        tracks,
        artists,
        mean_popularity: mean_by_date(track_popularity),
    }
}
