//! Views over the pre-computed track clusters.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{ClusterAssignment, JoinedTrack, Observation, Track};
use crate::query::Bounds;

/// Number of audio features profiled per cluster.
pub const PROFILE_FEATURES: usize = 9;

/// Feature names in profile order.
pub const FEATURE_NAMES: [&str; PROFILE_FEATURES] = [
    "danceability",
    "energy",
    "loudness_scaled",
    "speechiness",
    "acousticness",
    "instrumentalness",
    "liveness",
    "valence",
    "tempo_scaled",
];

/// A clustered track with its current popularity attached.
#[derive(Debug, Clone, Serialize)]
pub struct ClusteredTrack {
    #[serde(flatten)]
    pub assignment: ClusterAssignment,
    pub current_track_popularity: i64,
}

/// Mean of each profiled feature over one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster: String,
    pub tracks: usize,
    /// Indexed like [`FEATURE_NAMES`].
    pub means: [f64; PROFILE_FEATURES],
}

/// Mean track popularity of one cluster on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterTrendPoint {
    pub date: NaiveDate,
    pub cluster: String,
    pub mean_track_popularity: f64,
}

/// Everything the cluster views need, built once per session.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub clustered: Vec<ClusteredTrack>,
    pub profiles: Vec<ClusterProfile>,
    pub trend: Vec<ClusterTrendPoint>,
}

impl ClusterView {
    pub fn build(
        assignments: &[ClusterAssignment],
        joined: &[JoinedTrack],
        catalog: &[Track],
        track_popularity: &[Observation],
    ) -> Self {
        let clustered = join_clusters(assignments, joined);
        let profiles = cluster_feature_means(&clustered);
        let trend = cluster_trend(assignments, catalog, track_popularity);
        log::debug!(
            "Cluster view: {} tracks in {} clusters, {} trend points",
            clustered.len(),
            profiles.len(),
            trend.len()
        );
        Self {
            clustered,
            profiles,
            trend,
        }
    }
}

fn features_of(a: &ClusterAssignment) -> [f64; PROFILE_FEATURES] {
    [
        a.danceability,
        a.energy,
        a.loudness_scaled,
        a.speechiness,
        a.acousticness,
        a.instrumentalness,
        a.liveness,
        a.valence,
        a.tempo_scaled,
    ]
}

/// Inner join of cluster assignments with joined tracks on `track_id`.
pub fn join_clusters(
    assignments: &[ClusterAssignment],
    joined: &[JoinedTrack],
) -> Vec<ClusteredTrack> {
    let popularity: HashMap<&str, i64> = joined
        .iter()
        .map(|t| (t.track_id.as_str(), t.current_track_popularity))
        .collect();

    assignments
        .iter()
        .filter_map(|a| {
            popularity
                .get(a.track_id.as_str())
                .map(|&current_track_popularity| ClusteredTrack {
                    assignment: a.clone(),
                    current_track_popularity,
                })
        })
        .collect()
}

/// Per-cluster feature means, ordered by cluster label.
pub fn cluster_feature_means(clustered: &[ClusteredTrack]) -> Vec<ClusterProfile> {
    let mut sums: BTreeMap<&str, (usize, [f64; PROFILE_FEATURES])> = BTreeMap::new();
    for c in clustered {
        let (count, acc) = sums
            .entry(c.assignment.cluster.as_str())
            .or_insert((0, [0.0; PROFILE_FEATURES]));
        *count += 1;
        for (slot, v) in acc.iter_mut().zip(features_of(&c.assignment)) {
            *slot += v;
        }
    }

    sums.into_iter()
        .map(|(cluster, (tracks, acc))| ClusterProfile {
            cluster: cluster.to_string(),
            tracks,
            means: acc.map(|s| s / tracks as f64),
        })
        .collect()
}

/// Mean track popularity by (date, cluster), ordered by date then cluster.
///
/// Only assignments whose track is in the catalog take part.
pub fn cluster_trend(
    assignments: &[ClusterAssignment],
    catalog: &[Track],
    track_popularity: &[Observation],
) -> Vec<ClusterTrendPoint> {
    let known: HashSet<&str> = catalog.iter().map(|t| t.track_id.as_str()).collect();
    let mut cluster_of: HashMap<&str, &str> = HashMap::with_capacity(assignments.len());
    for a in assignments {
        if known.contains(a.track_id.as_str()) {
            cluster_of.entry(a.track_id.as_str()).or_insert(a.cluster.as_str());
        }
    }

    let mut sums: BTreeMap<(NaiveDate, &str), (i64, usize)> = BTreeMap::new();
    for o in track_popularity {
        let Some(&cluster) = cluster_of.get(o.entity_id.as_str()) else {
            continue;
        };
        let entry = sums.entry((o.date, cluster)).or_insert((0, 0));
        entry.0 += o.value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|((date, cluster), (sum, n))| ClusterTrendPoint {
            date,
            cluster: cluster.to_string(),
            mean_track_popularity: sum as f64 / n as f64,
        })
        .collect()
}

/// Tracks per cluster, optionally restricted to one artist and a current
/// popularity range. Ordered by cluster label.
pub fn cluster_counts(
    clustered: &[ClusteredTrack],
    artist: Option<&str>,
    popularity: Bounds,
) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for c in clustered {
        if artist.is_some_and(|name| c.assignment.artist_name != name)
            || !popularity.contains(c.current_track_popularity as f64)
        {
            continue;
        }
        *counts.entry(c.assignment.cluster.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(cluster, n)| (cluster.to_string(), n))
        .collect()
}

/// One-line interpretation of a known cluster label.
pub fn describe_cluster(cluster: &str) -> Option<&'static str> {
    Some(match cluster {
        "0" => "Energetic, loud tracks with a generally negative mood.",
        "1" => "Instrumental acoustic tracks with a negative mood, low energy and a slower tempo.",
        "2" => "Positive, energetic, loud and danceable tracks.",
        "3" => {
            "Non-instrumental acoustic tracks with low energy and a mood that is not highly positive."
        }
        "4" => "Instrumental tracks with a positive mood and high energy.",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mode;

    fn catalog(ids: &[&str]) -> Vec<Track> {
        ids.iter()
            .map(|id| Track {
                track_id: id.to_string(),
                original_track_name: format!("Song {id}"),
                album_id: "AL1".into(),
                track_spotify_url: None,
                track_preview_url: None,
            })
            .collect()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn assignment(id: &str, artist: &str, cluster: &str, energy: f64) -> ClusterAssignment {
        ClusterAssignment {
            track_id: id.into(),
            original_track_name: format!("Song {id}"),
            artist_name: artist.into(),
            cluster: cluster.into(),
            danceability: 0.5,
            energy,
            loudness_scaled: 0.8,
            speechiness: 0.05,
            acousticness: 0.1,
            instrumentalness: 0.0,
            liveness: 0.2,
            valence: 0.3,
            tempo_scaled: 0.6,
        }
    }

    fn joined(id: &str, popularity: i64) -> JoinedTrack {
        JoinedTrack {
            track_id: id.into(),
            original_track_name: format!("Song {id}"),
            artist_name: "X".into(),
            album_image_medium: None,
            current_track_popularity: popularity,
            track_popularity_list: vec![popularity],
            date_track_popularity_list: vec![(d("2024-01-01"), popularity)],
            track_spotify_url: None,
            track_preview_url: None,
            album_release_date: "1975".into(),
            acousticness: 0.1,
            danceability: 0.5,
            energy: 0.8,
            instrumentalness: 0.0,
            valence: 0.3,
            tempo: 120.0,
            mode: Mode::Major,
            tempo_scaled: 0.5,
        }
    }

    #[test]
    fn test_join_clusters_is_inner() {
        let assignments = vec![
            assignment("T1", "X", "0", 0.9),
            assignment("T2", "X", "2", 0.7),
        ];
        let clustered = join_clusters(&assignments, &[joined("T1", 55), joined("T9", 10)]);
        assert_eq!(clustered.len(), 1);
        assert_eq!(clustered[0].assignment.track_id, "T1");
        assert_eq!(clustered[0].current_track_popularity, 55);
    }

    #[test]
    fn test_feature_means_per_cluster() {
        let assignments = vec![
            assignment("T1", "X", "2", 0.9),
            assignment("T2", "Y", "0", 0.6),
            assignment("T3", "Y", "2", 0.5),
        ];
        let tracks = vec![joined("T1", 1), joined("T2", 2), joined("T3", 3)];
        let profiles = cluster_feature_means(&join_clusters(&assignments, &tracks));

        let labels: Vec<_> = profiles.iter().map(|p| p.cluster.as_str()).collect();
        assert_eq!(labels, vec!["0", "2"]);
        assert_eq!(profiles[1].tracks, 2);
        let energy = FEATURE_NAMES.iter().position(|&f| f == "energy").unwrap();
        assert!((profiles[1].means[energy] - 0.7).abs() < 1e-12);
        assert_eq!(profiles[0].means[energy], 0.6);
    }

    #[test]
    fn test_trend_groups_by_date_and_cluster() {
        let assignments = vec![
            assignment("T1", "X", "0", 0.9),
            assignment("T2", "X", "0", 0.9),
            assignment("T3", "X", "1", 0.2),
        ];
        let popularity = vec![
            Observation::new("T1", d("2024-01-02"), 40),
            Observation::new("T2", d("2024-01-02"), 60),
            Observation::new("T3", d("2024-01-02"), 10),
            Observation::new("T1", d("2024-01-01"), 30),
            Observation::new("T404", d("2024-01-01"), 99),
        ];

        let trend = cluster_trend(&assignments, &catalog(&["T1", "T2", "T3"]), &popularity);
        assert_eq!(
            trend,
            vec![
                ClusterTrendPoint {
                    date: d("2024-01-01"),
                    cluster: "0".into(),
                    mean_track_popularity: 30.0,
                },
                ClusterTrendPoint {
                    date: d("2024-01-02"),
                    cluster: "0".into(),
                    mean_track_popularity: 50.0,
                },
                ClusterTrendPoint {
                    date: d("2024-01-02"),
                    cluster: "1".into(),
                    mean_track_popularity: 10.0,
                },
            ]
        );
    }

    #[test]
    fn test_counts_for_one_artist() {
        let assignments = vec![
            assignment("T1", "X", "0", 0.9),
            assignment("T2", "Y", "0", 0.9),
            assignment("T3", "Y", "3", 0.2),
        ];
        let tracks = vec![joined("T1", 1), joined("T2", 2), joined("T3", 3)];
        let clustered = join_clusters(&assignments, &tracks);

        let any = Bounds::default();
        assert_eq!(
            cluster_counts(&clustered, None, any),
            vec![("0".to_string(), 2), ("3".to_string(), 1)]
        );
        assert_eq!(
            cluster_counts(&clustered, Some("Y"), any),
            vec![("0".to_string(), 1), ("3".to_string(), 1)]
        );
        assert!(cluster_counts(&clustered, Some("Nobody"), any).is_empty());
    }

    #[test]
    fn test_counts_within_popularity_range() {
        let assignments = vec![
            assignment("T1", "X", "0", 0.9),
            assignment("T2", "Y", "0", 0.9),
            assignment("T3", "Y", "3", 0.2),
            assignment("T4", "Y", "3", 0.3),
        ];
        let tracks = vec![joined("T1", 10), joined("T2", 50), joined("T3", 80), joined("T4", 100)];
        let clustered = join_clusters(&assignments, &tracks);

        // Inclusive at both ends.
        assert_eq!(
            cluster_counts(&clustered, None, Bounds::new(50.0, 100.0)),
            vec![("0".to_string(), 1), ("3".to_string(), 2)]
        );
        assert_eq!(
            cluster_counts(&clustered, Some("Y"), Bounds::new(60.0, 90.0)),
            vec![("3".to_string(), 1)]
        );
        assert!(cluster_counts(&clustered, None, Bounds::new(11.0, 49.0)).is_empty());
    }

    #[test]
    fn test_trend_ignores_tracks_outside_catalog() {
        let assignments = vec![
            assignment("T1", "X", "0", 0.9),
            assignment("T2", "X", "0", 0.9),
        ];
        let popularity = vec![
            Observation::new("T1", d("2024-01-01"), 40),
            Observation::new("T2", d("2024-01-01"), 80),
        ];

        let trend = cluster_trend(&assignments, &catalog(&["T1"]), &popularity);
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].mean_track_popularity, 40.0);
        assert!(cluster_trend(&assignments, &[], &popularity).is_empty());
    }

    #[test]
    fn test_descriptions_cover_known_clusters() {
        for label in ["0", "1", "2", "3", "4"] {
            assert!(describe_cluster(label).is_some());
        }
        assert_eq!(describe_cluster("5"), None);
    }
}
