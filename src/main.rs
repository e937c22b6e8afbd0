use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rockpulse::config::AppConfig;
use rockpulse::db::{ConnectionString, SqliteConnector};
use rockpulse::models::{DynamicTable, JoinedArtist, JoinedTrack, StaticTable};
use rockpulse::query::{self, ArtistRanking, Bounds, ReleaseWindow, TrackFeature, TrackFilter};
use rockpulse::session::Session;
use rockpulse::sync::{SyncOutcome, SyncReport};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rockpulse", version, about = "Rock catalog popularity tracker")]
struct Cli {
    /// Directory holding the CSV tables
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Skip the remote sync and use local tables as-is
    #[arg(long, global = true)]
    offline: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Track filters shared by `top` and `counts`. Ranges are written `min..max`.
#[derive(Args, Clone)]
struct FilterArgs {
    /// Keep only these artists (repeatable)
    #[arg(short, long = "artist")]
    artists: Vec<String>,

    /// Current popularity range (0..100)
    #[arg(long, value_parser = query::parse_bounds)]
    popularity: Option<Bounds>,

    /// Tempo range in BPM
    #[arg(long, value_parser = query::parse_bounds)]
    tempo: Option<Bounds>,

    #[arg(long, value_parser = query::parse_bounds)]
    energy: Option<Bounds>,

    #[arg(long, value_parser = query::parse_bounds)]
    valence: Option<Bounds>,

    #[arg(long, value_parser = query::parse_bounds)]
    danceability: Option<Bounds>,

    #[arg(long, value_parser = query::parse_bounds)]
    acousticness: Option<Bounds>,

    #[arg(long, value_parser = query::parse_bounds)]
    instrumentalness: Option<Bounds>,

    /// Earliest album release date (e.g. "1970" or "1970-06-01")
    #[arg(long)]
    released_from: Option<String>,

    /// Latest album release date; a bare year includes the whole year
    #[arg(long)]
    released_to: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> TrackFilter {
        TrackFilter {
            artists: self.artists.clone(),
            popularity: self.popularity.unwrap_or_default(),
            tempo: self.tempo.unwrap_or_default(),
            energy: self.energy.unwrap_or_default(),
            valence: self.valence.unwrap_or_default(),
            danceability: self.danceability.unwrap_or_default(),
            acousticness: self.acousticness.unwrap_or_default(),
            instrumentalness: self.instrumentalness.unwrap_or_default(),
            released: ReleaseWindow {
                from: self.released_from.clone(),
                to: self.released_to.clone(),
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pull new rows for every dynamic table from the remote store
    Sync {
        /// Write the extended tables back to the data directory
        #[arg(long)]
        persist: bool,
    },

    /// Replace one local dynamic table with a full copy from the remote store
    Snapshot {
        /// Table name or alias (tracks, albums, artists, followers)
        table: DynamicTable,
    },

    /// Show the most popular tracks matching the filters
    Top {
        #[command(flatten)]
        filters: FilterArgs,

        /// Number of results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Rank artists by current popularity or followers
    Artists {
        #[arg(long, value_enum, default_value = "popularity")]
        by: ArtistRanking,

        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Popularity history of one track or artist, or the catalog mean when neither is given
    Trend {
        /// Track id or name (substring match)
        track: Option<String>,

        /// Artist id or name (substring match); shows popularity and followers
        #[arg(long, conflicts_with = "track")]
        artist: Option<String>,
    },

    /// Number of matching tracks per artist
    Counts {
        #[command(flatten)]
        filters: FilterArgs,

        /// Show each artist's share of their catalog instead of absolute counts
        #[arg(long)]
        relative: bool,

        /// Count by album release date instead of by artist
        #[arg(long, conflicts_with = "relative")]
        releases: bool,

        /// Distribution of an audio feature over the matching tracks
        #[arg(long, value_enum, conflicts_with_all = ["relative", "releases"])]
        feature: Option<TrackFeature>,

        /// Number of equal-width bins for --feature
        #[arg(long, default_value = "10", requires = "feature")]
        bins: usize,

        /// Number of rows
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Cluster profiles and track counts per cluster
    Clusters {
        /// Count only this artist's tracks
        #[arg(short, long)]
        artist: Option<String>,

        /// Count only tracks whose current popularity is in this range (e.g. 50..80)
        #[arg(long, value_parser = query::parse_bounds)]
        popularity: Option<Bounds>,

        /// Also show mean popularity per cluster over time
        #[arg(long)]
        trend: bool,
    },

    /// Write the joined datasets as JSON
    Export {
        /// Output directory
        dir: PathBuf,
    },

    /// Show table and dataset statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // The remote credential may live in a .env file.
    if let Ok(path) = dotenvy::dotenv() {
        log::debug!("Loaded environment from {}", path.display());
    }

    // Load config file (optional, defaults if missing); CLI flags win.
    let mut config = AppConfig::load();
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    config.offline |= cli.offline;

    match cli.command {
        Commands::Sync { persist } => {
            if config.offline {
                anyhow::bail!("Cannot sync with --offline set.");
            }
            config.persist_sync |= persist;
            let session = open_session(&config)?;
            print_sync_report(session.last_sync());
            let added = session.last_sync().rows_added();
            println!();
            println!(
                "Sync complete: {} new rows, {} tracks and {} artists joined",
                added,
                session.datasets().tracks.len(),
                session.datasets().artists.len()
            );
            if added > 0 && !config.persist_sync {
                println!("(not persisted; re-run with --persist to write the tables)");
            }
        }

        Commands::Snapshot { table } => {
            let target = ConnectionString::build(&config.remote).with_context(|| {
                format!(
                    "No remote credential. Set {} in the environment or a .env file.",
                    config.remote.secret_var
                )
            })?;
            let connector = SqliteConnector::new(target);
            let data_dir = config.resolve_data_dir();
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create {}", data_dir.display()))?;

            let rows = rockpulse::sync::snapshot_table(
                &connector,
                &config.retry.policy(),
                table,
                &data_dir,
            )
            .with_context(|| format!("Snapshot of {table} failed"))?;
            println!("Snapshot complete: {rows} rows written to {table}");
        }

        Commands::Top { filters, limit } => {
            let session = open_session(&config)?;
            let tracks = &session.datasets().tracks;
            let filtered = filters.to_filter().apply(tracks);
            let top = query::top_tracks(&filtered, limit);

            if top.is_empty() {
                println!("No tracks match the filters.");
                return Ok(());
            }

            println!(
                "Top {} of {} matching tracks (of {} total):",
                top.len(),
                filtered.len(),
                tracks.len()
            );
            println!();
            print_track_table(&top);
        }

        Commands::Artists { by, limit } => {
            let session = open_session(&config)?;
            let ranked = query::rank_artists(&session.datasets().artists, by);

            if ranked.is_empty() {
                println!("No artists with popularity and follower history.");
                return Ok(());
            }

            let label = match by {
                ArtistRanking::Popularity => "popularity",
                ArtistRanking::Followers => "followers",
            };
            println!("Artists by {label}:");
            println!();
            print_artist_table(&ranked[..ranked.len().min(limit)]);
        }

        Commands::Trend { track, artist } => {
            let session = open_session(&config)?;
            if let Some(needle) = artist {
                let Some(a) = query::find_artist(&session.datasets().artists, &needle) else {
                    println!("No artist matching \"{}\".", needle);
                    return Ok(());
                };
                println!("{} ({})", a.artist_name, a.artist_id);
                println!();
                print_series("Popularity", &a.date_artist_popularity_list);
                println!();
                print_series("Followers", &a.date_followers_list);
                return Ok(());
            }
            match track {
                Some(needle) => {
                    let Some(t) = query::find_track(&session.datasets().tracks, &needle) else {
                        println!("No track matching \"{}\".", needle);
                        return Ok(());
                    };
                    println!(
                        "\"{}\" by {} ({})",
                        t.original_track_name, t.artist_name, t.track_id
                    );
                    println!();
                    print_series("Popularity", &t.date_track_popularity_list);
                }
                None => {
                    let means = &session.datasets().mean_popularity;
                    if means.is_empty() {
                        println!("No track popularity history.");
                        return Ok(());
                    }
                    println!("Mean track popularity:");
                    println!();
                    println!("{:<12} {:>10}", "Date", "Mean");
                    println!("{}", "-".repeat(23));
                    for m in means {
                        println!("{:<12} {:>10.2}", m.date, m.mean_track_popularity);
                    }
                }
            }
        }

        Commands::Counts { filters, relative, releases, feature, bins, limit } => {
            let session = open_session(&config)?;
            let tracks = &session.datasets().tracks;
            let selected = filters.to_filter().apply(tracks);

            if selected.is_empty() {
                println!("No tracks match the filters.");
                return Ok(());
            }

            if let Some(feature) = feature {
                println!(
                    "Distribution of {} over {} tracks:",
                    feature.label(),
                    selected.len()
                );
                println!();
                println!("{:>10} {:>10} {:>6}", "From", "To", "Tracks");
                println!("{}", "-".repeat(28));
                for bin in query::feature_histogram(&selected, feature, bins) {
                    println!("{:>10.3} {:>10.3} {:>6}", bin.start, bin.end, bin.count);
                }
            } else if releases {
                println!("Tracks by album release date:");
                println!();
                println!("{:<12} {:>6}", "Released", "Tracks");
                println!("{}", "-".repeat(19));
                for (date, n) in query::release_date_histogram(&selected) {
                    println!("{:<12} {:>6}", date, n);
                }
            } else if relative {
                println!("Share of each artist's tracks matching the filters:");
                println!();
                println!("{:<30} {:>8} {:>6} {:>8}", "Artist", "Matching", "Total", "Share");
                println!("{}", "-".repeat(55));
                for r in query::relative_track_counts(&selected, tracks).iter().take(limit) {
                    println!(
                        "{:<30} {:>8} {:>6} {:>7.2}%",
                        truncate(&r.artist_name, 30),
                        r.selected,
                        r.total,
                        r.percent
                    );
                }
            } else {
                println!("Tracks per artist ({} matching):", selected.len());
                println!();
                println!("{:<30} {:>6}", "Artist", "Tracks");
                println!("{}", "-".repeat(37));
                for (artist, n) in query::artist_track_counts(&selected).iter().take(limit) {
                    println!("{:<30} {:>6}", truncate(artist, 30), n);
                }
            }
        }

        Commands::Clusters { artist, popularity, trend } => {
            let session = open_session(&config)?;
            let Some(view) = session.clusters() else {
                println!(
                    "No cluster assignments found. Expected {}.",
                    rockpulse::tables::table_path(
                        session.data_dir(),
                        rockpulse::tables::CLUSTERS_TABLE
                    )
                    .display()
                );
                return Ok(());
            };

            print_cluster_profiles(view);
            println!();

            let counts = rockpulse::clusters::cluster_counts(
                &view.clustered,
                artist.as_deref(),
                popularity.unwrap_or_default(),
            );
            match &artist {
                _ if counts.is_empty() => println!("No clustered tracks match the filters."),
                Some(name) => println!("Tracks per cluster for {}:", name),
                None => println!("Tracks per cluster:"),
            }
            for (cluster, n) in &counts {
                println!("  Cluster {:<4} {:>6}", cluster, n);
            }

            if trend {
                println!();
                if view.trend.is_empty() {
                    println!("No popularity history for clustered tracks.");
                    return Ok(());
                }
                println!("Mean popularity per cluster:");
                println!();
                println!("{:<12} {:<8} {:>10}", "Date", "Cluster", "Mean");
                println!("{}", "-".repeat(32));
                for p in &view.trend {
                    println!(
                        "{:<12} {:<8} {:>10.2}",
                        p.date, p.cluster, p.mean_track_popularity
                    );
                }
            }
        }

        Commands::Export { dir } => {
            let session = open_session(&config)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            let datasets = session.datasets();
            write_json(&dir.join("tracks.json"), &datasets.tracks)?;
            write_json(&dir.join("artists.json"), &datasets.artists)?;
            write_json(&dir.join("mean_popularity.json"), &datasets.mean_popularity)?;
            let mut files = 3;
            if let Some(view) = session.clusters() {
                write_json(&dir.join("clusters.json"), &view.clustered)?;
                write_json(&dir.join("cluster_trend.json"), &view.trend)?;
                files += 2;
            }
            println!(
                "Export complete: {} files written to {} ({} tracks, {} artists)",
                files,
                dir.display(),
                datasets.tracks.len(),
                datasets.artists.len()
            );
        }

        Commands::Stats => {
            let session = open_session(&config)?;
            let statics = session.statics();
            println!("Data Statistics");
            println!("===============");
            println!("Data directory:   {}", session.data_dir().display());
            println!();

            println!("Reference tables:");
            for table in StaticTable::ALL {
                let rows = match table {
                    StaticTable::Tracks => statics.tracks.len(),
                    StaticTable::Albums => statics.albums.len(),
                    StaticTable::Artists => statics.artists.len(),
                    StaticTable::TrackFeatures => statics.features.len(),
                };
                println!("  {:<26} {:>8}", table.name(), rows);
            }
            println!();

            println!("Observation tables:");
            for table in DynamicTable::ALL {
                let rows = session.dynamic().get(table);
                let latest = rockpulse::sync::latest_known_date(rows)
                    .map_or_else(|| "-".to_string(), |d| d.to_string());
                println!("  {:<26} {:>8}  latest {}", table.name(), rows.len(), latest);
            }
            println!();

            let datasets = session.datasets();
            println!("Joined tracks:    {}", datasets.tracks.len());
            println!("Joined artists:   {}", datasets.artists.len());
            println!("Tracked dates:    {}", datasets.mean_popularity.len());
        }
    }

    Ok(())
}

fn open_session(config: &AppConfig) -> Result<Session> {
    Session::open(config).context("Failed to load data")
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Shorten to `width` characters, marking the cut with "...".
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn print_sync_report(report: &SyncReport) {
    if report.tables.is_empty() {
        println!("Remote sync skipped.");
        return;
    }

    println!(
        "{:<26} {:>8} {:>12}  {}",
        "Table", "Local", "Latest", "Result"
    );
    println!("{}", "-".repeat(70));

    for t in &report.tables {
        let latest = t
            .latest_local
            .map_or_else(|| "-".to_string(), |d| d.to_string());
        let result = match &t.outcome {
            SyncOutcome::UpToDate => "up to date".to_string(),
            SyncOutcome::Extended(n) if t.persisted => format!("+{n} rows (saved)"),
            SyncOutcome::Extended(n) => format!("+{n} rows"),
            SyncOutcome::Skipped(reason) => format!("skipped: {reason}"),
        };
        println!(
            "{:<26} {:>8} {:>12}  {}",
            t.table.name(),
            t.local_rows,
            latest,
            result
        );
    }
}

/// Print a table of tracks with their current popularity and audio features.
fn print_track_table(tracks: &[&JoinedTrack]) {
    println!(
        "{:<28} {:<20} {:>4} {:>10} {:>6}  {:>4} {:>4} {:>4} {:>4} {:>4} {:<5}",
        "Track", "Artist", "Pop", "Released", "BPM",
        "Eng", "Val", "Dnc", "Acs", "Ins", "Mode"
    );
    println!("{}", "-".repeat(114));

    for t in tracks {
        println!(
            "{:<28} {:<20} {:>4} {:>10} {:>6.1}  {:>4.2} {:>4.2} {:>4.2} {:>4.2} {:>4.2} {:<5}",
            truncate(&t.original_track_name, 28),
            truncate(&t.artist_name, 20),
            t.current_track_popularity,
            t.album_release_date,
            t.tempo,
            t.energy,
            t.valence,
            t.danceability,
            t.acousticness,
            t.instrumentalness,
            t.mode.label(),
        );
    }

    println!();
    println!("Eng=Energy  Val=Valence  Dnc=Danceability  Acs=Acousticness  Ins=Instrumentalness");
}

/// Print artists with their current popularity and followers.
fn print_artist_table(artists: &[&JoinedArtist]) {
    println!("{:<30} {:>4} {:>12}  {}", "Artist", "Pop", "Followers", "Spotify");
    println!("{}", "-".repeat(80));

    for a in artists {
        println!(
            "{:<30} {:>4} {:>12}  {}",
            truncate(&a.artist_name, 30),
            a.current_artist_popularity,
            a.current_followers,
            a.artist_url.as_deref().unwrap_or("-"),
        );
    }
}

/// Print per-cluster feature means with the known cluster descriptions.
fn print_series(label: &str, series: &[(chrono::NaiveDate, i64)]) {
    if series.is_empty() {
        println!("No {} history.", label.to_lowercase());
        return;
    }
    println!("{:<12} {:>12}", "Date", label);
    println!("{}", "-".repeat(25));
    for (date, value) in series {
        println!("{:<12} {:>12}", date, value);
    }
}

fn print_cluster_profiles(view: &rockpulse::clusters::ClusterView) {
    use rockpulse::clusters::{describe_cluster, FEATURE_NAMES};

    print!("{:<8} {:>6}", "Cluster", "Tracks");
    for name in FEATURE_NAMES {
        print!(" {:>5}", &name[..name.len().min(5)]);
    }
    println!();
    println!("{}", "-".repeat(15 + 6 * FEATURE_NAMES.len()));

    for p in &view.profiles {
        print!("{:<8} {:>6}", p.cluster, p.tracks);
        for mean in p.means {
            print!(" {:>5.2}", mean);
        }
        println!();
    }

    println!();
    for p in &view.profiles {
        if let Some(description) = describe_cluster(&p.cluster) {
            println!("Cluster {}: {}", p.cluster, description);
        }
    }
}
