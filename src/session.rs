//! One loaded, synced and joined view of the data.
//!
//! A [`Session`] owns every table and derived dataset. Nothing is cached
//! outside it: derived data lives until [`Session::refresh`] or the end of
//! the process.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::clusters::ClusterView;
use crate::config::AppConfig;
use crate::db::retry::RetryPolicy;
use crate::db::{Connect, ConnectionString, SqliteConnector};
use crate::join::{build_datasets, Datasets};
use crate::models::DynamicTable;
use crate::sync::{sync_dynamic_tables, SyncReport, SyncTarget};
use crate::tables::{self, DynamicTables, StaticTables};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("required table '{table}' could not be loaded from {}", .dir.display())]
    MissingTable { table: &'static str, dir: PathBuf },
}

pub struct Session {
    data_dir: PathBuf,
    offline: bool,
    persist: bool,
    policy: RetryPolicy,
    connector: Option<Box<dyn Connect>>,
    statics: StaticTables,
    dynamic: DynamicTables,
    datasets: Datasets,
    clusters: OnceCell<Option<ClusterView>>,
    last_sync: SyncReport,
}

impl Session {
    /// Open a session against the configured remote store.
    ///
    /// Without a credential in the environment the remote is skipped and the
    /// local tables are used as they are.
    pub fn open(config: &AppConfig) -> Result<Self, SessionError> {
        let connector = if config.offline {
            None
        } else {
            ConnectionString::build(&config.remote)
                .map(|target| Box::new(SqliteConnector::new(target)) as Box<dyn Connect>)
        };
        Self::open_with(config, connector)
    }

    /// Open a session with an explicit connector (`None` skips the remote).
    pub fn open_with(
        config: &AppConfig,
        connector: Option<Box<dyn Connect>>,
    ) -> Result<Self, SessionError> {
        let data_dir = config.resolve_data_dir();
        log::info!("Data directory: {}", data_dir.display());

        let statics = StaticTables::load(&data_dir).map_err(|table| SessionError::MissingTable {
            table: table.name(),
            dir: data_dir.clone(),
        })?;
        log::info!(
            "Loaded {} tracks, {} albums, {} artists, {} feature rows",
            statics.tracks.len(),
            statics.albums.len(),
            statics.artists.len(),
            statics.features.len()
        );

        let mut session = Self {
            data_dir,
            offline: config.offline,
            persist: config.persist_sync,
            policy: config.retry.policy(),
            connector,
            statics,
            dynamic: DynamicTables::default(),
            datasets: Datasets::default(),
            clusters: OnceCell::new(),
            last_sync: SyncReport::default(),
        };
        session.refresh();
        Ok(session)
    }

    /// Reload the dynamic tables, sync them, and rebuild all derived data.
    pub fn refresh(&mut self) -> &SyncReport {
        let local = DynamicTables::load(&self.data_dir);

        let (dynamic, report) = if self.offline {
            log::info!("Offline: using local dynamic tables as-is");
            (local, SyncReport::default())
        } else {
            let target = SyncTarget {
                connector: self.connector.as_deref(),
                policy: &self.policy,
                persist_dir: self.persist.then_some(self.data_dir.as_path()),
            };
            sync_dynamic_tables(&target, local)
        };

        self.dynamic = dynamic;
        self.datasets = build_datasets(&self.statics, &self.dynamic);
        self.clusters = OnceCell::new();
        self.last_sync = report;
        &self.last_sync
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn statics(&self) -> &StaticTables {
        &self.statics
    }

    pub fn dynamic(&self) -> &DynamicTables {
        &self.dynamic
    }

    pub fn datasets(&self) -> &Datasets {
        &self.datasets
    }

    pub fn last_sync(&self) -> &SyncReport {
        &self.last_sync
    }

    /// Cluster views, built on first use. `None` when no cluster assignments exist.
    pub fn clusters(&self) -> Option<&ClusterView> {
        self.clusters
            .get_or_init(|| {
                let assignments = tables::load_cluster_assignments(&self.data_dir)?;
                Some(ClusterView::build(
                    &assignments,
                    &self.datasets.tracks,
                    &self.statics.tracks,
                    self.dynamic.get(DynamicTable::TrackPopularity),
                ))
            })
            .as_ref()
    }
}
