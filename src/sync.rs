//! Incremental sync of the dynamic tables from the remote store.
//!
//! For each table: find the latest locally known date, fetch strictly newer
//! remote rows, append them. Tables are synced one at a time. Every failure
//! degrades to "keep the local rows" and is reported, never propagated.

use std::path::Path;

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::db::retry::{self, RetryPolicy};
use crate::db::{Connect, DbError};
use crate::models::{DynamicTable, Observation};
use crate::tables::{self, DynamicTables, TableError};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no remote credential configured")]
    NoCredential,
    #[error("could not connect to remote after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: DbError },
    #[error("query on {table} failed: {source}")]
    Query {
        table: DynamicTable,
        #[source]
        source: DbError,
    },
    #[error("failed to persist {table}: {source}")]
    Persist {
        table: DynamicTable,
        #[source]
        source: TableError,
    },
}

/// Latest date present in a locally cached series, `None` when it is empty.
pub fn latest_known_date(series: &[Observation]) -> Option<NaiveDate> {
    series.iter().map(|o| o.date).max()
}

/// Fetch remote rows of `table` strictly newer than `since` (everything when `None`).
///
/// Connection setup is retried per `policy`; on exhaustion the caller gets
/// [`SyncError::RetriesExhausted`] and should keep its local rows.
pub fn fetch_since(
    connector: &dyn Connect,
    policy: &RetryPolicy,
    table: DynamicTable,
    since: Option<NaiveDate>,
) -> Result<Vec<Observation>, SyncError> {
    let db = retry::retry("remote connection", policy, || connector.connect()).map_err(|e| {
        SyncError::RetriesExhausted {
            attempts: e.attempts,
            last_error: e.last_error,
        }
    })?;

    match db.fetch_observations(table, since) {
        Ok(rows) => Ok(rows),
        Err(source) => {
            log::error!("Query on {table} failed: {source}");
            // Release the connection before reporting.
            drop(db);
            Err(SyncError::Query { table, source })
        }
    }
}

/// Append `delta` after `local`. No re-sort; an empty delta returns `local` untouched.
pub fn extend(local: Vec<Observation>, delta: Vec<Observation>) -> Vec<Observation> {
    if delta.is_empty() {
        return local;
    }
    let mut extended = local;
    extended.extend(delta);
    extended
}

/// What happened to one table during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Remote had nothing newer.
    UpToDate,
    /// This many rows were appended.
    Extended(usize),
    /// Sync was a no-op; the reason is kept for reporting.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSync {
    pub table: DynamicTable,
    pub local_rows: usize,
    pub latest_local: Option<NaiveDate>,
    pub outcome: SyncOutcome,
    pub persisted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tables: Vec<TableSync>,
}

impl SyncReport {
    pub fn rows_added(&self) -> usize {
        self.tables
            .iter()
            .map(|t| match t.outcome {
                SyncOutcome::Extended(n) => n,
                _ => 0,
            })
            .sum()
    }
}

/// Where and how to sync.
pub struct SyncTarget<'a> {
    /// `None` when no credential is available; every table is skipped.
    pub connector: Option<&'a dyn Connect>,
    pub policy: &'a RetryPolicy,
    /// Directory to persist extended tables into, if persistence is on.
    pub persist_dir: Option<&'a Path>,
}

/// Sync one table. Always returns usable rows: the extension on success, `local` otherwise.
pub fn sync_table(
    target: &SyncTarget<'_>,
    table: DynamicTable,
    local: Vec<Observation>,
) -> (Vec<Observation>, TableSync) {
    let latest_local = latest_known_date(&local);
    let mut report = TableSync {
        table,
        local_rows: local.len(),
        latest_local,
        outcome: SyncOutcome::UpToDate,
        persisted: false,
    };

    if latest_local.is_none() {
        log::info!("{table} is empty locally, fetching it in full");
    }

    let delta = match target.connector {
        None => Err(SyncError::NoCredential),
        Some(connector) => fetch_since(connector, target.policy, table, latest_local),
    };
    let delta = match delta {
        Ok(delta) => delta,
        Err(e) => {
            log::warn!("Sync of {table} skipped: {e}");
            report.outcome = SyncOutcome::Skipped(e.to_string());
            return (local, report);
        }
    };

    if delta.is_empty() {
        log::debug!("{table} is up to date");
        return (local, report);
    }

    let added = delta.len();
    let extended = extend(local, delta);
    report.outcome = SyncOutcome::Extended(added);
    log::info!("{table}: {added} new rows");

    if let Some(dir) = target.persist_dir {
        let path = tables::table_path(dir, table.name());
        match tables::write_observations(&path, table, &extended) {
            Ok(()) => report.persisted = true,
            Err(source) => log::warn!("{}", SyncError::Persist { table, source }),
        }
    }

    (extended, report)
}

/// Sync every dynamic table, sequentially, in [`DynamicTable::ALL`] order.
pub fn sync_dynamic_tables(
    target: &SyncTarget<'_>,
    mut local: DynamicTables,
) -> (DynamicTables, SyncReport) {
    let pb = ProgressBar::new(DynamicTable::ALL.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("  [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    let mut report = SyncReport::default();
    for table in DynamicTable::ALL {
        pb.set_message(table.name());
        let rows = local.take(table);
        let (rows, table_report) = sync_table(target, table, rows);
        local.insert(table, rows);
        report.tables.push(table_report);
        pb.inc(1);
    }
    pb.finish_and_clear();

    (local, report)
}

/// Fetch a whole dynamic table and write it to its CSV in `dir`. Returns the row count.
pub fn snapshot_table(
    connector: &dyn Connect,
    policy: &RetryPolicy,
    table: DynamicTable,
    dir: &Path,
) -> Result<usize, SyncError> {
    let rows = fetch_since(connector, policy, table, None)?;
    let path = tables::table_path(dir, table.name());
    tables::write_observations(&path, table, &rows)
        .map_err(|source| SyncError::Persist { table, source })?;
    Ok(rows.len())
}
