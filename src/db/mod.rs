pub mod credentials;
pub mod queries;
pub mod retry;

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use credentials::ConnectionString;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Remote database not found at {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// How long a query may wait on a locked remote before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(600);

/// Read-only handle on the remote popularity store.
pub struct RemoteDb {
    pub conn: Connection,
}

impl RemoteDb {
    /// Open an existing remote database. Never creates one.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(DbError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }
}

/// Establishes connections to the remote store.
pub trait Connect {
    fn connect(&self) -> Result<RemoteDb>;
}

/// Connects to the SQLite database named by a connection string.
pub struct SqliteConnector {
    target: ConnectionString,
}

impl SqliteConnector {
    pub fn new(target: ConnectionString) -> Self {
        Self { target }
    }
}

impl Connect for SqliteConnector {
    fn connect(&self) -> Result<RemoteDb> {
        log::debug!("Connecting to {}", self.target);
        RemoteDb::open(&self.target.database_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.db");
        assert!(matches!(RemoteDb::open(&path), Err(DbError::NotFound(p)) if p == path));
        // Opening read-only must not have created the file.
        assert!(!path.exists());
    }

    #[test]
    fn test_remote_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER);")
            .unwrap();

        let db = RemoteDb::open(&path).unwrap();
        assert!(db.conn.execute("INSERT INTO t VALUES (1)", []).is_err());
    }
}
