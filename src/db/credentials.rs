use std::fmt;
use std::path::PathBuf;

use crate::config::RemoteConfig;

/// Everything needed to reach the remote store.
///
/// The secret only has to be present. The SQLite backend never sends it, so it
/// is checked at build time and not kept. `Debug` and `Display` show it masked.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    server: String,
    database: String,
    user: String,
}

impl ConnectionString {
    /// Build from config, resolving the secret from the environment variable
    /// named by `remote.secret_var`. Returns `None` when the secret is absent.
    pub fn build(remote: &RemoteConfig) -> Option<Self> {
        Self::with_secret(remote, std::env::var(&remote.secret_var).ok())
    }

    /// Build with an already-resolved secret. An empty secret counts as absent.
    pub fn with_secret(remote: &RemoteConfig, secret: Option<String>) -> Option<Self> {
        match secret {
            Some(secret) if !secret.is_empty() => Some(Self {
                server: remote.server.clone(),
                database: remote.database.clone(),
                user: remote.user.clone(),
            }),
            _ => {
                log::warn!(
                    "Remote credential {} not set; remote sync disabled",
                    remote.secret_var
                );
                None
            }
        }
    }

    /// Location of the remote database file: `<server>/<database>.db`.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.server).join(format!("{}.db", self.database))
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Server={};Database={};Uid={};Pwd=****",
            self.server, self.database, self.user
        )
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteConfig {
        RemoteConfig {
            server: "/srv/remote".into(),
            database: "SpotifyRockDB".into(),
            user: "sqladmin".into(),
            secret_var: "ROCKPULSE_TEST_SECRET".into(),
        }
    }

    #[test]
    fn test_missing_secret_is_none() {
        assert!(ConnectionString::with_secret(&remote(), None).is_none());
        assert!(ConnectionString::with_secret(&remote(), Some(String::new())).is_none());
    }

    #[test]
    fn test_database_path_and_redaction() {
        let cs = ConnectionString::with_secret(&remote(), Some("hunter2".into())).unwrap();
        assert_eq!(cs.database_path(), PathBuf::from("/srv/remote/SpotifyRockDB.db"));

        let shown = format!("{cs} {cs:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("Database=SpotifyRockDB;Uid=sqladmin;Pwd=****"));
    }
}
