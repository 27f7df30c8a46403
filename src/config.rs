use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use crate::db::Database;
use crate::session::Session;

pub const DATA_DIR_NAME: &str = ".ticketdesk";
pub const DB_FILE: &str = "tickets.db";
pub const LOG_JSON_ENV: &str = "TICKETDESK_LOG_JSON";

/// Walks up from `start` to the nearest `.ticketdesk` directory.
pub fn find_data_dir(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let candidate = current.join(DATA_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            bail!("Not a ticketdesk directory (or any parent). Run 'ticketdesk init' first.");
        }
    }
}

/// Where the data lives and who is acting, as resolved from CLI flags and env.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub acting_user: Option<i64>,
}

impl Config {
    pub fn resolve(dir_override: Option<&Path>, acting_user: Option<i64>) -> Result<Self> {
        let data_dir = match dir_override {
            Some(dir) => {
                if !dir.is_dir() {
                    bail!("Data directory {} does not exist", dir.display());
                }
                dir.to_path_buf()
            }
            None => find_data_dir(&env::current_dir()?)?,
        };
        tracing::debug!(data_dir = %data_dir.display(), ?acting_user, "config resolved");
        Ok(Config {
            data_dir,
            acting_user,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn open_db(&self) -> Result<Database> {
        Database::open(&self.db_path()).context("Failed to open database")
    }

    /// The session for the acting user. Every command except `init` needs one.
    pub fn session(&self, db: &Database) -> Result<Session> {
        let user_id = match self.acting_user {
            Some(id) => id,
            None => bail!("No acting user. Pass --as <user-id> or set TICKETDESK_USER."),
        };
        Ok(Session::resolve(db, user_id)?)
    }
}

/// True when `TICKETDESK_LOG_JSON` asks for JSON log lines.
pub fn log_json_enabled() -> bool {
    env::var(LOG_JSON_ENV)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_find_data_dir_walks_up() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(DATA_DIR_NAME)).unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let found = find_data_dir(&nested).unwrap();
        assert_eq!(found, dir.path().join(DATA_DIR_NAME));
    }

    #[test]
    fn test_resolve_missing_override() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(Config::resolve(Some(&missing), Some(1)).is_err());
    }

    #[test]
    fn test_session_requires_user() {
        let dir = tempdir().unwrap();
        let config = Config::resolve(Some(dir.path()), None).unwrap();
        let db = config.open_db().unwrap();
        assert!(config.session(&db).is_err());

        let config = Config::resolve(Some(dir.path()), Some(42)).unwrap();
        let err = config.session(&db).unwrap_err();
        assert!(err.to_string().contains("User #42 not found"));
    }
}
