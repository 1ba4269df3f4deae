//! SQLite-backed config store.
//!
//! Each operation opens its own connection, so the store is cheap to share and
//! several processes may point at the same database file. Conditional updates
//! are a single `UPDATE ... WHERE version = ?` statement.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use jiff::Timestamp;
use rusqlite::{params, types::Type, Connection, ErrorCode, OptionalExtension};

use super::{version_conflict, ConfigRecord, ConfigStore};
use crate::error::{Result, RollerError, StorageResultExt};

const SELECT_RECORD_SQL: &str =
    "SELECT data, version, updated_at FROM config_records WHERE namespace = ?1 AND name = ?2";
const INSERT_RECORD_SQL: &str = "INSERT INTO config_records (namespace, name, data, version, updated_at) VALUES (?1, ?2, ?3, 1, ?4)";
const UPDATE_RECORD_SQL: &str = "UPDATE config_records SET data = ?1, version = version + 1, updated_at = ?2 WHERE namespace = ?3 AND name = ?4 AND version = ?5";
const CHECK_RECORD_EXISTS_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM config_records WHERE namespace = ?1 AND name = ?2)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Config store persisted in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteConfigStore {
    db_path: PathBuf,
}

impl SqliteConfigStore {
    /// Opens (and if necessary creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `RollerError::FileSystem` if the parent directory cannot be
    /// created and `RollerError::Storage` if schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RollerError::FileSystem {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let store = Self { db_path };
        store.connect()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let connection =
            Connection::open(&self.db_path).storage_context("Failed to open database connection")?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .storage_context("Failed to set busy timeout")?;

        let schema_sql = include_str!("../../assets/schema.sql");
        connection
            .execute_batch(schema_sql)
            .storage_context("Failed to initialize database schema")?;
        Ok(connection)
    }

    fn fetch(connection: &Connection, namespace: &str, name: &str) -> Result<Option<ConfigRecord>> {
        let row = connection
            .query_row(SELECT_RECORD_SQL, params![namespace, name], |row| {
                let data: String = row.get(0)?;
                let version: i64 = row.get(1)?;
                let updated_at = row
                    .get::<_, String>(2)?
                    .parse::<Timestamp>()
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                    })?;
                Ok((data, version, updated_at))
            })
            .optional()
            .storage_context("Failed to query config record")?;

        let Some((data, version, updated_at)) = row else {
            return Ok(None);
        };

        let data: BTreeMap<String, String> =
            serde_json::from_str(&data).map_err(|e| RollerError::Decode {
                name: name.to_string(),
                reason: format!("record data is not a string map: {e}"),
            })?;

        Ok(Some(ConfigRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data,
            version: version as u64,
            updated_at,
        }))
    }
}

impl ConfigStore for SqliteConfigStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigRecord>> {
        let connection = self.connect()?;
        Self::fetch(&connection, namespace, name)
    }

    fn create(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigRecord> {
        let connection = self.connect()?;
        let now = Timestamp::now();
        let encoded = serde_json::to_string(&data)?;

        match connection.execute(
            INSERT_RECORD_SQL,
            params![namespace, name, encoded, now.to_string()],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(version_conflict(name));
            }
            Err(e) => return Err(RollerError::storage("Failed to insert config record").with_source(e)),
        }

        Ok(ConfigRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data,
            version: 1,
            updated_at: now,
        })
    }

    fn update(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        expected_version: u64,
    ) -> Result<ConfigRecord> {
        let connection = self.connect()?;
        let now = Timestamp::now();
        let encoded = serde_json::to_string(&data)?;

        let changed = connection
            .execute(
                UPDATE_RECORD_SQL,
                params![encoded, now.to_string(), namespace, name, expected_version as i64],
            )
            .storage_context("Failed to update config record")?;

        if changed == 0 {
            let exists: bool = connection
                .query_row(CHECK_RECORD_EXISTS_SQL, params![namespace, name], |row| row.get(0))
                .storage_context("Failed to check config record existence")?;
            return Err(if exists {
                version_conflict(name)
            } else {
                RollerError::NotFound {
                    kind: "Record",
                    name: name.to_string(),
                }
            });
        }

        Ok(ConfigRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data,
            version: expected_version + 1,
            updated_at: now,
        })
    }
}
