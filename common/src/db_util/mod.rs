//! Interfaces between the engine and its SQLite storage.
//!
//! One file per competition. Four relations: `config` (single row), `votes`
//! (one row per round x competitor, one column per judge slot), `credits`
//! (one row per competitor, one column per round), and the schema version
//! marker kept in the SQLite `user_version` pragma.

pub mod config;
pub mod credits;
pub mod votes;

use crate::{AveragingMode, CompetitionState, Result, ServiceError};
use log::info;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: i32 = 3;

/// How long a connection waits on a locked database file before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_millis(15_000);

const SCHEMA_V3: &str = "
CREATE TABLE config (
    id INTEGER NOT NULL,
    description TEXT NOT NULL,
    date TEXT NOT NULL,
    n_judges INTEGER NOT NULL,
    n_competitors INTEGER NOT NULL,
    n_rounds INTEGER NOT NULL,
    current_round INTEGER NOT NULL,
    average INTEGER NOT NULL,
    state INTEGER NOT NULL,
    uuid TEXT NOT NULL,
    max_vote REAL NOT NULL DEFAULT 100.0,
    PRIMARY KEY (id)
);
CREATE TABLE votes (
    id INTEGER NOT NULL,
    competitor INTEGER NOT NULL,
    round INTEGER NOT NULL,
    vote1 REAL,
    vote2 REAL,
    vote3 REAL,
    vote4 REAL,
    vote5 REAL,
    vote6 REAL,
    PRIMARY KEY (id),
    UNIQUE (round, competitor)
);
CREATE TABLE credits (
    competitor INTEGER NOT NULL,
    round1 REAL,
    round2 REAL,
    round3 REAL,
    round4 REAL,
    round5 REAL,
    round6 REAL,
    round7 REAL,
    round8 REAL,
    round9 REAL,
    round10 REAL,
    nickname TEXT,
    PRIMARY KEY (competitor)
);
";

/// Forward migrations keyed by the version they upgrade from. Append-only:
/// historical steps are never edited, new ones are added at the end.
const MIGRATIONS: &[(i32, fn(&Connection) -> rusqlite::Result<()>)] = &[(2, migrate_v2_to_v3)];

/// v2 predates the configurable vote ceiling; synthesize the old fixed value.
fn migrate_v2_to_v3(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("ALTER TABLE config ADD COLUMN max_vote REAL NOT NULL DEFAULT 100.0;")
}

/// Open a connection to a database file with the standard busy timeout.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Open a throwaway in-memory database.
pub fn open_in_memory() -> Result<Connection> {
    Ok(Connection::open_in_memory()?)
}

/// Read the schema version marker. Zero means the file holds no schema yet.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

/// Lay down the current schema on an empty database.
///
/// # Errors
/// Returns [`ServiceError::AlreadyExists`] if the file already holds a schema.
pub fn create_schema(conn: &Connection) -> Result<()> {
    if schema_version(conn)? != 0 {
        return Err(ServiceError::AlreadyExists);
    }
    conn.execute_batch(SCHEMA_V3)?;
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Bring an existing database up to [`SCHEMA_VERSION`], one step at a time.
///
/// # Errors
/// Returns [`ServiceError::SchemaMismatch`] when the stored version is newer
/// than this build understands or no migration step covers it. Existing data
/// is never dropped; steps only add columns with synthesized defaults.
pub fn migrate_to_current(conn: &Connection) -> Result<()> {
    let mut version = schema_version(conn)?;
    if version == 0 || version > SCHEMA_VERSION {
        return Err(ServiceError::SchemaMismatch {
            found: version,
            expected: SCHEMA_VERSION,
        });
    }
    while version < SCHEMA_VERSION {
        let Some((_, step)) = MIGRATIONS.iter().find(|(from, _)| *from == version) else {
            return Err(ServiceError::SchemaMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        };
        info!("migrating schema from version {} to {}", version, version + 1);
        step(conn)?;
        version += 1;
        set_schema_version(conn, version)?;
    }
    Ok(())
}

/// Online copy of the whole database into a fresh file at `target`, safe
/// while the source connection stays live.
pub fn snapshot_to(conn: &Connection, target: &Path) -> Result<()> {
    let mut dst = Connection::open(target)?;
    let backup = rusqlite::backup::Backup::new(conn, &mut dst)?;
    backup.run_to_completion(100, Duration::ZERO, None)?;
    Ok(())
}

impl ToSql for CompetitionState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let code: i64 = match self {
            CompetitionState::Configure => 0,
            CompetitionState::Running => 1,
            CompetitionState::Completed => 2,
        };
        Ok(code.into())
    }
}

impl FromSql for CompetitionState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_i64()? {
            0 => Ok(CompetitionState::Configure),
            1 => Ok(CompetitionState::Running),
            2 => Ok(CompetitionState::Completed),
            other => Err(FromSqlError::OutOfRange(other)),
        }
    }
}

impl ToSql for AveragingMode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let code: i64 = match self {
            AveragingMode::FullMean => 0,
            AveragingMode::TrimmedMean => 1,
        };
        Ok(code.into())
    }
}

impl FromSql for AveragingMode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_i64()? {
            0 => Ok(AveragingMode::FullMean),
            1 => Ok(AveragingMode::TrimmedMean),
            other => Err(FromSqlError::OutOfRange(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The v2 layout: identical to v3 minus the max_vote column.
    fn create_v2_schema(conn: &Connection) {
        let ddl = SCHEMA_V3.replace("    max_vote REAL NOT NULL DEFAULT 100.0,\n", "");
        conn.execute_batch(&ddl).unwrap();
        set_schema_version(conn, 2).unwrap();
    }

    #[test_log::test]
    fn test_create_schema_stamps_version() {
        let conn = open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        create_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test_log::test]
    fn test_create_schema_refuses_existing() {
        let conn = open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        assert!(matches!(
            create_schema(&conn),
            Err(ServiceError::AlreadyExists)
        ));
    }

    #[test_log::test]
    fn test_migrate_v2_adds_max_vote_default() {
        let conn = open_in_memory().unwrap();
        create_v2_schema(&conn);
        conn.execute(
            "insert into config (id, description, date, n_judges, n_competitors, n_rounds,
             current_round, average, state, uuid) values (1, 'legacy', '2016-05-01', 6, 10, 3, 0, 0, 0, 'abc')",
            [],
        )
        .unwrap();

        migrate_to_current(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Data survives and the new column is synthesized with the old fixed ceiling.
        let (description, max_vote): (String, f64) = conn
            .query_row(
                "select description, max_vote from config where id=1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(description, "legacy");
        assert_eq!(max_vote, 100.0);
    }

    #[test_log::test]
    fn test_migrate_rejects_empty_file() {
        let conn = open_in_memory().unwrap();
        assert!(matches!(
            migrate_to_current(&conn),
            Err(ServiceError::SchemaMismatch { found: 0, .. })
        ));
    }

    #[test_log::test]
    fn test_migrate_rejects_newer_version() {
        let conn = open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(
            migrate_to_current(&conn),
            Err(ServiceError::SchemaMismatch { .. })
        ));
    }

    #[test_log::test]
    fn test_migrate_current_is_noop() {
        let conn = open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        migrate_to_current(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
