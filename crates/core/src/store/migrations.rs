//! Database schema migrations.
//!
//! Uses a simple version table approach to track applied migrations.
//! Each migration is a SQL batch that transforms the schema.

use std::num::ParseIntError;

use crate::Error;
use tokio_rusqlite::{Connection, params, rusqlite};

/// Base table. Checked on every open, independent of the version table.
pub(crate) const BUCKET_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS bucket (
    key TEXT PRIMARY KEY,
    val BLOB NOT NULL
);";

/// Migration list: (version, SQL).
///
/// Migrations must be applied in order and be idempotent, so a file written
/// by an older build that predates the version table still opens cleanly.
const MIGRATIONS: &[(&str, &str)] = &[("1", BUCKET_SCHEMA)];

/// Run any pending migrations on a blocking connection.
pub(crate) fn apply(conn: &mut rusqlite::Connection) -> Result<(), Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

    for (version, sql) in MIGRATIONS {
        let version_num: i64 = version
            .parse()
            .map_err(|e: ParseIntError| Error::MigrationFailed(e.to_string()))?;
        if version_num > current {
            conn.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("version {version_num}: {e}")))?;
            conn.execute(
                "INSERT OR IGNORE INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version_num, chrono::Utc::now().to_rfc3339()],
            )?;
        }
    }

    Ok(())
}

/// Run any pending migrations.
///
/// # Errors
///
/// Returns an error if a migration SQL fails to execute.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> { apply(conn) })
        .await
        .map_err(Error::from)
}
