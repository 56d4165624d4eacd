//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for durability and concurrent readability (WAL mode), and running migrations.

use super::migrations;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

/// Open the bucket database at `path`.
///
/// Creates the file if it doesn't exist, applies pragmas, recreates the
/// bucket table if it is missing, and runs any pending migrations. The returned connection runs its statements on a
/// dedicated background thread.
pub(crate) async fn open(path: impl AsRef<Path>) -> Result<Connection, Error> {
    let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;

    conn.call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(migrations::BUCKET_SCHEMA)?;
        Ok(())
    })
    .await
    .map_err(Error::Database)?;

    migrations::run(&conn).await?;

    Ok(conn)
}
