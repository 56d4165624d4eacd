//! The single writer that owns the bucket database.
//!
//! Jobs arrive on a bounded queue shared by every writer generation. A writer
//! is spawned on demand by [`ensure_running`], batches mutations into one
//! transaction that is committed once it has been open for the configured
//! commit spacing, and retires after sitting idle for the keepalive window
//! with nothing left to commit.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_rusqlite::{Connection, params, rusqlite};
use rusqlite::OptionalExtension;

use super::connection;
use super::sqlite::Shared;
use crate::Error;

/// One queued unit of work.
pub(crate) enum Job {
    Get { key: String, reply: oneshot::Sender<Result<Option<Vec<u8>>, Error>> },
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
    Flush { reply: oneshot::Sender<Result<(), Error>> },
    /// Wakes an idle writer so it notices a close request.
    Wake,
}

/// What a job did to the open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    None,
    Wrote,
    Committed,
}

/// Spawn a writer unless one is already alive.
pub(crate) fn ensure_running(shared: &Arc<Shared>) {
    if shared
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        shared.writers_spawned.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(run(Arc::clone(shared)));
    }
}

/// Writer task body. Holds the running flag for its whole life and hands it
/// back only when it is about to exit.
pub(super) async fn run(shared: Arc<Shared>) {
    loop {
        let live = shared.live_writers.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_writers.fetch_max(live, Ordering::SeqCst);

        match session(&shared).await {
            Ok(()) => tracing::debug!(path = %shared.path.display(), "store writer retiring"),
            Err(e) => tracing::error!(path = %shared.path.display(), error = %e, "store writer failed"),
        }

        shared.live_writers.fetch_sub(1, Ordering::SeqCst);
        shared.running.store(false, Ordering::SeqCst);

        // A producer may have queued work after the last idle check but before
        // the flag dropped; it saw a live writer and did not spawn one.
        if shared.pending.load(Ordering::SeqCst) == 0
            || shared
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            break;
        }
        shared.writers_spawned.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path = %shared.path.display(), "store writer restarting for queued jobs");
    }
}

/// One connection lifetime: open, drain jobs until idle, commit, close.
async fn session(shared: &Shared) -> Result<(), Error> {
    let mut queue = shared.queue.lock().await;

    let conn = match connection::open(&shared.path).await {
        Ok(conn) => conn,
        Err(e) => {
            // Fail whatever is already queued so awaiting readers are not stranded.
            while let Ok(job) = queue.try_recv() {
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                fail(job, &e);
            }
            return Err(e);
        }
    };

    tracing::debug!(path = %shared.path.display(), "store writer starting");

    drain(shared, &mut queue, &conn).await?;
    commit(&conn).await?;
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "failed to close store connection");
    }
    Ok(())
}

async fn drain(
    shared: &Shared,
    queue: &mut tokio::sync::mpsc::Receiver<Job>,
    conn: &Connection,
) -> Result<(), Error> {
    let spacing = shared.config.commit_spacing;
    let mut first_uncommitted: Option<Instant> = None;

    loop {
        let timeout = match first_uncommitted {
            None => shared.keepalive(),
            Some(since) => spacing.saturating_sub(since.elapsed()),
        };

        match tokio::time::timeout(timeout, queue.recv()).await {
            Ok(Some(job)) => {
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                match execute(conn, job).await? {
                    Effect::Wrote if first_uncommitted.is_none() => first_uncommitted = Some(Instant::now()),
                    Effect::Committed => first_uncommitted = None,
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(_) if first_uncommitted.is_none() => {
                if shared.pending.load(Ordering::SeqCst) == 0 {
                    break;
                }
                // A producer has counted its job but not landed it yet.
                tokio::task::yield_now().await;
            }
            Err(_) => {}
        }

        if let Some(since) = first_uncommitted
            && since.elapsed() >= spacing
        {
            commit(conn).await?;
            first_uncommitted = None;
        }
    }

    Ok(())
}

async fn execute(conn: &Connection, job: Job) -> Result<Effect, Error> {
    match job {
        Job::Get { key, reply } => {
            let result = conn
                .call(move |conn| -> rusqlite::Result<Option<Vec<u8>>> {
                    conn.query_row("SELECT val FROM bucket WHERE key = ?1", params![key], |row| row.get(0))
                        .optional()
                })
                .await
                .map_err(Error::from);

            match result {
                Ok(value) => {
                    let _ = reply.send(Ok(value));
                    Ok(Effect::None)
                }
                Err(e) => {
                    let _ = reply.send(Err(Error::WriterFailed(e.to_string())));
                    Err(e)
                }
            }
        }
        Job::Set { key, value } => {
            conn.call(move |conn| -> rusqlite::Result<()> {
                begin_if_needed(conn)?;
                conn.execute("REPLACE INTO bucket (key, val) VALUES (?1, ?2)", params![key, value])?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
            Ok(Effect::Wrote)
        }
        Job::Delete { key } => {
            conn.call(move |conn| -> rusqlite::Result<()> {
                begin_if_needed(conn)?;
                conn.execute("DELETE FROM bucket WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
            Ok(Effect::Wrote)
        }
        Job::Flush { reply } => match commit(conn).await {
            Ok(()) => {
                let _ = reply.send(Ok(()));
                Ok(Effect::Committed)
            }
            Err(e) => {
                let _ = reply.send(Err(Error::WriterFailed(e.to_string())));
                Err(e)
            }
        },
        Job::Wake => Ok(Effect::None),
    }
}

fn fail(job: Job, cause: &Error) {
    match job {
        Job::Get { reply, .. } => {
            let _ = reply.send(Err(Error::WriterFailed(cause.to_string())));
        }
        Job::Flush { reply } => {
            let _ = reply.send(Err(Error::WriterFailed(cause.to_string())));
        }
        Job::Set { .. } | Job::Delete { .. } | Job::Wake => {}
    }
}

fn begin_if_needed(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN")?;
    }
    Ok(())
}

async fn commit(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> rusqlite::Result<()> {
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    })
    .await
    .map_err(Error::from)
}

impl Shared {
    /// Idle window before retiring; zero once the store is closing.
    fn keepalive(&self) -> Duration {
        if self.closing.load(Ordering::SeqCst) { Duration::ZERO } else { self.config.keepalive }
    }
}
