//! Connection bootstrap for the transfer store.
//!
//! # Invariants
//! - Returned connections enforce foreign keys, so categories cannot point
//!   at a missing parent.
//! - Returned connections wait up to [`BUSY_TIMEOUT`] for a competing
//!   writer before failing.
//! - Returned connections are migrated to the latest schema.

use super::migrations::apply_migrations;
use super::{schema_version, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Longest time a statement waits on a locked database.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum OpenMode {
    File,
    Memory,
}

impl OpenMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens (or creates) the database file at `path`, ready for transfers.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with(OpenMode::File, || Connection::open(path))
}

/// Opens a private in-memory database, ready for transfers.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with(OpenMode::Memory, Connection::open_in_memory)
}

fn open_with(
    mode: OpenMode,
    connect: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = mode.as_str();

    let prepared = connect()
        .map_err(|err| ("db_open_failed", err.into()))
        .and_then(|mut conn| {
            prepare_connection(&mut conn)
                .map(|version| (conn, version))
                .map_err(|err| ("db_bootstrap_failed", err))
        });

    match prepared {
        Ok((conn, version)) => {
            info!(
                "event=db_open module=db status=ok mode={} schema_version={} duration_ms={}",
                mode,
                version,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err((error_code, err)) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code={} error={}",
                mode,
                started_at.elapsed().as_millis(),
                error_code,
                err
            );
            Err(err)
        }
    }
}

/// Applies pragmas and migrations; returns the resulting schema version.
fn prepare_connection(conn: &mut Connection) -> DbResult<u32> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)?;
    schema_version(conn)
}
