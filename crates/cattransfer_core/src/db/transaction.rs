//! Explicit begin/commit/rollback over one SQLite connection.
//!
//! # Responsibility
//! - Give the transfer engine a per-record unit of atomicity without
//!   borrowing the connection mutably.
//!
//! # Invariants
//! - `rollback` reverts every write issued on the connection since `begin`.
//! - `begin` takes the write lock immediately (`BEGIN IMMEDIATE`).

use crate::db::DbError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure of one transaction boundary call.
#[derive(Debug)]
pub enum TransactionError {
    Begin(DbError),
    Commit(DbError),
    Rollback(DbError),
}

impl TransactionError {
    /// Short stage name used as `stage=` in log events.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Begin(_) => "begin",
            Self::Commit(_) => "commit",
            Self::Rollback(_) => "rollback",
        }
    }
}

impl Display for TransactionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin(err) => write!(f, "failed to begin transaction: {err}"),
            Self::Commit(err) => write!(f, "failed to commit transaction: {err}"),
            Self::Rollback(err) => write!(f, "failed to roll back transaction: {err}"),
        }
    }
}

impl Error for TransactionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Begin(err) | Self::Commit(err) | Self::Rollback(err) => Some(err),
        }
    }
}

/// Transaction boundary used around each transferred record.
pub trait TransactionManager {
    fn begin(&self) -> Result<(), TransactionError>;
    fn commit(&self) -> Result<(), TransactionError>;
    fn rollback(&self) -> Result<(), TransactionError>;
}

impl<T: TransactionManager + ?Sized> TransactionManager for &T {
    fn begin(&self) -> Result<(), TransactionError> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), TransactionError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), TransactionError> {
        (**self).rollback()
    }
}

/// Transaction manager issuing raw transaction statements on a shared
/// connection, so repositories holding `&Connection` join the transaction.
pub struct SqliteTransactionManager<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTransactionManager<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// `false` while a transaction opened by `begin` is pending.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }
}

impl TransactionManager for SqliteTransactionManager<'_> {
    fn begin(&self) -> Result<(), TransactionError> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(|err| TransactionError::Begin(err.into()))
    }

    fn commit(&self) -> Result<(), TransactionError> {
        self.conn
            .execute_batch("COMMIT;")
            .map_err(|err| TransactionError::Commit(err.into()))
    }

    fn rollback(&self) -> Result<(), TransactionError> {
        self.conn
            .execute_batch("ROLLBACK;")
            .map_err(|err| TransactionError::Rollback(err.into()))
    }
}
