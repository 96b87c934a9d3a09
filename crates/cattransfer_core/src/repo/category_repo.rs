//! Category hierarchy repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the two primitives path resolution is built on:
//!   `find_child_by_name` and `create_child`.
//! - Keep SQL details and constraint mapping inside the repository boundary.
//!
//! # Invariants
//! - At most one node exists per `(parent_id, name)`; a second insert is
//!   reported as `DuplicateChild`, never silently merged.
//! - Name comparison is exact (SQLite `BINARY` collation).
//! - Existing nodes are never updated or deleted here.

use crate::db::migrations::latest_version;
use crate::db::{schema_version, table_exists, DbError};
use crate::model::category::{CategoryAttributes, CategoryId, CategoryNode};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by category repository operations.
pub type CategoryRepoResult<T> = Result<T, CategoryRepoError>;

/// Errors from category repository operations.
#[derive(Debug)]
pub enum CategoryRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// A sibling with the same name already exists under `parent_id`.
    DuplicateChild { parent_id: CategoryId, name: String },
    /// The parent node referenced by an insert does not exist.
    ParentNotFound(CategoryId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted or submitted data cannot be stored or read back.
    InvalidData(String),
}

impl Display for CategoryRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::DuplicateChild { parent_id, name } => write!(
                f,
                "category `{name}` already exists under parent {parent_id}"
            ),
            Self::ParentNotFound(id) => write!(f, "parent category not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "category repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "category repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid category data: {message}"),
        }
    }
}

impl Error for CategoryRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for CategoryRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CategoryRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage primitives for the category hierarchy.
pub trait CategoryStore {
    /// Finds the direct child of `parent_id` named exactly `name`.
    fn find_child_by_name(
        &self,
        parent_id: CategoryId,
        name: &str,
    ) -> CategoryRepoResult<Option<CategoryId>>;

    /// Creates one child node and stores `attributes` on it.
    fn create_child(
        &self,
        parent_id: CategoryId,
        name: &str,
        attributes: &CategoryAttributes,
    ) -> CategoryRepoResult<CategoryId>;
}

impl<T: CategoryStore + ?Sized> CategoryStore for &T {
    fn find_child_by_name(
        &self,
        parent_id: CategoryId,
        name: &str,
    ) -> CategoryRepoResult<Option<CategoryId>> {
        (**self).find_child_by_name(parent_id, name)
    }

    fn create_child(
        &self,
        parent_id: CategoryId,
        name: &str,
        attributes: &CategoryAttributes,
    ) -> CategoryRepoResult<CategoryId> {
        (**self).create_child(parent_id, name, attributes)
    }
}

/// SQLite-backed category repository.
pub struct SqliteCategoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCategoryRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> CategoryRepoResult<Self> {
        ensure_category_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Loads one node by id.
    pub fn get_node(&self, id: CategoryId) -> CategoryRepoResult<Option<CategoryNode>> {
        let node = self
            .conn
            .query_row(
                "SELECT id, parent_id, name
                 FROM categories
                 WHERE id = ?1;",
                [id],
                |row| {
                    Ok(CategoryNode {
                        id: row.get(0)?,
                        parent_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(node)
    }

    /// Lists direct children ordered by id.
    pub fn list_children(&self, parent_id: CategoryId) -> CategoryRepoResult<Vec<CategoryNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, name
             FROM categories
             WHERE parent_id = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([parent_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(CategoryNode {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                name: row.get(2)?,
            });
        }
        Ok(items)
    }

    /// Loads attributes stored on one node.
    pub fn attributes(&self, id: CategoryId) -> CategoryRepoResult<CategoryAttributes> {
        let mut stmt = self.conn.prepare(
            "SELECT code, value_json
             FROM category_attributes
             WHERE category_id = ?1
             ORDER BY code ASC;",
        )?;
        let mut rows = stmt.query([id])?;
        let mut attributes = CategoryAttributes::new();
        while let Some(row) = rows.next()? {
            let code: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let value: Value = serde_json::from_str(&raw).map_err(|err| {
                CategoryRepoError::InvalidData(format!(
                    "invalid json in category_attributes.value_json for `{code}`: {err}"
                ))
            })?;
            attributes.insert(code, value);
        }
        Ok(attributes)
    }

    /// Counts every node, roots included.
    pub fn count_nodes(&self) -> CategoryRepoResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM categories;", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl CategoryStore for SqliteCategoryRepository<'_> {
    fn find_child_by_name(
        &self,
        parent_id: CategoryId,
        name: &str,
    ) -> CategoryRepoResult<Option<CategoryId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id
                 FROM categories
                 WHERE parent_id = ?1
                   AND name = ?2
                 ORDER BY id ASC
                 LIMIT 1;",
                params![parent_id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn create_child(
        &self,
        parent_id: CategoryId,
        name: &str,
        attributes: &CategoryAttributes,
    ) -> CategoryRepoResult<CategoryId> {
        self.conn
            .execute(
                "INSERT INTO categories (parent_id, name) VALUES (?1, ?2);",
                params![parent_id, name],
            )
            .map_err(|err| map_insert_error(err, parent_id, name))?;
        let id = self.conn.last_insert_rowid();

        for (code, value) in attributes {
            let value_json = serde_json::to_string(value).map_err(|err| {
                CategoryRepoError::InvalidData(format!("attribute `{code}`: {err}"))
            })?;
            self.conn.execute(
                "INSERT INTO category_attributes (category_id, code, value_json)
                 VALUES (?1, ?2, ?3);",
                params![id, code, value_json],
            )?;
        }

        Ok(id)
    }
}

fn map_insert_error(err: rusqlite::Error, parent_id: CategoryId, name: &str) -> CategoryRepoError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            match failure.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    return CategoryRepoError::DuplicateChild {
                        parent_id,
                        name: name.to_string(),
                    }
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return CategoryRepoError::ParentNotFound(parent_id)
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => {
                    return CategoryRepoError::InvalidData(format!(
                        "category name `{name}` is not allowed"
                    ))
                }
                _ => {}
            }
        }
    }
    err.into()
}

fn ensure_category_connection_ready(conn: &Connection) -> CategoryRepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(CategoryRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["categories", "category_attributes"] {
        if !table_exists(conn, table)? {
            return Err(CategoryRepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}
