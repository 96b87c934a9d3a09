//! Activity repository: record source and summary sink.
//!
//! # Responsibility
//! - Store activities and their per-entity record payloads.
//! - Yield records in deterministic source order.
//! - Persist the `extra` metadata that carries transfer summaries.
//!
//! # Invariants
//! - One record row per `(activity_id, entity_identifier)`; appending the
//!   same identifier again merges the payload into the existing row and keeps
//!   its original position.
//! - Records are yielded by ascending `position`.

use crate::db::migrations::latest_version;
use crate::db::{schema_version, table_exists, DbError};
use crate::model::activity::{Activity, ActivityId, ActivityRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ActivityRepoResult<T> = Result<T, ActivityRepoError>;

/// Errors from activity repository operations.
#[derive(Debug)]
pub enum ActivityRepoError {
    Db(DbError),
    ActivityNotFound(ActivityId),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl Display for ActivityRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ActivityNotFound(id) => write!(f, "activity not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "activity repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "activity repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid activity data: {message}"),
        }
    }
}

impl Error for ActivityRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ActivityRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ActivityRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Ordered source of records belonging to one activity.
pub trait RecordSource {
    fn records_for_activity(&self, activity_id: ActivityId)
        -> ActivityRepoResult<Vec<ActivityRecord>>;
}

/// Load/save access used to persist transfer summaries.
pub trait ActivitySummarySink {
    fn get_activity(&self, activity_id: ActivityId) -> ActivityRepoResult<Activity>;
    fn save_activity(&self, activity: &Activity) -> ActivityRepoResult<()>;
}

impl<T: RecordSource + ?Sized> RecordSource for &T {
    fn records_for_activity(
        &self,
        activity_id: ActivityId,
    ) -> ActivityRepoResult<Vec<ActivityRecord>> {
        (**self).records_for_activity(activity_id)
    }
}

impl<T: ActivitySummarySink + ?Sized> ActivitySummarySink for &T {
    fn get_activity(&self, activity_id: ActivityId) -> ActivityRepoResult<Activity> {
        (**self).get_activity(activity_id)
    }

    fn save_activity(&self, activity: &Activity) -> ActivityRepoResult<()> {
        (**self).save_activity(activity)
    }
}

/// SQLite-backed activity repository.
pub struct SqliteActivityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActivityRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> ActivityRepoResult<Self> {
        let expected_version = latest_version();
        let actual_version = schema_version(conn)?;
        if actual_version != expected_version {
            return Err(ActivityRepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        for table in ["activities", "activity_records"] {
            if !table_exists(conn, table)? {
                return Err(ActivityRepoError::MissingRequiredTable(table));
            }
        }
        Ok(Self { conn })
    }

    /// Creates an empty activity and returns its id.
    pub fn create_activity(&self, label: &str) -> ActivityRepoResult<ActivityId> {
        self.conn.execute(
            "INSERT INTO activities (label, extra_json) VALUES (?1, '{}');",
            [label],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Appends one entity payload, merging into an existing row for the
    /// same identifier.
    pub fn append_record(
        &self,
        activity_id: ActivityId,
        entity_identifier: &str,
        data: &Value,
    ) -> ActivityRepoResult<()> {
        self.ensure_activity_exists(activity_id)?;

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT data_json
                 FROM activity_records
                 WHERE activity_id = ?1
                   AND entity_identifier = ?2;",
                params![activity_id, entity_identifier],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(raw) => {
                let mut merged = parse_json(&raw, "activity_records.data_json")?;
                merge_payload(&mut merged, data);
                self.conn.execute(
                    "UPDATE activity_records
                     SET data_json = ?3
                     WHERE activity_id = ?1
                       AND entity_identifier = ?2;",
                    params![activity_id, entity_identifier, to_json(&merged)?],
                )?;
            }
            None => {
                self.conn.execute(
                    "INSERT INTO activity_records (activity_id, entity_identifier, position, data_json)
                     VALUES (
                        ?1,
                        ?2,
                        (SELECT COALESCE(MAX(position), -1) + 1
                         FROM activity_records
                         WHERE activity_id = ?1),
                        ?3
                     );",
                    params![activity_id, entity_identifier, to_json(data)?],
                )?;
            }
        }
        Ok(())
    }

    fn ensure_activity_exists(&self, activity_id: ActivityId) -> ActivityRepoResult<()> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM activities WHERE id = ?1);",
            [activity_id],
            |row| row.get(0),
        )?;
        if exists == 1 {
            Ok(())
        } else {
            Err(ActivityRepoError::ActivityNotFound(activity_id))
        }
    }
}

impl RecordSource for SqliteActivityRepository<'_> {
    fn records_for_activity(
        &self,
        activity_id: ActivityId,
    ) -> ActivityRepoResult<Vec<ActivityRecord>> {
        self.ensure_activity_exists(activity_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT entity_identifier, data_json
             FROM activity_records
             WHERE activity_id = ?1
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([activity_id])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let entity_identifier: String = row.get(0)?;
            let raw: String = row.get(1)?;
            records.push(ActivityRecord {
                entity_identifier,
                data: parse_json(&raw, "activity_records.data_json")?,
            });
        }
        Ok(records)
    }
}

impl ActivitySummarySink for SqliteActivityRepository<'_> {
    fn get_activity(&self, activity_id: ActivityId) -> ActivityRepoResult<Activity> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT label, extra_json
                 FROM activities
                 WHERE id = ?1;",
                [activity_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (label, raw_extra) = row.ok_or(ActivityRepoError::ActivityNotFound(activity_id))?;

        let extra = match parse_json(&raw_extra, "activities.extra_json")? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ActivityRepoError::InvalidData(format!(
                    "activities.extra_json must be an object, got `{other}`"
                )))
            }
        };

        Ok(Activity {
            id: activity_id,
            label,
            extra,
        })
    }

    fn save_activity(&self, activity: &Activity) -> ActivityRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE activities
             SET label = ?2,
                 extra_json = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                activity.id,
                activity.label,
                to_json(&Value::Object(activity.extra.clone()))?
            ],
        )?;
        if changed == 0 {
            return Err(ActivityRepoError::ActivityNotFound(activity.id));
        }
        Ok(())
    }
}

/// Shallow merge: top-level keys of `incoming` overwrite those of `target`.
fn merge_payload(target: &mut Value, incoming: &Value) {
    if let (Some(fields), Some(incoming_fields)) = (target.as_object_mut(), incoming.as_object()) {
        for (key, value) in incoming_fields {
            fields.insert(key.clone(), value.clone());
        }
        return;
    }
    *target = incoming.clone();
}

fn parse_json(raw: &str, column: &'static str) -> ActivityRepoResult<Value> {
    serde_json::from_str(raw)
        .map_err(|err| ActivityRepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

fn to_json(value: &Value) -> ActivityRepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| ActivityRepoError::InvalidData(format!("cannot encode payload: {err}")))
}
