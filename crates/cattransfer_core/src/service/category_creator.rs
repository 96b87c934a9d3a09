//! Get-or-create of category paths.
//!
//! # Responsibility
//! - Walk a path top-down, reusing existing nodes and creating missing ones.
//! - Apply leaf attributes (minus the ignore-set) to a newly created leaf.
//!
//! # Invariants
//! - Segment names are looked up and stored exactly as given.
//! - Intermediate nodes are created without attributes.
//! - An existing leaf is returned untouched.
//! - Partial writes are not undone here; the caller's transaction owns that.
//!
//! Lookup and insert are two separate store calls. Two writers creating the
//! same missing segment concurrently can both miss the lookup; the loser hits
//! the `(parent_id, name)` uniqueness constraint and gets a retryable
//! [`CreationError::Conflict`]. Concurrent transfers into one root must be
//! serialized by the caller.

use crate::logging::sanitize_field;
use crate::model::category::{
    display_path, filter_attributes, CategoryAttributes, CategoryId,
};
use crate::repo::category_repo::{CategoryRepoError, CategoryStore};
use crate::service::category_resolver::is_blank_segment;
use log::debug;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from category creation.
#[derive(Debug)]
pub enum CreationError {
    /// Path is empty or has a blank segment.
    InvalidPath(String),
    /// Another writer created the segment between lookup and insert.
    Conflict { parent_id: CategoryId, name: String },
    Store(CategoryRepoError),
}

impl CreationError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl Display for CreationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(message) => write!(f, "invalid category path: {message}"),
            Self::Conflict { parent_id, name } => write!(
                f,
                "category `{name}` was created concurrently under parent {parent_id}; retry"
            ),
            Self::Store(err) => write!(f, "failed to create category: {err}"),
        }
    }
}

impl Error for CreationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CategoryRepoError> for CreationError {
    fn from(value: CategoryRepoError) -> Self {
        match value {
            CategoryRepoError::DuplicateChild { parent_id, name } => {
                Self::Conflict { parent_id, name }
            }
            other => Self::Store(other),
        }
    }
}

/// Creates missing path segments through a [`CategoryStore`].
pub struct CategoryCreator<C: CategoryStore> {
    store: C,
}

impl<C: CategoryStore> CategoryCreator<C> {
    pub fn new(store: C) -> Self {
        Self { store }
    }

    /// Returns the leaf id of `path_array` under `root_id`, creating every
    /// missing segment.
    pub fn get_or_create(
        &self,
        path_array: &[String],
        root_id: CategoryId,
        leaf_data: &CategoryAttributes,
        attributes_to_ignore: &BTreeSet<String>,
    ) -> Result<CategoryId, CreationError> {
        validate_path(path_array)?;
        let leaf_index = path_array.len() - 1;

        let mut current = root_id;
        for (index, name) in path_array.iter().enumerate() {
            if let Some(existing) = self.store.find_child_by_name(current, name)? {
                current = existing;
                continue;
            }

            let attributes = if index == leaf_index {
                filter_attributes(leaf_data, attributes_to_ignore)
            } else {
                CategoryAttributes::new()
            };
            let created = self.store.create_child(current, name, &attributes)?;
            debug!(
                "event=category_create module=service status=ok parent_id={} category_id={} name={} attributes={}",
                current,
                created,
                sanitize_field(name),
                attributes.len()
            );
            current = created;
        }
        Ok(current)
    }
}

fn validate_path(path_array: &[String]) -> Result<(), CreationError> {
    if path_array.is_empty() {
        return Err(CreationError::InvalidPath("path is empty".to_string()));
    }
    match path_array.iter().position(|segment| is_blank_segment(segment)) {
        Some(index) => Err(CreationError::InvalidPath(format!(
            "segment {index} of `{}` is blank",
            display_path(path_array)
        ))),
        None => Ok(()),
    }
}
