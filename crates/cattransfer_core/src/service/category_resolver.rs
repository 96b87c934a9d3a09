//! Read-only resolution of category paths.
//!
//! # Responsibility
//! - Map a root-relative path of names to the id of an existing node.
//!
//! # Invariants
//! - Resolution is strictly top-down from the given root.
//! - No writes are issued.

use crate::model::category::{display_path, CategoryId};
use crate::repo::category_repo::{CategoryRepoError, CategoryStore};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from path resolution.
#[derive(Debug)]
pub enum ResolveError {
    /// Segment `missing_index` (and everything below it) does not exist.
    NotFound {
        path: Vec<String>,
        missing_index: usize,
    },
    Store(CategoryRepoError),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound {
                path,
                missing_index,
            } => write!(
                f,
                "category path `{}` not found at segment {missing_index}",
                display_path(path)
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound { .. } => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<CategoryRepoError> for ResolveError {
    fn from(value: CategoryRepoError) -> Self {
        Self::Store(value)
    }
}

/// A segment made only of whitespace never names a category.
pub(crate) fn is_blank_segment(segment: &str) -> bool {
    segment.trim().is_empty()
}

/// Resolves category paths against a [`CategoryStore`].
pub struct CategoryResolver<C: CategoryStore> {
    store: C,
}

impl<C: CategoryStore> CategoryResolver<C> {
    pub fn new(store: C) -> Self {
        Self { store }
    }

    /// Returns the id of the node at `path_array` under `root_id`.
    ///
    /// Names are compared exactly as given. An empty path or a blank
    /// segment never resolves.
    pub fn resolve(
        &self,
        path_array: &[String],
        root_id: CategoryId,
    ) -> Result<CategoryId, ResolveError> {
        let not_found = |missing_index: usize| ResolveError::NotFound {
            path: path_array.to_vec(),
            missing_index,
        };

        if path_array.is_empty() {
            return Err(not_found(0));
        }

        let mut current = root_id;
        for (index, segment) in path_array.iter().enumerate() {
            if is_blank_segment(segment) {
                return Err(not_found(index));
            }
            current = self
                .store
                .find_child_by_name(current, segment)?
                .ok_or_else(|| not_found(index))?;
        }
        Ok(current)
    }
}
