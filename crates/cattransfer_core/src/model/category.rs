//! Category hierarchy model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Store-assigned category node identifier.
pub type CategoryId = i64;

/// Id of the root node seeded by the schema migration.
pub const DEFAULT_ROOT_CATEGORY_ID: CategoryId = 1;

/// Attribute payload keyed by attribute code.
pub type CategoryAttributes = BTreeMap<String, Value>;

/// One node of the category hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    pub id: CategoryId,
    /// `None` only for top-level roots.
    pub parent_id: Option<CategoryId>,
    pub name: String,
}

/// A root-relative category path plus the attributes for its leaf node.
///
/// Records carry descriptors as `{"path_array": [...], "data": {...}}`;
/// `data` is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPathDescriptor {
    pub path_array: Vec<String>,
    #[serde(default)]
    pub data: CategoryAttributes,
}

/// Joins path segments with `/` for diagnostics.
pub fn display_path(path_array: &[String]) -> String {
    path_array.join("/")
}

/// Returns `data` without the keys listed in `attributes_to_ignore`.
pub fn filter_attributes(
    data: &CategoryAttributes,
    attributes_to_ignore: &BTreeSet<String>,
) -> CategoryAttributes {
    data.iter()
        .filter(|(code, _)| !attributes_to_ignore.contains(code.as_str()))
        .map(|(code, value)| (code.clone(), value.clone()))
        .collect()
}
