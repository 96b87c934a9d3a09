//! Dot convention addressing over `serde_json::Value` trees.
//!
//! A key path such as `categories.0.path_array` is split on
//! [`DOT_PATH_DELIMITER`]; each segment descends one level, as an object key
//! or as a non-negative array index.

use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Segment delimiter of the dot convention.
pub const DOT_PATH_DELIMITER: char = '.';

/// Addressing failures of [`get_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DotPathError {
    EmptyPath,
    /// Two delimiters in a row, or a leading/trailing delimiter.
    EmptySegment { index: usize },
    MissingKey { segment: String },
    InvalidIndex { segment: String },
    IndexOutOfBounds { index: usize, len: usize },
    /// Tried to descend into a scalar.
    NotTraversable { segment: String },
}

impl Display for DotPathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "dot path is empty"),
            Self::EmptySegment { index } => write!(f, "dot path segment {index} is empty"),
            Self::MissingKey { segment } => write!(f, "key `{segment}` not found"),
            Self::InvalidIndex { segment } => {
                write!(f, "segment `{segment}` is not a valid sequence index")
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for sequence of length {len}")
            }
            Self::NotTraversable { segment } => {
                write!(f, "cannot descend into scalar value at `{segment}`")
            }
        }
    }
}

impl Error for DotPathError {}

/// Splits a dot path into its segments, rejecting empty segments.
pub fn split_path(path: &str) -> Result<Vec<&str>, DotPathError> {
    if path.is_empty() {
        return Err(DotPathError::EmptyPath);
    }
    let segments: Vec<&str> = path.split(DOT_PATH_DELIMITER).collect();
    if let Some(index) = segments.iter().position(|segment| segment.is_empty()) {
        return Err(DotPathError::EmptySegment { index });
    }
    Ok(segments)
}

/// Returns the value addressed by `path` inside `root`.
pub fn get_value<'a>(root: &'a Value, path: &str) -> Result<&'a Value, DotPathError> {
    let mut current = root;
    for segment in split_path(path)? {
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| DotPathError::MissingKey {
                segment: segment.to_string(),
            })?,
            Value::Array(items) => {
                let index = segment
                    .parse::<usize>()
                    .map_err(|_| DotPathError::InvalidIndex {
                        segment: segment.to_string(),
                    })?;
                items.get(index).ok_or(DotPathError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                })?
            }
            _ => {
                return Err(DotPathError::NotTraversable {
                    segment: segment.to_string(),
                })
            }
        };
    }
    Ok(current)
}
