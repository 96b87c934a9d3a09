//! Category-by-path descriptor extraction.
//!
//! # Responsibility
//! - Read the configured source field of one record via the dot convention.
//! - Normalize each addressed element into a `CategoryPathDescriptor`.
//!
//! # Invariants
//! - Only an address failure or an empty value is a silent skip.
//! - Anything found at the address is handed on element by element;
//!   a malformed element surfaces as [`InvalidDescriptor`] when it is
//!   normalized, never as a skip.

use crate::extract::dot_path::{get_value, DotPathError};
use crate::model::category::CategoryPathDescriptor;
use log::debug;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Why a record produced no descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionSkip {
    Address(DotPathError),
    EmptyValue,
}

impl Display for ExtractionSkip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(err) => write!(f, "{err}"),
            Self::EmptyValue => write!(f, "source value is empty"),
        }
    }
}

/// One extracted element is not a usable `{path_array, data}` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDescriptor {
    pub index: usize,
    pub reason: String,
}

impl Display for InvalidDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "descriptor {} is invalid: {}", self.index, self.reason)
    }
}

impl Error for InvalidDescriptor {}

/// Extracts the raw descriptor elements, mapping every skip reason to an
/// empty list.
pub fn extract_descriptors<'a>(record: &'a Value, source_key_path: &str) -> Vec<&'a Value> {
    match try_extract_descriptors(record, source_key_path) {
        Ok(elements) => elements,
        Err(skip) => {
            debug!(
                "event=path_extract module=extract status=skip source={} reason={}",
                source_key_path, skip
            );
            Vec::new()
        }
    }
}

/// Extracts the raw descriptor elements and reports why a record was
/// skipped.
///
/// A sequence yields its items; any other non-empty value is a single
/// element.
pub fn try_extract_descriptors<'a>(
    record: &'a Value,
    source_key_path: &str,
) -> Result<Vec<&'a Value>, ExtractionSkip> {
    let value = get_value(record, source_key_path).map_err(ExtractionSkip::Address)?;
    if is_empty_value(value) {
        return Err(ExtractionSkip::EmptyValue);
    }

    Ok(match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    })
}

/// Turns the `index`-th extracted element into a descriptor.
pub fn normalize_descriptor(
    index: usize,
    value: &Value,
) -> Result<CategoryPathDescriptor, InvalidDescriptor> {
    let descriptor: CategoryPathDescriptor =
        serde_json::from_value(value.clone()).map_err(|err| InvalidDescriptor {
            index,
            reason: err.to_string(),
        })?;
    if descriptor.path_array.is_empty() {
        return Err(InvalidDescriptor {
            index,
            reason: "path_array is empty".to_string(),
        });
    }
    Ok(descriptor)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}
