//! Transfer configuration.
//!
//! # Responsibility
//! - Describe one transferor: where its paths live in a record, which root
//!   they hang under, which attributes it must not write, and what to do on
//!   a failing record.
//! - Load that description from JSON.
//!
//! # Invariants
//! - `continue_in_case_of_errors` and `source_key_path` have no implicit
//!   default; a config without them does not parse.
//! - `root_category_id` defaults to [`DEFAULT_ROOT_CATEGORY_ID`].
//! - `attributes_to_ignore` defaults to empty.

use crate::extract::dot_path::split_path;
use crate::model::category::{CategoryId, DEFAULT_ROOT_CATEGORY_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read config `{path}`: {source}"),
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Settings of one category path transferor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    /// Dot path of the descriptor list inside each record.
    pub source_key_path: String,
    /// `false` aborts the run on the first failing record.
    pub continue_in_case_of_errors: bool,
    #[serde(default = "default_root_category_id")]
    pub root_category_id: CategoryId,
    /// Attribute codes never written onto newly created categories.
    #[serde(default)]
    pub attributes_to_ignore: BTreeSet<String>,
}

fn default_root_category_id() -> CategoryId {
    DEFAULT_ROOT_CATEGORY_ID
}

impl TransferConfig {
    /// Creates a config with default root and an empty ignore-set.
    pub fn new(source_key_path: impl Into<String>, continue_in_case_of_errors: bool) -> Self {
        Self {
            source_key_path: source_key_path.into(),
            continue_in_case_of_errors,
            root_category_id: DEFAULT_ROOT_CATEGORY_ID,
            attributes_to_ignore: BTreeSet::new(),
        }
    }

    pub fn with_root_category_id(mut self, root_category_id: CategoryId) -> Self {
        self.root_category_id = root_category_id;
        self
    }

    pub fn with_attributes_to_ignore<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes_to_ignore = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Checks field-level invariants not expressible in the serde schema.
    pub fn validate(&self) -> Result<(), ConfigError> {
        split_path(&self.source_key_path).map_err(|err| {
            ConfigError::Invalid(format!(
                "source_key_path `{}`: {err}",
                self.source_key_path
            ))
        })?;
        if self.root_category_id <= 0 {
            return Err(ConfigError::Invalid(format!(
                "root_category_id must be positive, got {}",
                self.root_category_id
            )));
        }
        if let Some(blank) = self
            .attributes_to_ignore
            .iter()
            .find(|code| code.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "attributes_to_ignore contains blank code `{blank}`"
            )));
        }
        Ok(())
    }
}
