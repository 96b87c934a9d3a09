//! Category path extraction from nested activity records.
//!
//! # Responsibility
//! - Address nested record fields with the dot convention.
//! - Normalize the addressed value into category path descriptors.
//!
//! # Invariants
//! - Extraction never fails loudly: anything unusable is a silent skip.

pub mod dot_path;
pub mod path_extractor;
