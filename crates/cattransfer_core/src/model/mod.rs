//! Domain model for category path transfers.
//!
//! # Responsibility
//! - Define the category hierarchy read model and path descriptors.
//! - Define activities, their records and the ok/ko transfer summary.
//!
//! # Invariants
//! - Category ids are store-assigned integers and never reused.
//! - Activity records are read-only to the transfer core.

pub mod activity;
pub mod category;
