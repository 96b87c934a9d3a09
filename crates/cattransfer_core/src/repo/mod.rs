//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define the storage contracts the transfer engine consumes:
//!   category store, record source and activity summary sink.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`ActivityNotFound`,
//!   `DuplicateChild`) in addition to DB transport errors.

pub mod activity_repo;
pub mod category_repo;
