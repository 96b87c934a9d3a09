//! Transfer use-case services.
//!
//! # Responsibility
//! - Resolve and create category paths on top of repository primitives.
//! - Orchestrate per-record transfers with transactional isolation.

pub mod category_creator;
pub mod category_resolver;
pub mod transfer_engine;
