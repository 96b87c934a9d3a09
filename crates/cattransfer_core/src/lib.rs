//! Core logic for transferring path-described categories from activity
//! records into a category hierarchy.

pub mod config;
pub mod db;
pub mod extract;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, TransferConfig};
pub use db::{SqliteTransactionManager, TransactionError, TransactionManager};
pub use extract::dot_path::{get_value, DotPathError};
pub use extract::path_extractor::{
    extract_descriptors, normalize_descriptor, try_extract_descriptors, ExtractionSkip,
    InvalidDescriptor,
};
pub use logging::{default_log_level, init_logging, logging_status, sanitize_field};
pub use model::activity::{Activity, ActivityId, ActivityRecord, TransferSummary};
pub use model::category::{
    CategoryAttributes, CategoryId, CategoryNode, CategoryPathDescriptor,
    DEFAULT_ROOT_CATEGORY_ID,
};
pub use repo::activity_repo::{
    ActivityRepoError, ActivityRepoResult, ActivitySummarySink, RecordSource,
    SqliteActivityRepository,
};
pub use repo::category_repo::{
    CategoryRepoError, CategoryRepoResult, CategoryStore, SqliteCategoryRepository,
};
pub use service::category_creator::{CategoryCreator, CreationError};
pub use service::category_resolver::{CategoryResolver, ResolveError};
pub use service::transfer_engine::{AbortError, RecordError, TransferEngine, TransferError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
