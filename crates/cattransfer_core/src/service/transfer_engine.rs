//! Category path transfer orchestration.
//!
//! # Responsibility
//! - Walk the records of one activity in source order.
//! - Resolve-or-create every extracted category path inside one transaction
//!   per record.
//! - Count committed (`ok`) and rolled back (`ko`) records and persist the
//!   summary once per run.
//!
//! # Invariants
//! - Records whose source field is absent or empty are skipped: no
//!   transaction, no counter.
//! - A malformed descriptor fails its record inside the transaction and
//!   counts as `ko`.
//! - All descriptor effects of one record commit or roll back together.
//! - The summary is persisted exactly once, on normal end and on abort.
//! - With `continue_in_case_of_errors = false` the first failing record ends
//!   the run and nothing after it is processed.

use crate::config::{ConfigError, TransferConfig};
use crate::db::transaction::{TransactionError, TransactionManager};
use crate::extract::path_extractor::{extract_descriptors, normalize_descriptor, InvalidDescriptor};
use crate::logging::{sanitize_field, sanitize_message, MAX_EVENT_MESSAGE_CHARS};
use crate::model::activity::{ActivityId, ActivityRecord, TransferSummary};
use crate::model::category::{CategoryId, CategoryPathDescriptor};
use crate::repo::activity_repo::{ActivityRepoError, ActivitySummarySink, RecordSource};
use crate::repo::category_repo::CategoryStore;
use crate::service::category_creator::{CategoryCreator, CreationError};
use crate::service::category_resolver::{CategoryResolver, ResolveError};
use log::{error, info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Why one record was rolled back.
#[derive(Debug)]
pub enum RecordError {
    InvalidDescriptor(InvalidDescriptor),
    Resolve(ResolveError),
    Create(CreationError),
    Transaction(TransactionError),
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDescriptor(err) => write!(f, "{err}"),
            Self::Resolve(err) => write!(f, "{err}"),
            Self::Create(err) => write!(f, "{err}"),
            Self::Transaction(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RecordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidDescriptor(err) => Some(err),
            Self::Resolve(err) => Some(err),
            Self::Create(err) => Some(err),
            Self::Transaction(err) => Some(err),
        }
    }
}

impl From<InvalidDescriptor> for RecordError {
    fn from(value: InvalidDescriptor) -> Self {
        Self::InvalidDescriptor(value)
    }
}

impl From<ResolveError> for RecordError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

impl From<CreationError> for RecordError {
    fn from(value: CreationError) -> Self {
        Self::Create(value)
    }
}

impl From<TransactionError> for RecordError {
    fn from(value: TransactionError) -> Self {
        Self::Transaction(value)
    }
}

/// Run stopped at a failing record because continuing was disabled.
#[derive(Debug)]
pub struct AbortError {
    pub activity_id: ActivityId,
    pub transferor: String,
    pub entity_identifier: String,
    pub cause: RecordError,
}

impl Display for AbortError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "activity {} transferor `{}` aborted at entity `{}` because continue_in_case_of_errors = false: {}",
            self.activity_id, self.transferor, self.entity_identifier, self.cause
        )
    }
}

impl Error for AbortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.cause)
    }
}

/// Errors returned by [`TransferEngine::execute`].
#[derive(Debug)]
pub enum TransferError {
    /// Records could not be loaded; nothing was processed.
    Records {
        activity_id: ActivityId,
        source: ActivityRepoError,
    },
    /// Every record was processed but the summary could not be persisted.
    Summary {
        activity_id: ActivityId,
        summary: TransferSummary,
        source: ActivityRepoError,
    },
    Aborted(AbortError),
}

impl Display for TransferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Records {
                activity_id,
                source,
            } => write!(f, "failed to load records of activity {activity_id}: {source}"),
            Self::Summary {
                activity_id,
                summary,
                source,
            } => write!(
                f,
                "failed to save summary ok={} ko={} for activity {activity_id}: {source}",
                summary.ok, summary.ko
            ),
            Self::Aborted(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TransferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Records { source, .. } => Some(source),
            Self::Summary { source, .. } => Some(source),
            Self::Aborted(err) => Some(err),
        }
    }
}

impl From<AbortError> for TransferError {
    fn from(value: AbortError) -> Self {
        Self::Aborted(value)
    }
}

/// Per-record state after processing.
#[derive(Debug)]
enum RecordOutcome {
    Skipped,
    Committed,
    RolledBack(RecordError),
}

/// Identity of one run, carried into every event line.
struct RunContext<'a> {
    run_id: Uuid,
    activity_id: ActivityId,
    transferor: &'a str,
    /// `transferor` rendered as a single log token.
    label: String,
    total: usize,
}

/// Mutable counters owned by one `execute` call.
#[derive(Debug, Default)]
struct RunProgress {
    step: usize,
    skipped: usize,
    summary: TransferSummary,
}

/// Transfers category paths found in activity records into the hierarchy.
pub struct TransferEngine<S, C, T, A> {
    records: S,
    categories: C,
    transactions: T,
    activities: A,
    config: TransferConfig,
}

impl<S, C, T, A> TransferEngine<S, C, T, A>
where
    S: RecordSource,
    C: CategoryStore,
    T: TransactionManager,
    A: ActivitySummarySink,
{
    /// Wires collaborators; rejects an invalid config.
    pub fn try_new(
        records: S,
        categories: C,
        transactions: T,
        activities: A,
        config: TransferConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            records,
            categories,
            transactions,
            activities,
            config,
        })
    }

    /// Runs the transfer for `activity_id` and returns the persisted summary.
    ///
    /// `transferor` is an opaque label; it only appears in events and in
    /// [`AbortError`].
    ///
    /// # Errors
    /// - `Aborted` when a record fails and continuing is disabled; the
    ///   summary up to and including that record is persisted first.
    /// - `Records` when records cannot be loaded.
    /// - `Summary` when the final summary cannot be persisted.
    pub fn execute(
        &self,
        activity_id: ActivityId,
        transferor: &str,
    ) -> Result<TransferSummary, TransferError> {
        let started_at = Instant::now();
        let run_id = Uuid::new_v4();
        let label = sanitize_field(transferor);
        info!(
            "event=transfer_run module=transfer status=start run_id={} activity_id={} transferor={} source={} root_category_id={} continue_on_error={}",
            run_id,
            activity_id,
            label,
            sanitize_field(&self.config.source_key_path),
            self.config.root_category_id,
            self.config.continue_in_case_of_errors
        );

        let records = self
            .records
            .records_for_activity(activity_id)
            .map_err(|source| {
                error!(
                    "event=transfer_run module=transfer status=error run_id={} activity_id={} error_code=records_load_failed error={}",
                    run_id,
                    activity_id,
                    sanitize_message(&source.to_string(), MAX_EVENT_MESSAGE_CHARS)
                );
                TransferError::Records {
                    activity_id,
                    source,
                }
            })?;

        let ctx = RunContext {
            run_id,
            activity_id,
            transferor,
            label,
            total: records.len(),
        };
        let mut progress = RunProgress::default();
        let exit = self.process_records(&ctx, &records, &mut progress);
        let persisted = self.finalize(&ctx, progress.summary);

        let status = if exit.is_ok() { "ok" } else { "aborted" };
        info!(
            "event=transfer_run module=transfer status={} run_id={} activity_id={} transferor={} ok={} ko={} skipped={} total={} duration_ms={}",
            status,
            run_id,
            activity_id,
            ctx.label,
            progress.summary.ok,
            progress.summary.ko,
            progress.skipped,
            ctx.total,
            started_at.elapsed().as_millis()
        );

        exit?;
        persisted.map_err(|source| TransferError::Summary {
            activity_id,
            summary: progress.summary,
            source,
        })?;
        Ok(progress.summary)
    }

    fn process_records(
        &self,
        ctx: &RunContext<'_>,
        records: &[ActivityRecord],
        progress: &mut RunProgress,
    ) -> Result<(), AbortError> {
        for record in records {
            match self.process_record(ctx, record, progress) {
                RecordOutcome::Skipped => progress.skipped += 1,
                RecordOutcome::Committed => progress.summary.ok += 1,
                RecordOutcome::RolledBack(cause) => {
                    progress.summary.ko += 1;
                    if !self.config.continue_in_case_of_errors {
                        return Err(AbortError {
                            activity_id: ctx.activity_id,
                            transferor: ctx.transferor.to_string(),
                            entity_identifier: record.entity_identifier.clone(),
                            cause,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn process_record(
        &self,
        ctx: &RunContext<'_>,
        record: &ActivityRecord,
        progress: &mut RunProgress,
    ) -> RecordOutcome {
        let elements = extract_descriptors(&record.data, &self.config.source_key_path);
        let Some((first, rest)) = elements.split_first() else {
            return RecordOutcome::Skipped;
        };

        let entity = sanitize_field(&record.entity_identifier);
        progress.step += 1;
        info!(
            "event=transfer_record module=transfer status=start run_id={} activity_id={} transferor={} entity={} step={}/{} paths={}",
            ctx.run_id,
            ctx.activity_id,
            ctx.label,
            entity,
            progress.step,
            ctx.total,
            elements.len()
        );

        match self.transfer_in_transaction(ctx, &entity, first, rest) {
            Ok(category_id) => {
                info!(
                    "event=transfer_record module=transfer status=ok run_id={} activity_id={} transferor={} entity={} category_id={}",
                    ctx.run_id, ctx.activity_id, ctx.label, entity, category_id
                );
                RecordOutcome::Committed
            }
            Err(err) => {
                warn!(
                    "event=transfer_record module=transfer status=error run_id={} activity_id={} transferor={} entity={} error_code={} error={}",
                    ctx.run_id,
                    ctx.activity_id,
                    ctx.label,
                    entity,
                    error_code(&err),
                    sanitize_message(&err.to_string(), MAX_EVENT_MESSAGE_CHARS)
                );
                RecordOutcome::RolledBack(err)
            }
        }
    }

    /// Applies every extracted element of one record between `begin` and
    /// `commit`, rolling back on the first failure.
    fn transfer_in_transaction(
        &self,
        ctx: &RunContext<'_>,
        entity: &str,
        first: &Value,
        rest: &[&Value],
    ) -> Result<CategoryId, RecordError> {
        self.transactions
            .begin()
            .map_err(|err| self.transaction_failed(ctx, entity, err, None))?;

        // Only the last descriptor's id is reported for the record.
        let applied = self.apply_element(0, first).and_then(|first_id| {
            rest.iter()
                .enumerate()
                .try_fold(first_id, |_, (offset, element)| {
                    self.apply_element(offset + 1, element)
                })
        });

        let cause = match applied {
            Ok(last_id) => match self.transactions.commit() {
                Ok(()) => return Ok(last_id),
                Err(err) => self.transaction_failed(ctx, entity, err, None),
            },
            Err(err) => err,
        };

        match self.transactions.rollback() {
            Ok(()) => Err(cause),
            Err(rollback_err) => {
                Err(self.transaction_failed(ctx, entity, rollback_err, Some(&cause)))
            }
        }
    }

    fn apply_element(&self, index: usize, element: &Value) -> Result<CategoryId, RecordError> {
        let descriptor = normalize_descriptor(index, element)?;
        self.resolve_or_create(&descriptor)
    }

    fn resolve_or_create(
        &self,
        descriptor: &CategoryPathDescriptor,
    ) -> Result<CategoryId, RecordError> {
        let root_id = self.config.root_category_id;
        let resolver = CategoryResolver::new(&self.categories);
        match resolver.resolve(&descriptor.path_array, root_id) {
            Ok(id) => Ok(id),
            Err(ResolveError::NotFound { .. }) => {
                let creator = CategoryCreator::new(&self.categories);
                let id = creator.get_or_create(
                    &descriptor.path_array,
                    root_id,
                    &descriptor.data,
                    &self.config.attributes_to_ignore,
                )?;
                Ok(id)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Logs a failed transaction boundary at error level; store state is
    /// unverified after this. `cause` is the failure that led to it.
    fn transaction_failed(
        &self,
        ctx: &RunContext<'_>,
        entity: &str,
        err: TransactionError,
        cause: Option<&RecordError>,
    ) -> RecordError {
        let cause = cause.map_or_else(
            || "-".to_string(),
            |cause| sanitize_message(&cause.to_string(), MAX_EVENT_MESSAGE_CHARS),
        );
        error!(
            "event=transfer_transaction module=transfer status=error run_id={} activity_id={} transferor={} entity={} stage={} error_code=transaction_failed error={} cause={}",
            ctx.run_id,
            ctx.activity_id,
            ctx.label,
            entity,
            err.stage(),
            sanitize_message(&err.to_string(), MAX_EVENT_MESSAGE_CHARS),
            cause
        );
        RecordError::Transaction(err)
    }

    /// Persists `summary` onto the activity. Called once per run.
    fn finalize(
        &self,
        ctx: &RunContext<'_>,
        summary: TransferSummary,
    ) -> Result<(), ActivityRepoError> {
        let result = self
            .activities
            .get_activity(ctx.activity_id)
            .and_then(|mut activity| {
                activity.merge_extra(summary);
                self.activities.save_activity(&activity)
            });
        if let Err(err) = &result {
            error!(
                "event=transfer_summary module=transfer status=error run_id={} activity_id={} ok={} ko={} error_code=summary_save_failed error={}",
                ctx.run_id,
                ctx.activity_id,
                summary.ok,
                summary.ko,
                sanitize_message(&err.to_string(), MAX_EVENT_MESSAGE_CHARS)
            );
        }
        result
    }
}

fn error_code(err: &RecordError) -> &'static str {
    match err {
        RecordError::InvalidDescriptor(_) => "invalid_descriptor",
        RecordError::Transaction(_) => "transaction_failed",
        RecordError::Create(create) if create.is_retryable() => "category_conflict",
        RecordError::Create(_) => "category_create_failed",
        RecordError::Resolve(_) => "category_resolve_failed",
    }
}
