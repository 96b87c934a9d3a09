use cattransfer_core::db::open_db_in_memory;
use cattransfer_core::{
    ActivityId, ActivitySummarySink, CategoryAttributes, CategoryId, CategoryRepoResult,
    CategoryStore, CreationError, InvalidDescriptor, RecordError, SqliteActivityRepository,
    SqliteCategoryRepository, SqliteTransactionManager, TransactionError, TransactionManager,
    TransferConfig, TransferEngine, TransferError, TransferSummary, DEFAULT_ROOT_CATEGORY_ID,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::cell::Cell;

const TRANSFEROR: &str = "categories_by_path";

/// Category store that counts `create_child` calls.
struct CountingStore<'conn> {
    inner: SqliteCategoryRepository<'conn>,
    creates: Cell<usize>,
}

impl<'conn> CountingStore<'conn> {
    fn new(conn: &'conn Connection) -> Self {
        Self {
            inner: SqliteCategoryRepository::try_new(conn).unwrap(),
            creates: Cell::new(0),
        }
    }
}

impl CategoryStore for CountingStore<'_> {
    fn find_child_by_name(
        &self,
        parent_id: CategoryId,
        name: &str,
    ) -> CategoryRepoResult<Option<CategoryId>> {
        self.inner.find_child_by_name(parent_id, name)
    }

    fn create_child(
        &self,
        parent_id: CategoryId,
        name: &str,
        attributes: &CategoryAttributes,
    ) -> CategoryRepoResult<CategoryId> {
        self.creates.set(self.creates.get() + 1);
        self.inner.create_child(parent_id, name, attributes)
    }
}

/// Transaction manager that counts `begin` calls and can refuse commits
/// or report failed rollbacks.
struct RecordingTransactions<'conn> {
    inner: SqliteTransactionManager<'conn>,
    begins: Cell<usize>,
    fail_commit: bool,
    fail_rollback: bool,
}

impl<'conn> RecordingTransactions<'conn> {
    fn new(conn: &'conn Connection) -> Self {
        Self {
            inner: SqliteTransactionManager::new(conn),
            begins: Cell::new(0),
            fail_commit: false,
            fail_rollback: false,
        }
    }

    fn failing_commit(conn: &'conn Connection) -> Self {
        Self {
            fail_commit: true,
            ..Self::new(conn)
        }
    }

    /// Rolls back for real, then reports the rollback as failed.
    fn failing_rollback(conn: &'conn Connection) -> Self {
        Self {
            fail_rollback: true,
            ..Self::new(conn)
        }
    }
}

impl TransactionManager for RecordingTransactions<'_> {
    fn begin(&self) -> Result<(), TransactionError> {
        self.begins.set(self.begins.get() + 1);
        self.inner.begin()
    }

    fn commit(&self) -> Result<(), TransactionError> {
        if self.fail_commit {
            return Err(TransactionError::Commit(
                rusqlite::Error::InvalidQuery.into(),
            ));
        }
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), TransactionError> {
        self.inner.rollback()?;
        if self.fail_rollback {
            return Err(TransactionError::Rollback(
                rusqlite::Error::InvalidQuery.into(),
            ));
        }
        Ok(())
    }
}

fn seed_activity(conn: &Connection, records: &[(&str, Value)]) -> ActivityId {
    let repo = SqliteActivityRepository::try_new(conn).unwrap();
    let activity_id = repo.create_activity("catalog import").unwrap();
    for (identifier, data) in records {
        repo.append_record(activity_id, identifier, data).unwrap();
    }
    activity_id
}

fn record_with_paths(paths: &[&[&str]]) -> Value {
    let descriptors: Vec<Value> = paths
        .iter()
        .map(|path| json!({"path_array": path, "data": {"is_active": 1}}))
        .collect();
    json!({"refined": {"categories": descriptors}})
}

fn config(continue_in_case_of_errors: bool) -> TransferConfig {
    TransferConfig::new("refined.categories", continue_in_case_of_errors)
}

fn persisted_summary(conn: &Connection, activity_id: ActivityId) -> Option<TransferSummary> {
    SqliteActivityRepository::try_new(conn)
        .unwrap()
        .get_activity(activity_id)
        .unwrap()
        .summary()
}

fn find_path(conn: &Connection, path: &[&str]) -> Option<CategoryId> {
    let repo = SqliteCategoryRepository::try_new(conn).unwrap();
    let mut current = DEFAULT_ROOT_CATEGORY_ID;
    for name in path {
        current = repo.find_child_by_name(current, name).unwrap()?;
    }
    Some(current)
}

fn run(
    conn: &Connection,
    store: &CountingStore<'_>,
    transactions: &RecordingTransactions<'_>,
    config: TransferConfig,
    activity_id: ActivityId,
) -> Result<TransferSummary, TransferError> {
    let activities = SqliteActivityRepository::try_new(conn).unwrap();
    let engine = TransferEngine::try_new(&activities, store, transactions, &activities, config)
        .unwrap();
    engine.execute(activity_id, TRANSFEROR)
}

#[test]
fn records_without_paths_are_skipped_without_transactions() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", json!({"name": "no categories"})),
            ("sku-2", json!({"refined": {"categories": []}})),
            ("sku-3", json!({"refined": "scalar"})),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let summary = run(&conn, &store, &transactions, config(false), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 0, ko: 0 });
    assert_eq!(persisted_summary(&conn, activity_id), Some(summary));
    assert_eq!(transactions.begins.get(), 0);
    assert_eq!(store.creates.get(), 0);
}

#[test]
fn existing_path_resolves_without_creation() {
    let conn = open_db_in_memory().unwrap();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let men = categories
        .create_child(DEFAULT_ROOT_CATEGORY_ID, "Men", &CategoryAttributes::new())
        .unwrap();
    let shoes = categories
        .create_child(men, "Shoes", &CategoryAttributes::new())
        .unwrap();
    let activity_id = seed_activity(&conn, &[("sku-1", record_with_paths(&[&["Men", "Shoes"]]))]);
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let summary = run(&conn, &store, &transactions, config(false), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 1, ko: 0 });
    assert_eq!(store.creates.get(), 0);
    assert_eq!(find_path(&conn, &["Men", "Shoes"]), Some(shoes));
}

#[test]
fn missing_segments_are_created_below_existing_prefix() {
    let conn = open_db_in_memory().unwrap();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let men = categories
        .create_child(DEFAULT_ROOT_CATEGORY_ID, "Men", &CategoryAttributes::new())
        .unwrap();
    let activity_id = seed_activity(
        &conn,
        &[("sku-1", record_with_paths(&[&["Men", "Shoes", "Running"]]))],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let summary = run(&conn, &store, &transactions, config(false), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 1, ko: 0 });
    assert_eq!(store.creates.get(), 2);
    assert_eq!(find_path(&conn, &["Men"]), Some(men));
    assert_eq!(categories.list_children(DEFAULT_ROOT_CATEGORY_ID).unwrap().len(), 1);
    let running = find_path(&conn, &["Men", "Shoes", "Running"]).unwrap();
    assert_eq!(
        categories.attributes(running).unwrap().get("is_active"),
        Some(&json!(1))
    );
}

#[test]
fn same_path_in_second_record_resolves_to_same_leaf() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", record_with_paths(&[&["Home", "Kitchen"]])),
            ("sku-2", record_with_paths(&[&["Home", "Kitchen"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let summary = run(&conn, &store, &transactions, config(false), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 2, ko: 0 });
    assert_eq!(store.creates.get(), 2);
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let home = find_path(&conn, &["Home"]).unwrap();
    assert_eq!(categories.list_children(home).unwrap().len(), 1);
}

#[test]
fn failing_second_descriptor_rolls_back_first() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[("sku-1", record_with_paths(&[&["Garden", "Tools"], &["Garden", "  "]]))],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let summary = run(&conn, &store, &transactions, config(true), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 0, ko: 1 });
    assert_eq!(store.creates.get(), 2);
    assert_eq!(find_path(&conn, &["Garden"]), None);
    assert!(transactions.inner.is_autocommit());
}

#[test]
fn abort_persists_counts_and_stops_processing() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", record_with_paths(&[&["Toys"]])),
            ("sku-2", json!({})),
            ("sku-3", record_with_paths(&[&["Books", ""]])),
            ("sku-4", record_with_paths(&[&["Music"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let err = run(&conn, &store, &transactions, config(false), activity_id).unwrap_err();

    match err {
        TransferError::Aborted(abort) => {
            assert_eq!(abort.activity_id, activity_id);
            assert_eq!(abort.transferor, TRANSFEROR);
            assert_eq!(abort.entity_identifier, "sku-3");
            assert!(matches!(
                abort.cause,
                RecordError::Create(CreationError::InvalidPath(_))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        persisted_summary(&conn, activity_id),
        Some(TransferSummary { ok: 1, ko: 1 })
    );
    assert_eq!(transactions.begins.get(), 2);
    assert!(find_path(&conn, &["Toys"]).is_some());
    assert_eq!(find_path(&conn, &["Books"]), None);
    assert_eq!(find_path(&conn, &["Music"]), None);
}

#[test]
fn continue_on_error_processes_every_record() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", record_with_paths(&[&["Toys"]])),
            ("sku-2", record_with_paths(&[&[" "]])),
            ("sku-3", json!({"refined": {}})),
            ("sku-4", record_with_paths(&[&["Music", "Vinyl"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let summary = run(&conn, &store, &transactions, config(true), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 2, ko: 1 });
    assert_eq!(summary.processed(), 3);
    assert_eq!(persisted_summary(&conn, activity_id), Some(summary));
    assert!(find_path(&conn, &["Music", "Vinyl"]).is_some());
}

#[test]
fn rerunning_an_activity_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", record_with_paths(&[&["A", "B"], &["A", "C"]])),
            ("sku-2", record_with_paths(&[&["A", "B", "D"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let first = run(&conn, &store, &transactions, config(true), activity_id).unwrap();
    let created_by_first = store.creates.get();
    let second = run(&conn, &store, &transactions, config(true), activity_id).unwrap();

    assert_eq!(first, TransferSummary { ok: 2, ko: 0 });
    assert_eq!(second, TransferSummary { ok: 2, ko: 0 });
    assert_eq!(created_by_first, 4);
    assert_eq!(store.creates.get(), created_by_first);
}

#[test]
fn failed_commit_counts_as_transaction_failure() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(&conn, &[("sku-1", record_with_paths(&[&["Outdoor"]]))]);
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::failing_commit(&conn);

    let err = run(&conn, &store, &transactions, config(false), activity_id).unwrap_err();

    match err {
        TransferError::Aborted(abort) => assert!(matches!(
            abort.cause,
            RecordError::Transaction(TransactionError::Commit(_))
        )),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(find_path(&conn, &["Outdoor"]), None);
    assert_eq!(
        persisted_summary(&conn, activity_id),
        Some(TransferSummary { ok: 0, ko: 1 })
    );
}

#[test]
fn ignored_attributes_are_not_written_on_created_leaf() {
    let conn = open_db_in_memory().unwrap();
    let record = json!({
        "refined": {"categories": [{
            "path_array": ["Sale"],
            "data": {"url_key": "sale", "description": "Discounts"}
        }]}
    });
    let activity_id = seed_activity(&conn, &[("sku-1", record)]);
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    run(
        &conn,
        &store,
        &transactions,
        config(false).with_attributes_to_ignore(["url_key"]),
        activity_id,
    )
    .unwrap();

    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let sale = find_path(&conn, &["Sale"]).unwrap();
    let attributes = categories.attributes(sale).unwrap();
    assert!(!attributes.contains_key("url_key"));
    assert_eq!(attributes.get("description"), Some(&json!("Discounts")));
}

#[test]
fn paths_resolve_under_configured_root() {
    let conn = open_db_in_memory().unwrap();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let store_root = categories
        .create_child(DEFAULT_ROOT_CATEGORY_ID, "Default Category", &CategoryAttributes::new())
        .unwrap();
    let activity_id = seed_activity(&conn, &[("sku-1", record_with_paths(&[&["Bags"]]))]);
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    run(
        &conn,
        &store,
        &transactions,
        config(false).with_root_category_id(store_root),
        activity_id,
    )
    .unwrap();

    assert_eq!(find_path(&conn, &["Bags"]), None);
    assert!(find_path(&conn, &["Default Category", "Bags"]).is_some());
}

#[test]
fn unknown_activity_fails_before_processing() {
    let conn = open_db_in_memory().unwrap();
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let err = run(&conn, &store, &transactions, config(true), 404).unwrap_err();

    assert!(matches!(
        err,
        TransferError::Records {
            activity_id: 404,
            ..
        }
    ));
    assert_eq!(transactions.begins.get(), 0);
}

#[test]
fn transferor_label_is_opaque() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(&conn, &[("sku 1", record_with_paths(&[&["Men"]]))]);
    let activities = SqliteActivityRepository::try_new(&conn).unwrap();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let transactions = SqliteTransactionManager::new(&conn);
    let engine =
        TransferEngine::try_new(&activities, &categories, &transactions, &activities, config(true))
            .unwrap();

    let summary = engine
        .execute(activity_id, "categoriesByPathArray")
        .unwrap();

    assert_eq!(summary, TransferSummary { ok: 1, ko: 0 });
    assert_eq!(persisted_summary(&conn, activity_id), Some(summary));
    assert!(find_path(&conn, &["Men"]).is_some());
}

#[test]
fn malformed_descriptor_fails_record_and_aborts() {
    let conn = open_db_in_memory().unwrap();
    let record = json!({
        "refined": {"categories": [
            {"path_array": ["Men"]},
            {"name": "no path"}
        ]}
    });
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", record),
            ("sku-2", record_with_paths(&[&["Women"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let err = run(&conn, &store, &transactions, config(false), activity_id).unwrap_err();

    match err {
        TransferError::Aborted(abort) => {
            assert_eq!(abort.entity_identifier, "sku-1");
            assert!(matches!(
                abort.cause,
                RecordError::InvalidDescriptor(InvalidDescriptor { index: 1, .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transactions.begins.get(), 1);
    assert_eq!(store.creates.get(), 1);
    assert_eq!(find_path(&conn, &["Men"]), None);
    assert_eq!(find_path(&conn, &["Women"]), None);
    assert_eq!(
        persisted_summary(&conn, activity_id),
        Some(TransferSummary { ok: 0, ko: 1 })
    );
}

#[test]
fn malformed_descriptors_count_as_failures_when_continuing() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", json!({"refined": {"categories": [{"path_array": []}]}})),
            ("sku-2", json!({"refined": {"categories": [{"path_array": ["Men", 7]}]}})),
            ("sku-3", json!({"refined": {"categories": 12}})),
            ("sku-4", record_with_paths(&[&["Women"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::new(&conn);

    let summary = run(&conn, &store, &transactions, config(true), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 1, ko: 3 });
    assert_eq!(transactions.begins.get(), 4);
    assert!(find_path(&conn, &["Women"]).is_some());
}

#[test]
fn failed_rollback_is_reported_as_transaction_failure() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", record_with_paths(&[&["Garden", "Tools"], &["Garden", " "]])),
            ("sku-2", record_with_paths(&[&["Toys"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::failing_rollback(&conn);

    let err = run(&conn, &store, &transactions, config(false), activity_id).unwrap_err();

    match err {
        TransferError::Aborted(abort) => {
            assert_eq!(abort.entity_identifier, "sku-1");
            assert!(matches!(
                abort.cause,
                RecordError::Transaction(TransactionError::Rollback(_))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transactions.begins.get(), 1);
    assert_eq!(find_path(&conn, &["Toys"]), None);
    assert_eq!(
        persisted_summary(&conn, activity_id),
        Some(TransferSummary { ok: 0, ko: 1 })
    );
}

#[test]
fn failed_rollback_still_continues_when_allowed() {
    let conn = open_db_in_memory().unwrap();
    let activity_id = seed_activity(
        &conn,
        &[
            ("sku-1", record_with_paths(&[&[" "]])),
            ("sku-2", record_with_paths(&[&["Toys"]])),
        ],
    );
    let store = CountingStore::new(&conn);
    let transactions = RecordingTransactions::failing_rollback(&conn);

    let summary = run(&conn, &store, &transactions, config(true), activity_id).unwrap();

    assert_eq!(summary, TransferSummary { ok: 1, ko: 1 });
    assert!(find_path(&conn, &["Toys"]).is_some());
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let conn = open_db_in_memory().unwrap();
    let activities = SqliteActivityRepository::try_new(&conn).unwrap();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let transactions = SqliteTransactionManager::new(&conn);

    let result = TransferEngine::try_new(
        &activities,
        &categories,
        &transactions,
        &activities,
        TransferConfig::new("refined.", true),
    );
    assert!(result.is_err());
}
