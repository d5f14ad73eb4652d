//! Integration tests for batched row storage and index writes.
//!
//! Run with: cargo test -p sheetfind-store --test test_batch_writer

use sheetfind_store::schema::migrate;
use std::time::Duration;

use sheetfind_store::{
    BatchWriter, Catalog, Connection, FileId, PoolConfig, ReconcileReport, Reconciler, RetryConfig,
    RowBatch, RowId, SheetFindError, Transaction,
};
use tempfile::TempDir;

/// Helper to open a migrated database holding one registered file
async fn setup() -> (TempDir, Connection, FileId) {
    let dir = tempfile::tempdir().expect("temp dir");
    let conn = Connection::open(dir.path().join("batch.db"), PoolConfig::default())
        .await
        .expect("open database");
    migrate(&conn).await.expect("migrate");

    let catalog = Catalog::new(conn.clone());
    let user = catalog.create_user("ana@example.com").await.unwrap();
    let folder = catalog.create_folder(user.id, "Relatorios").await.unwrap();
    let file = catalog
        .register_file(folder.id, "norte.xlsx", "uploads/norte.xlsx")
        .await
        .unwrap();
    (dir, conn, file.id)
}

/// Helper to build a batch from literal rows
fn batch_of(rows: &[&[&str]]) -> RowBatch {
    let mut batch = RowBatch::with_capacity(rows.len());
    for row in rows {
        batch.push(*row).unwrap();
    }
    batch
}

async fn count(conn: &Connection, sql: &str) -> i64 {
    sqlx::query_scalar(sql)
        .fetch_one(conn.pool())
        .await
        .expect("count query")
}

/// Makes any row whose content mentions POISON fail to insert.
async fn install_poison_trigger(conn: &Connection) {
    sqlx::query(
        "CREATE TRIGGER poison_rows BEFORE INSERT ON sheet_rows \
         WHEN NEW.raw_content LIKE '%POISON%' \
         BEGIN SELECT RAISE(ABORT, 'poisoned row'); END",
    )
    .execute(conn.pool())
    .await
    .expect("create trigger");
}

#[tokio::test]
async fn test_write_stores_and_indexes_every_row() {
    let (_dir, conn, file) = setup().await;
    let writer = BatchWriter::new(conn.clone());

    let outcome = writer
        .write(
            file,
            &batch_of(&[&["Financeiro", "Norte"], &["Contabilidade"], &["", "x"]]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.stored(), 3);
    assert_eq!(outcome.indexed(), 3);
    assert!(outcome.index_failures.is_empty());
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_rows").await, 3);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_fts").await, 3);
}

#[tokio::test]
async fn test_index_entries_share_row_identity() {
    let (_dir, conn, file) = setup().await;
    let writer = BatchWriter::new(conn.clone());

    let outcome = writer
        .write(file, &batch_of(&[&["Financeiro", "Norte"], &["Contabilidade"]]))
        .await
        .unwrap();

    for (row_id, expected) in outcome.row_ids.iter().zip(["Financeiro Norte", "Contabilidade"]) {
        let (content, file_id): (String, i64) =
            sqlx::query_as("SELECT content, file_id FROM sheet_fts WHERE rowid = ?")
                .bind(*row_id)
                .fetch_one(conn.pool())
                .await
                .unwrap();
        assert_eq!(content, expected);
        assert_eq!(file_id, file.0);

        let raw: String = sqlx::query_scalar("SELECT raw_content FROM sheet_rows WHERE id = ?")
            .bind(*row_id)
            .fetch_one(conn.pool())
            .await
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Vec<String>>(&raw).unwrap().join(" "),
            expected
        );
    }

    // No index entry exists without a row behind it.
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM sheet_fts WHERE rowid NOT IN (SELECT id FROM sheet_rows)"
        )
        .await,
        0
    );
}

#[tokio::test]
async fn test_row_ids_follow_batch_order() {
    let (_dir, conn, file) = setup().await;
    let writer = BatchWriter::new(conn.clone());

    let first = writer.write(file, &batch_of(&[&["a"], &["b"]])).await.unwrap();
    let second = writer.write(file, &batch_of(&[&["c"]])).await.unwrap();

    let mut ids = first.row_ids.clone();
    ids.extend(second.row_ids);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing: {:?}", ids);
}

#[tokio::test]
async fn test_row_failure_rolls_back_whole_batch() {
    let (_dir, conn, file) = setup().await;
    install_poison_trigger(&conn).await;
    let writer = BatchWriter::new(conn.clone());

    let err = writer
        .write(file, &batch_of(&[&["ok 1"], &["POISON"], &["ok 2"]]))
        .await
        .unwrap_err();

    assert!(matches!(err, SheetFindError::BatchTransaction(_)), "got {:?}", err);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_rows").await, 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_fts").await, 0);

    // The writer stays usable for the next batch.
    let outcome = writer.write(file, &batch_of(&[&["ok 3"]])).await.unwrap();
    assert_eq!(outcome.stored(), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_rows").await, 1);
}

#[tokio::test]
async fn test_index_failure_keeps_row_and_reports_it() {
    let (_dir, conn, file) = setup().await;
    let writer = BatchWriter::new(conn.clone());
    let first = writer.write(file, &batch_of(&[&["seed"]])).await.unwrap();
    let next_id = first.row_ids[0].0 + 1;

    // Occupy the index slot the next row will be assigned.
    sqlx::query("INSERT INTO sheet_fts (rowid, content, file_id) VALUES (?, 'stale', ?)")
        .bind(next_id)
        .bind(file)
        .execute(conn.pool())
        .await
        .unwrap();

    let outcome = writer
        .write(file, &batch_of(&[&["Financeiro"], &["Norte"]]))
        .await
        .unwrap();

    assert_eq!(outcome.stored(), 2);
    assert_eq!(outcome.indexed(), 1);
    assert_eq!(outcome.index_failures.len(), 1);
    assert_eq!(outcome.index_failures[0].row_id, RowId(next_id));

    let err: SheetFindError = outcome.index_failures[0].clone().into();
    assert!(matches!(err, SheetFindError::IndexInsert { row_id, .. } if row_id == next_id));

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_rows").await, 3);
}

#[tokio::test]
async fn test_reconciler_reindexes_rows_missing_from_index() {
    let (_dir, conn, file) = setup().await;
    let writer = BatchWriter::new(conn.clone());
    let outcome = writer
        .write(file, &batch_of(&[&["Financeiro", "Norte"], &["Contabilidade"], &["Vendas"]]))
        .await
        .unwrap();

    for row_id in &outcome.row_ids[..2] {
        sqlx::query("DELETE FROM sheet_fts WHERE rowid = ?")
            .bind(*row_id)
            .execute(conn.pool())
            .await
            .unwrap();
    }

    let reconciler = Reconciler::new(conn.clone()).with_chunk_size(1);
    assert_eq!(reconciler.missing_count(None).await.unwrap(), 2);
    assert_eq!(reconciler.missing_count(Some(file)).await.unwrap(), 2);
    assert_eq!(reconciler.missing_count(Some(FileId(file.0 + 100))).await.unwrap(), 0);

    let report = reconciler.sweep(Some(file)).await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.reindexed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(reconciler.missing_count(None).await.unwrap(), 0);

    let content: String = sqlx::query_scalar("SELECT content FROM sheet_fts WHERE rowid = ?")
        .bind(outcome.row_ids[0])
        .fetch_one(conn.pool())
        .await
        .unwrap();
    assert_eq!(content, "Financeiro Norte");

    // Nothing left to do.
    assert_eq!(reconciler.sweep(None).await.unwrap(), ReconcileReport::default());
}

/// Opens a second pool on the same database that gives up on the write lock quickly.
async fn impatient_connection(dir: &TempDir) -> Connection {
    let config = PoolConfig {
        busy_timeout_ms: 50,
        ..PoolConfig::default()
    };
    Connection::open(dir.path().join("batch.db"), config)
        .await
        .expect("open second pool")
}

/// Takes the database write lock and keeps it until the transaction ends.
async fn hold_write_lock(conn: &Connection) -> Transaction {
    let mut tx = Transaction::begin(conn).await.unwrap();
    sqlx::query("INSERT INTO users (email) VALUES ('lock@example.com')")
        .execute(tx.conn())
        .await
        .unwrap();
    tx
}

#[tokio::test]
async fn test_busy_database_without_retry_drops_batch() {
    let (dir, conn, file) = setup().await;
    let impatient = impatient_connection(&dir).await;
    let writer = BatchWriter::new(impatient).with_retry(RetryConfig::no_retry());

    let blocker = hold_write_lock(&conn).await;
    let result = writer.write(file, &batch_of(&[&["a"], &["b"]])).await;
    blocker.rollback().await.unwrap();

    match result {
        Err(SheetFindError::BatchTransaction(msg)) => assert!(msg.contains("locked"), "{}", msg),
        other => panic!("Expected BatchTransaction error, got {:?}", other),
    }
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_rows").await, 0);
}

#[tokio::test]
async fn test_busy_database_is_retried() {
    let (dir, conn, file) = setup().await;
    let impatient = impatient_connection(&dir).await;
    let writer = BatchWriter::new(impatient).with_retry(RetryConfig {
        max_retries: 3,
        initial_delay_ms: 300,
        max_delay_ms: 1000,
        backoff_multiplier: 1.0,
    });

    let blocker = hold_write_lock(&conn).await;
    let pending = tokio::spawn(async move {
        writer.write(file, &batch_of(&[&["a"], &["b"]])).await
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    blocker.commit().await.unwrap();

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome.stored(), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_rows").await, 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sheet_fts").await, 2);
}
