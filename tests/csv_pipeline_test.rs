//! CSV bootstrap pipeline tests: reassembly, persistence, and the
//! generated LOAD statement. No live target store is required.

mod common;

use posbridge::infra::csv_import::{
    build_load_statement, coercion_expr, detect_line_ending, parse_header,
};
use posbridge::infra::uploads::{ChunkAccumulator, UploadStore};

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn header_and_line_ending_from_fixture() {
    let csv = common::stock_csv();
    assert_eq!(detect_line_ending(csv), "\\r\\n");
    assert_eq!(
        parse_header(csv).unwrap(),
        vec!["StockId", "Description", "Qty", "Price"]
    );
}

#[test]
fn stock_seed_preserves_leading_zeros() {
    // The StockId column is protected: its coercion keeps "007" textual
    // instead of casting it to 7.
    let csv_cols = columns(&["StockId", "Description", "Qty", "Price"]);
    let table_cols = columns(&["StockId", "Description", "Qty", "Price"]);
    let sql = build_load_statement(
        "StockItems",
        "/uploads/socket-1/stock.csv",
        &csv_cols,
        &table_cols,
        "\\r\\n",
        true,
    );

    let stock_set = sql
        .split("`StockId` = ")
        .nth(1)
        .and_then(|rest| rest.split(", `Description`").next())
        .unwrap();
    assert!(!stock_set.contains("CAST"));
    assert!(stock_set.ends_with("ELSE TRIM(@StockId) END"));

    // Qty is not protected and does get the numeric branches.
    assert!(sql.contains("`Qty` = CASE"));
    assert!(sql.contains("CAST(TRIM(@Qty) AS SIGNED)"));
}

#[test]
fn coercion_handles_sentinel_dates_and_datetimes() {
    let expr = coercion_expr("CreatedAt", "@CreatedAt");
    assert!(expr.contains("LIKE '1899-12-30%'"));
    assert!(expr.contains("= '1900-01-01T00:00:00.000Z'"));
    assert!(expr.contains("= '0000-00-00'"));
    assert!(expr.contains("STR_TO_DATE(SUBSTRING(TRIM(@CreatedAt), 1, 19), '%Y-%m-%dT%H:%i:%s')"));
    assert!(expr.contains("STR_TO_DATE(SUBSTRING(TRIM(@CreatedAt), 1, 19), '%Y-%m-%d %H:%i:%s')"));
    assert!(expr.contains("STR_TO_DATE(TRIM(@CreatedAt), '%Y-%m-%d')"));
}

#[test]
fn load_statement_is_idempotent_by_construction() {
    // IGNORE keeps re-imports from duplicating rows: the second run's
    // duplicate keys downgrade to warnings.
    let cols = columns(&["StockId", "Qty"]);
    let sql = build_load_statement("StockItems", "/tmp/stock.csv", &cols, &cols, "\\n", true);
    assert!(sql.contains("INFILE '/tmp/stock.csv' IGNORE INTO TABLE"));
    assert!(sql.contains("IGNORE 1 ROWS"));
}

#[tokio::test]
async fn single_shot_upload_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = UploadStore::new(dir.path());

    let path = store
        .persist("socket-1", "stock.csv", common::stock_csv().as_bytes())
        .await
        .unwrap();
    assert_eq!(
        tokio::fs::read(&path).await.unwrap(),
        common::stock_csv().as_bytes()
    );

    store.remove(&path).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn chunked_upload_reassembles_and_persists() {
    let bytes = common::stock_csv().as_bytes();
    let mid = bytes.len() / 2;

    let mut acc =
        ChunkAccumulator::new("pos_239", "StockItems", "stock.csv", 2, bytes.len() as u64, 3)
            .unwrap();
    // Chunks arrive out of order.
    acc.add_chunk(1, bytes[mid..].to_vec()).unwrap();
    acc.add_chunk(0, bytes[..mid].to_vec()).unwrap();
    assert!(acc.is_complete());

    let assembled = acc.assemble().unwrap();
    assert_eq!(assembled, bytes);

    let dir = tempfile::tempdir().unwrap();
    let store = UploadStore::new(dir.path());
    let path = store
        .persist("socket-2", "stock.csv", &assembled)
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), bytes);
}

#[test]
fn incomplete_upload_cannot_assemble() {
    let mut acc = ChunkAccumulator::new("pos_239", "StockItems", "stock.csv", 3, 9, 3).unwrap();
    acc.add_chunk(0, b"abc".to_vec()).unwrap();
    let err = acc.assemble().unwrap_err();
    assert!(err.to_string().contains("missing chunks"));
}
