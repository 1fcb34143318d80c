//! CSV bootstrap import
//!
//! Server-side bulk load of a seeded CSV file. The LOAD statement binds
//! every CSV column to a user variable and coerces each table column with
//! value-driven CASE logic: blanks to NULL, boolean words to 1/0, sentinel
//! dates to NULL, ISO and space-separated datetimes through STR_TO_DATE,
//! bare numerics through CAST, everything else trimmed text. Identifier
//! columns (`StockId`, `ItemCode`) skip the boolean and numeric branches
//! so leading zeros survive.

use std::path::Path;
use std::sync::Arc;

use sqlx::Row;
use tokio::fs;
use tracing::{info, warn};

use crate::infra::target::{quote_ident, TargetStore};
use crate::infra::{BridgeError, Result};

/// Columns whose CSV values must keep their exact text form.
const PROTECTED_COLUMNS: &[&str] = &["StockId", "ItemCode"];

/// Sentinel dates emitted by the source for "no value".
const SENTINEL_DATES: &[&str] = &["1899-12-30", "1900-01-01T00:00:00.000Z", "0000-00-00"];

/// Result of one bulk import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    pub affected_rows: u64,
    pub skipped_rows: u64,
}

/// Server-side CSV importer
pub struct CsvImporter {
    target: Arc<TargetStore>,
}

impl CsvImporter {
    pub fn new(target: Arc<TargetStore>) -> Self {
        Self { target }
    }

    /// Import `file_path` into `table` within `database`.
    ///
    /// The file is unlinked after a successful import; on failure the
    /// caller owns cleanup.
    pub async fn import(
        &self,
        database: &str,
        table: &str,
        file_path: &Path,
    ) -> Result<ImportOutcome> {
        let actual_table = self
            .target
            .resolve_table_name(database, table)
            .await?
            .ok_or_else(|| {
                BridgeError::Validation(format!("target table {table} does not exist"))
            })?;

        let table_columns = self.target.table_columns(database, &actual_table).await?;
        if table_columns.is_empty() {
            return Err(BridgeError::Validation(format!(
                "target table {actual_table} has no columns"
            )));
        }

        let head = read_head(file_path).await?;
        let line_ending = detect_line_ending(&head);
        let csv_columns = parse_header(&head)?;

        let outcome = self
            .execute_load(database, &actual_table, file_path, &csv_columns, &table_columns, line_ending)
            .await?;

        info!(
            database,
            table = %actual_table,
            affected = outcome.affected_rows,
            skipped = outcome.skipped_rows,
            "csv import complete"
        );

        fs::remove_file(file_path).await.ok();
        Ok(outcome)
    }

    async fn execute_load(
        &self,
        database: &str,
        table: &str,
        file_path: &Path,
        csv_columns: &[String],
        table_columns: &[String],
        line_ending: &str,
    ) -> Result<ImportOutcome> {
        // Probe order: stream through the client iff the server allows it,
        // else stage the file into the server's secure directory.
        if self.target.local_infile_enabled(database).await? {
            let sql = build_load_statement(
                table,
                &file_path.to_string_lossy(),
                csv_columns,
                table_columns,
                line_ending,
                true,
            );
            return self.run_load(database, &sql).await;
        }

        if let Some(secure_dir) = self.target.secure_file_priv(database).await? {
            let file_name = file_path
                .file_name()
                .ok_or_else(|| BridgeError::Upload("import path has no file name".into()))?;
            let staged = Path::new(&secure_dir).join(file_name);
            fs::copy(file_path, &staged).await?;

            let sql = build_load_statement(
                table,
                &staged.to_string_lossy(),
                csv_columns,
                table_columns,
                line_ending,
                false,
            );
            let result = self.run_load(database, &sql).await;

            if let Err(e) = fs::remove_file(&staged).await {
                warn!(path = %staged.display(), error = %e, "failed to delete staged copy");
            }
            return result;
        }

        Err(BridgeError::BulkLoadUnavailable(
            "server has local_infile disabled and no secure_file_priv directory configured"
                .to_string(),
        ))
    }

    async fn run_load(&self, database: &str, sql: &str) -> Result<ImportOutcome> {
        // LOAD DATA and its warnings must observe the same session.
        let mut conn = self.target.acquire(database).await?;

        let result = sqlx::query(sql).execute(&mut *conn).await?;
        let affected_rows = result.rows_affected();

        let warnings = sqlx::query("SHOW WARNINGS").fetch_all(&mut *conn).await?;
        let mut skipped_rows = 0u64;
        for row in &warnings {
            let code = row
                .try_get::<u32, _>("Code")
                .or_else(|_| row.try_get::<i64, _>("Code").map(|v| v as u32))
                .unwrap_or(0);
            if code == 1062 {
                skipped_rows += 1;
            }
        }

        if !warnings.is_empty() {
            warn!(
                database,
                warnings = warnings.len(),
                duplicates = skipped_rows,
                "bulk load produced warnings"
            );
        }

        Ok(ImportOutcome {
            affected_rows,
            skipped_rows,
        })
    }
}

/// Read the leading bytes of the file: enough for the header line and
/// line-ending detection without pulling a multi-gigabyte seed into memory.
async fn read_head(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = fs::File::open(path).await?;
    let mut buf = vec![0u8; 64 * 1024];
    let n = file.read(&mut buf).await?;
    buf.truncate(n);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Detect the line terminator from the file contents.
pub fn detect_line_ending(head: &str) -> &'static str {
    if head.contains("\r\n") {
        "\\r\\n"
    } else {
        "\\n"
    }
}

/// Parse the CSV header line into column names, stripping quotes and
/// whitespace.
pub fn parse_header(head: &str) -> Result<Vec<String>> {
    let line = head
        .lines()
        .next()
        .ok_or_else(|| BridgeError::Upload("csv file is empty".into()))?;

    let columns: Vec<String> = line
        .split(',')
        .map(|c| c.trim().trim_matches('"').trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    if columns.is_empty() {
        return Err(BridgeError::Upload("csv header has no columns".into()));
    }
    Ok(columns)
}

/// Whether a column's CSV values must be kept textual.
pub fn is_protected_column(column: &str) -> bool {
    PROTECTED_COLUMNS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(column))
}

fn sanitise_variable(name: &str, index: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("col_{index}")
    } else {
        cleaned
    }
}

/// The coercion expression applied to one table column, reading from the
/// bound user variable.
pub fn coercion_expr(column: &str, variable: &str) -> String {
    let v = format!("TRIM({variable})");
    let mut branches = vec![format!(
        "WHEN {variable} IS NULL OR {v} = '' THEN NULL"
    )];

    let protected = is_protected_column(column);
    if !protected {
        branches.push(format!(
            "WHEN LOWER({v}) IN ('true', 'yes', 'y', 'on') THEN 1"
        ));
        branches.push(format!(
            "WHEN LOWER({v}) IN ('false', 'no', 'n', 'off') THEN 0"
        ));
    }

    branches.push(format!(
        "WHEN {v} LIKE '{}%' OR {v} = '{}' OR {v} = '{}' THEN NULL",
        SENTINEL_DATES[0], SENTINEL_DATES[1], SENTINEL_DATES[2]
    ));

    branches.push(format!(
        "WHEN {v} REGEXP '^[0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}}T[0-9]{{2}}:[0-9]{{2}}:[0-9]{{2}}' \
         THEN STR_TO_DATE(SUBSTRING({v}, 1, 19), '%Y-%m-%dT%H:%i:%s')"
    ));
    branches.push(format!(
        "WHEN {v} REGEXP '^[0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}} [0-9]{{2}}:[0-9]{{2}}:[0-9]{{2}}' \
         THEN STR_TO_DATE(SUBSTRING({v}, 1, 19), '%Y-%m-%d %H:%i:%s')"
    ));
    branches.push(format!(
        "WHEN {v} REGEXP '^[0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}}$' THEN STR_TO_DATE({v}, '%Y-%m-%d')"
    ));

    if !protected {
        branches.push(format!(
            "WHEN {v} REGEXP '^-?[0-9]+$' THEN CAST({v} AS SIGNED)"
        ));
        branches.push(format!(
            "WHEN {v} REGEXP '^-?[0-9]+\\\\.[0-9]+$' THEN CAST({v} AS DECIMAL(18,4))"
        ));
    }

    format!("CASE {} ELSE {v} END", branches.join(" "))
}

/// Build the full LOAD DATA statement.
///
/// CSV columns bind to user variables; table columns pair with CSV columns
/// by positional index and each gets a coercion SET expression. Surplus
/// CSV columns are read and dropped; surplus table columns keep their
/// defaults.
pub fn build_load_statement(
    table: &str,
    file_path: &str,
    csv_columns: &[String],
    table_columns: &[String],
    line_ending: &str,
    local: bool,
) -> String {
    let variables: Vec<String> = csv_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("@{}", sanitise_variable(c, i)))
        .collect();

    let sets: Vec<String> = table_columns
        .iter()
        .zip(variables.iter())
        .map(|(col, var)| format!("{} = {}", quote_ident(col), coercion_expr(col, var)))
        .collect();

    format!(
        "LOAD DATA {}INFILE '{}' IGNORE INTO TABLE {} \
         FIELDS TERMINATED BY ',' OPTIONALLY ENCLOSED BY '\"' \
         LINES TERMINATED BY '{}' \
         IGNORE 1 ROWS ({}) SET {}",
        if local { "LOCAL " } else { "" },
        file_path.replace('\\', "\\\\").replace('\'', "\\'"),
        quote_ident(table),
        line_ending,
        variables.join(", "),
        sets.join(", ")
    )
}
