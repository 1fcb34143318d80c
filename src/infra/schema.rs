//! Schema Materialiser
//!
//! Creates target tables from the column/index descriptor a terminal
//! supplies, then applies the business-type secondary-index bundle.
//! Column nullability is deliberately relaxed: later CSV seeding imports
//! may contain empty cells that would violate the source constraint, so
//! NOT NULL survives only on identity, defaulted, or key columns.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::BusinessType;
use crate::infra::target::{quote_ident, TargetStore};
use crate::infra::{BridgeError, Result};

/// Table descriptor as supplied by the client on `create_table_from_schema`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default, rename = "primaryKeys")]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

/// One column of the source table, information-schema style
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDescriptor {
    #[serde(rename = "COLUMN_NAME")]
    pub name: String,
    #[serde(rename = "DATA_TYPE")]
    pub data_type: String,
    #[serde(rename = "CHARACTER_MAXIMUM_LENGTH", default)]
    pub char_max_length: Option<Value>,
    #[serde(rename = "NUMERIC_PRECISION", default)]
    pub numeric_precision: Option<Value>,
    #[serde(rename = "NUMERIC_SCALE", default)]
    pub numeric_scale: Option<Value>,
    #[serde(rename = "IS_NULLABLE", default)]
    pub is_nullable: Option<Value>,
    #[serde(rename = "COLUMN_DEFAULT", default)]
    pub column_default: Option<Value>,
    #[serde(rename = "IS_IDENTITY", default)]
    pub is_identity: Option<Value>,
    #[serde(rename = "COLUMN_KEY", default)]
    pub column_key: Option<String>,
}

/// A secondary index supplied alongside the columns
#[derive(Debug, Clone, Deserialize)]
pub struct IndexDescriptor {
    #[serde(rename = "INDEX_NAME", alias = "name")]
    pub name: String,
    #[serde(default, rename = "IS_UNIQUE", alias = "unique")]
    pub unique: bool,
    #[serde(default)]
    pub columns: Vec<IndexColumn>,
}

/// Index column, either a bare name or a name with direction
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IndexColumn {
    Name(String),
    Detailed {
        #[serde(rename = "COLUMN_NAME", alias = "name")]
        name: String,
        #[serde(default, alias = "direction")]
        descending: Option<Value>,
    },
}

impl IndexColumn {
    fn render(&self) -> String {
        match self {
            IndexColumn::Name(name) => quote_ident(name),
            IndexColumn::Detailed { name, descending } => {
                let desc = match descending {
                    Some(Value::Bool(true)) => true,
                    Some(Value::String(s)) => s.eq_ignore_ascii_case("DESC"),
                    Some(Value::Number(n)) => n.as_i64() == Some(1),
                    _ => false,
                };
                if desc {
                    format!("{} DESC", quote_ident(name))
                } else {
                    quote_ident(name)
                }
            }
        }
    }
}

static NUMERIC_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

fn loose_i64(value: &Option<Value>) -> Option<i64> {
    match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_truthy(value: &Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes")
        }
        _ => false,
    }
}

impl ColumnDescriptor {
    fn nullable(&self) -> bool {
        match &self.is_nullable {
            Some(Value::String(s)) => {
                !(s.eq_ignore_ascii_case("NO") || s.eq_ignore_ascii_case("false") || s == "0")
            }
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() != Some(0),
            None => true,
            _ => true,
        }
    }

    fn identity(&self) -> bool {
        loose_truthy(&self.is_identity)
    }

    fn is_primary(&self) -> bool {
        self.column_key
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("PRI"))
            .unwrap_or(false)
    }
}

/// Map a source column type to the target dialect.
fn render_column_type(column: &ColumnDescriptor) -> String {
    let length = loose_i64(&column.char_max_length);
    match column.data_type.to_ascii_uppercase().as_str() {
        "INT" | "INTEGER" => "INT".to_string(),
        "BIGINT" => "BIGINT".to_string(),
        "SMALLINT" => "SMALLINT".to_string(),
        "TINYINT" => "TINYINT".to_string(),
        "DECIMAL" | "NUMERIC" | "MONEY" => {
            let precision = loose_i64(&column.numeric_precision).unwrap_or(18);
            let scale = loose_i64(&column.numeric_scale).unwrap_or(0);
            format!("DECIMAL({precision},{scale})")
        }
        "FLOAT" => "FLOAT".to_string(),
        "REAL" => "DOUBLE".to_string(),
        "VARCHAR" | "NVARCHAR" => match length {
            Some(l) if l > 0 => format!("VARCHAR({l})"),
            // MAX arrives as -1 from the source information schema
            Some(_) => "TEXT".to_string(),
            None => "VARCHAR(255)".to_string(),
        },
        "CHAR" | "NCHAR" => match length {
            Some(l) if l > 0 => format!("CHAR({l})"),
            _ => "CHAR(1)".to_string(),
        },
        "TEXT" | "NTEXT" => "TEXT".to_string(),
        "DATETIME" | "DATETIME2" | "SMALLDATETIME" => "DATETIME".to_string(),
        "DATE" => "DATE".to_string(),
        "TIME" => "TIME".to_string(),
        "TIMESTAMP" => "TIMESTAMP".to_string(),
        "BIT" => "BOOLEAN".to_string(),
        "UNIQUEIDENTIFIER" => "VARCHAR(36)".to_string(),
        _ => "TEXT".to_string(),
    }
}

/// Translate a source default into the target dialect; `None` drops it.
fn render_default(column: &ColumnDescriptor) -> Option<String> {
    let raw = match &column.column_default {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => if *b { "1" } else { "0" }.to_string(),
        // Complex objects are dropped
        _ => return None,
    };

    // Source defaults arrive wrapped: ((0)), ('abc'), (getdate())
    let mut text = raw.trim();
    while text.starts_with('(') && text.ends_with(')') && text.len() >= 2 {
        text = text[1..text.len() - 1].trim();
    }
    if text.is_empty() {
        return None;
    }

    let lowered = text.to_ascii_lowercase();
    if lowered == "getdate()" || lowered == "sysdatetime()" {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    if lowered == "newid()" {
        return None;
    }

    if column.data_type.eq_ignore_ascii_case("BIT") {
        let truthy = text == "1" || lowered == "true";
        return Some(if truthy { "'1'" } else { "'0'" }.to_string());
    }

    if NUMERIC_LITERAL.is_match(text) {
        return Some(text.to_string());
    }

    let unquoted = text.trim_matches('\'');
    Some(format!("'{}'", unquoted.replace('\'', "''")))
}

/// Render one column definition line.
fn render_column(column: &ColumnDescriptor) -> String {
    let mut parts = vec![quote_ident(&column.name), render_column_type(column)];

    let default = render_default(column);
    let identity = column.identity();

    let not_null =
        !column.nullable() && (default.is_some() || identity || column.is_primary());

    if not_null {
        parts.push("NOT NULL".to_string());
        if let Some(default) = &default {
            if !identity {
                parts.push(format!("DEFAULT {default}"));
            }
        }
    } else {
        parts.push("NULL".to_string());
        match (&default, identity) {
            (Some(default), false) => parts.push(format!("DEFAULT {default}")),
            _ => parts.push("DEFAULT NULL".to_string()),
        }
    }

    if identity {
        parts.push("AUTO_INCREMENT".to_string());
    }

    parts.join(" ")
}

/// Render the full CREATE TABLE statement for a schema descriptor.
pub fn render_create_table(table_name: &str, schema: &TableSchema) -> Result<String> {
    if schema.columns.is_empty() {
        return Err(BridgeError::Validation(format!(
            "schema for {table_name} has no columns"
        )));
    }

    let mut lines: Vec<String> = schema.columns.iter().map(render_column).collect();

    let mut pk_columns: Vec<String> = if schema.primary_keys.is_empty() {
        schema
            .columns
            .iter()
            .filter(|c| c.is_primary())
            .map(|c| c.name.clone())
            .collect()
    } else {
        schema.primary_keys.clone()
    };
    pk_columns.dedup();

    if !pk_columns.is_empty() {
        let quoted: Vec<String> = pk_columns.iter().map(|c| quote_ident(c)).collect();
        lines.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci",
        quote_ident(table_name),
        lines.join(",\n  ")
    ))
}

/// Render one supplied secondary index.
pub fn render_index(table_name: &str, index: &IndexDescriptor) -> String {
    let columns: Vec<String> = index.columns.iter().map(IndexColumn::render).collect();
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table_name),
        columns.join(", ")
    )
}

/// The business-type secondary-index bundle for a table.
pub fn index_bundle(business_type: BusinessType, table_name: &str) -> &'static [&'static str] {
    match (business_type, table_name) {
        (BusinessType::Hospitality, "MenuItem") => &[
            "CREATE INDEX `idx_category` ON `MenuItem` (`Category`)",
            "CREATE FULLTEXT INDEX `ft_menuitem_descriptions` ON `MenuItem` (`Description1`, `Description2`) WITH PARSER ngram",
        ],
        (BusinessType::Hospitality, "Sales") => &[
            "CREATE INDEX `idx_orderdate` ON `Sales` (`OrderDate`)",
            "CREATE INDEX `idx_orderdate_orderno` ON `Sales` (`OrderDate`, `OrderNo`)",
        ],
        (BusinessType::Hospitality, "SalesDetail") => &[
            "CREATE INDEX `idx_orderno_itemcode` ON `SalesDetail` (`OrderNo`, `ItemCode`)",
            "CREATE INDEX `idx_itemcode` ON `SalesDetail` (`ItemCode`)",
            "CREATE INDEX `idx_orderno` ON `SalesDetail` (`OrderNo`)",
        ],
        (BusinessType::Retail, "StockItems") => &[
            "CREATE INDEX `idx_category` ON `StockItems` (`Category`)",
            "CREATE INDEX `idx_category_stockid` ON `StockItems` (`Category`, `StockId`)",
            "CREATE FULLTEXT INDEX `ft_stockitems_descriptions` ON `StockItems` (`Description`, `Description1`, `Description2`, `Description3`) WITH PARSER ngram",
        ],
        (BusinessType::Retail, "Sales") => &[
            "CREATE INDEX `idx_transactiondate` ON `Sales` (`TransactionDate`)",
            "CREATE INDEX `idx_transactiondate_invoiceno` ON `Sales` (`TransactionDate`, `InvoiceNo`)",
        ],
        (BusinessType::Retail, "SalesDetail") => &[
            "CREATE INDEX `idx_invoiceno_stockid` ON `SalesDetail` (`InvoiceNo`, `StockId`)",
            "CREATE INDEX `idx_stockid` ON `SalesDetail` (`StockId`)",
            "CREATE INDEX `idx_invoiceno` ON `SalesDetail` (`InvoiceNo`)",
        ],
        _ => &[],
    }
}

/// Creates target tables and their secondary indexes
pub struct SchemaMaterialiser {
    target: Arc<TargetStore>,
}

impl SchemaMaterialiser {
    pub fn new(target: Arc<TargetStore>) -> Self {
        Self { target }
    }

    /// Create `table_name` in `database` from the supplied descriptor, then
    /// apply supplied indexes and (when the vertical is known) the
    /// business-type bundle. Index failures are logged and skipped; the
    /// table create itself is the only fatal step.
    pub async fn create_table(
        &self,
        database: &str,
        table_name: &str,
        schema: &TableSchema,
        database_type: Option<BusinessType>,
    ) -> Result<()> {
        let create_sql = render_create_table(table_name, schema)?;
        self.target.execute(database, &create_sql, &[]).await?;
        info!(database, table = table_name, "table created");

        for index in &schema.indexes {
            let sql = render_index(table_name, index);
            if let Err(e) = self.target.execute(database, &sql, &[]).await {
                warn!(database, table = table_name, index = %index.name, error = %e,
                    "supplied index skipped");
            }
        }

        if let Some(business_type) = database_type {
            for sql in index_bundle(business_type, table_name) {
                if let Err(e) = self.target.execute(database, sql, &[]).await {
                    warn!(database, table = table_name, error = %e, "bundle index skipped");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, data_type: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            char_max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_nullable: None,
            column_default: None,
            is_identity: None,
            column_key: None,
        }
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(render_column_type(&column("a", "INT")), "INT");
        assert_eq!(render_column_type(&column("a", "REAL")), "DOUBLE");
        assert_eq!(render_column_type(&column("a", "BIT")), "BOOLEAN");
        assert_eq!(render_column_type(&column("a", "NTEXT")), "TEXT");
        assert_eq!(render_column_type(&column("a", "datetime2")), "DATETIME");
        assert_eq!(
            render_column_type(&column("a", "UNIQUEIDENTIFIER")),
            "VARCHAR(36)"
        );
        assert_eq!(render_column_type(&column("a", "GEOGRAPHY")), "TEXT");
    }

    #[test]
    fn test_varchar_lengths() {
        let mut c = column("a", "NVARCHAR");
        c.char_max_length = Some(json!(50));
        assert_eq!(render_column_type(&c), "VARCHAR(50)");

        c.char_max_length = Some(json!(-1));
        assert_eq!(render_column_type(&c), "TEXT");

        c.char_max_length = None;
        assert_eq!(render_column_type(&c), "VARCHAR(255)");

        let mut c = column("a", "NCHAR");
        c.char_max_length = Some(json!("2"));
        assert_eq!(render_column_type(&c), "CHAR(2)");
    }

    #[test]
    fn test_decimal_defaults() {
        let mut c = column("a", "DECIMAL");
        assert_eq!(render_column_type(&c), "DECIMAL(18,0)");
        c.numeric_precision = Some(json!(10));
        c.numeric_scale = Some(json!(2));
        assert_eq!(render_column_type(&c), "DECIMAL(10,2)");
    }

    #[test]
    fn test_default_translation() {
        let mut c = column("a", "DATETIME");
        c.column_default = Some(json!("(getdate())"));
        assert_eq!(render_default(&c).as_deref(), Some("CURRENT_TIMESTAMP"));

        let mut c = column("a", "UNIQUEIDENTIFIER");
        c.column_default = Some(json!("(newid())"));
        assert_eq!(render_default(&c), None);

        let mut c = column("a", "INT");
        c.column_default = Some(json!("((0))"));
        assert_eq!(render_default(&c).as_deref(), Some("0"));

        let mut c = column("a", "BIT");
        c.column_default = Some(json!("((1))"));
        assert_eq!(render_default(&c).as_deref(), Some("'1'"));

        let mut c = column("a", "NVARCHAR");
        c.column_default = Some(json!("('o''brien')"));
        assert_eq!(render_default(&c).as_deref(), Some("'o''brien'"));

        let mut c = column("a", "NVARCHAR");
        c.column_default = Some(json!({"complex": true}));
        assert_eq!(render_default(&c), None);
    }

    #[test]
    fn test_nullability_is_relaxed_without_default() {
        // Non-nullable but no default, not identity, not a key: relaxed so
        // CSV seeding with empty cells can still load.
        let mut c = column("Description", "NVARCHAR");
        c.is_nullable = Some(json!("NO"));
        assert_eq!(
            render_column(&c),
            "`Description` VARCHAR(255) NULL DEFAULT NULL"
        );
    }

    #[test]
    fn test_nullability_kept_with_default() {
        let mut c = column("Qty", "INT");
        c.is_nullable = Some(json!("NO"));
        c.column_default = Some(json!("((0))"));
        assert_eq!(render_column(&c), "`Qty` INT NOT NULL DEFAULT 0");
    }

    #[test]
    fn test_identity_column() {
        let mut c = column("Id", "INT");
        c.is_nullable = Some(json!("NO"));
        c.is_identity = Some(json!(1));
        assert_eq!(render_column(&c), "`Id` INT NOT NULL AUTO_INCREMENT");
    }

    #[test]
    fn test_create_table_with_composite_pk() {
        let mut invoice = column("InvoiceNo", "INT");
        invoice.is_nullable = Some(json!("NO"));
        invoice.column_key = Some("PRI".to_string());
        let mut stock = column("StockId", "NVARCHAR");
        stock.char_max_length = Some(json!(20));
        stock.is_nullable = Some(json!("NO"));
        stock.column_key = Some("PRI".to_string());
        let qty = column("Qty", "INT");

        let schema = TableSchema {
            columns: vec![invoice, stock, qty],
            primary_keys: vec![],
            indexes: vec![],
        };

        let sql = render_create_table("SalesDetail", &schema).unwrap();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `SalesDetail`"));
        assert!(sql.contains("`InvoiceNo` INT NOT NULL"));
        assert!(sql.contains("PRIMARY KEY (`InvoiceNo`, `StockId`)"));
        assert!(sql.contains("ENGINE=InnoDB"));
    }

    #[test]
    fn test_empty_schema_rejected() {
        let schema = TableSchema::default();
        assert!(render_create_table("Sales", &schema).is_err());
    }

    #[test]
    fn test_render_index() {
        let index = IndexDescriptor {
            name: "idx_orderdate".to_string(),
            unique: false,
            columns: vec![
                IndexColumn::Detailed {
                    name: "OrderDate".to_string(),
                    descending: Some(json!("DESC")),
                },
                IndexColumn::Name("OrderNo".to_string()),
            ],
        };
        assert_eq!(
            render_index("Sales", &index),
            "CREATE INDEX `idx_orderdate` ON `Sales` (`OrderDate` DESC, `OrderNo`)"
        );
    }

    #[test]
    fn test_index_bundles() {
        assert!(!index_bundle(BusinessType::Retail, "StockItems").is_empty());
        assert!(!index_bundle(BusinessType::Hospitality, "MenuItem").is_empty());
        assert!(index_bundle(BusinessType::Retail, "MenuItem").is_empty());
        assert!(index_bundle(BusinessType::Hospitality, "Unknown").is_empty());

        let stock = index_bundle(BusinessType::Retail, "StockItems");
        assert!(stock.iter().any(|s| s.contains("WITH PARSER ngram")));
    }

    #[test]
    fn test_schema_deserialises_from_wire_shape() {
        let schema: TableSchema = serde_json::from_value(json!({
            "columns": [
                {
                    "COLUMN_NAME": "StockId",
                    "DATA_TYPE": "nvarchar",
                    "CHARACTER_MAXIMUM_LENGTH": 20,
                    "IS_NULLABLE": "NO",
                    "COLUMN_KEY": "PRI"
                },
                {
                    "COLUMN_NAME": "Price",
                    "DATA_TYPE": "decimal",
                    "NUMERIC_PRECISION": 18,
                    "NUMERIC_SCALE": 4,
                    "IS_NULLABLE": "YES"
                }
            ],
            "indexes": [
                {"name": "idx_price", "columns": ["Price"]}
            ]
        }))
        .unwrap();

        assert_eq!(schema.columns.len(), 2);
        assert!(schema.columns[0].is_primary());
        let sql = render_create_table("StockItems", &schema).unwrap();
        assert!(sql.contains("`Price` DECIMAL(18,4) NULL DEFAULT NULL"));
        assert!(sql.contains("PRIMARY KEY (`StockId`)"));
    }
}
