//! DDL Translator
//!
//! Pure rewriting of source-dialect (SQL Server) DDL into the target
//! dialect (MySQL). `translate` returns `None` for commands that have no
//! target representation (currently only `LOCK_ESCALATION` tweaks); every
//! other shape is rewritten, with unknown shapes passed through after
//! identifier and type rewriting.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::DdlOperation;

static SCHEMA_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[dbo\]\.|\bdbo\.").unwrap());
static NVARCHAR_MAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[?\bNVARCHAR\b\]?\s*\(\s*MAX\s*\)").unwrap());
static NVARCHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[?\bNVARCHAR\b\]?").unwrap());
static NTEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[?\bNTEXT\b\]?").unwrap());
static BIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[?\bBIT\b\]?").unwrap());
static DATETIME2: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[?\bDATETIME2\b\]?").unwrap());
static UNIQUEIDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[?\bUNIQUEIDENTIFIER\b\]?").unwrap());
static IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(INT|BIGINT)\b\s+IDENTITY\s*\(\s*1\s*,\s*1\s*\)").unwrap());
static GETDATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bGETDATE\s*\(\s*\)").unwrap());
static NEWID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNEWID\s*\(\s*\)").unwrap());
static BRACKET_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());
static LOCK_ESCALATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)SET\s*\(\s*LOCK_ESCALATION").unwrap());
static ALTER_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bALTER\s+COLUMN\b").unwrap());

// ADD-column patterns, tried in order: length+nullability, length only,
// nullability only, bare.
static ADD_LEN_NULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bADD\s+\[?(\w+)\]?\s+\[?(\w+)\]?\s*\(\s*(\w+)\s*\)\s+(NULL|NOT\s+NULL)\s*;?\s*$",
    )
    .unwrap()
});
static ADD_LEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bADD\s+\[?(\w+)\]?\s+\[?(\w+)\]?\s*\(\s*(\w+)\s*\)\s*;?\s*$").unwrap()
});
static ADD_NULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bADD\s+\[?(\w+)\]?\s+\[?(\w+)\]?\s+(NULL|NOT\s+NULL)\s*;?\s*$").unwrap()
});
static ADD_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bADD\s+\[?(\w+)\]?\s+\[?(\w+)\]?\s*;?\s*$").unwrap());

static DROP_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bDROP\s+(?:COLUMN\s+)?\[?(\w+)\]?\s*;?\s*$").unwrap());

const COLLATION: &str = "CHARACTER SET utf8mb4 COLLATE utf8mb4_0900_ai_ci";

/// Translate one DDL command; `None` means "skip, nothing to apply".
pub fn translate(operation: DdlOperation, table_name: &str, command: &str) -> Option<String> {
    match operation {
        DdlOperation::AlterTable => translate_alter(table_name, command),
        DdlOperation::DropTable => Some(rewrite_common(command)),
    }
}

fn translate_alter(table_name: &str, command: &str) -> Option<String> {
    if LOCK_ESCALATION.is_match(command) {
        // Not representable in the target dialect.
        return None;
    }

    let command = SCHEMA_PREFIX.replace_all(command, "").into_owned();

    for pattern in [&*ADD_LEN_NULL, &*ADD_LEN, &*ADD_NULL, &*ADD_BARE] {
        if let Some(caps) = pattern.captures(&command) {
            let column = caps.get(1).unwrap().as_str();
            let data_type = caps.get(2).unwrap().as_str();
            let length = caps.get(3).and_then(|m| {
                // In the nullability-only pattern, group 3 is the NULL token.
                let text = m.as_str();
                if text.to_ascii_uppercase().contains("NULL") {
                    None
                } else {
                    Some(text)
                }
            });
            let nullability = caps
                .iter()
                .skip(3)
                .flatten()
                .map(|m| m.as_str())
                .find(|t| t.to_ascii_uppercase().contains("NULL"));

            return Some(render_add_column(
                table_name,
                column,
                data_type,
                length,
                nullability,
            ));
        }
    }

    if let Some(caps) = DROP_COLUMN.captures(&command) {
        let column = caps.get(1).unwrap().as_str();
        return Some(format!(
            "ALTER TABLE `{table_name}` DROP COLUMN `{column}`"
        ));
    }

    let command = ALTER_COLUMN.replace_all(&command, "MODIFY COLUMN").into_owned();
    Some(rewrite_common(&command))
}

fn render_add_column(
    table: &str,
    column: &str,
    data_type: &str,
    length: Option<&str>,
    nullability: Option<&str>,
) -> String {
    let mapped = map_column_type(data_type, length);

    let mut out = format!("ALTER TABLE `{table}` ADD COLUMN `{column}` {mapped}");
    if is_character_type(&mapped) {
        out.push(' ');
        out.push_str(COLLATION);
    }
    if let Some(null) = nullability {
        out.push(' ');
        out.push_str(&null.to_ascii_uppercase().split_whitespace().collect::<Vec<_>>().join(" "));
    }
    out
}

fn is_character_type(mapped: &str) -> bool {
    let upper = mapped.to_ascii_uppercase();
    upper.starts_with("VARCHAR") || upper.starts_with("CHAR") || upper == "TEXT"
}

/// Map a source column type (with optional length) to the target dialect.
fn map_column_type(data_type: &str, length: Option<&str>) -> String {
    let upper = data_type.to_ascii_uppercase();
    match upper.as_str() {
        "NVARCHAR" | "VARCHAR" => match length {
            Some(l) if l.eq_ignore_ascii_case("MAX") => "TEXT".to_string(),
            Some(l) => format!("VARCHAR({l})"),
            None => "VARCHAR(255)".to_string(),
        },
        "NCHAR" | "CHAR" => match length {
            Some(l) => format!("CHAR({l})"),
            None => "CHAR(1)".to_string(),
        },
        "NTEXT" | "TEXT" => "TEXT".to_string(),
        "BIT" => "BOOLEAN".to_string(),
        "DATETIME2" => "DATETIME".to_string(),
        "UNIQUEIDENTIFIER" => "VARCHAR(36)".to_string(),
        "DECIMAL" | "NUMERIC" => match length {
            Some(l) => format!("DECIMAL({l})"),
            None => "DECIMAL(18,0)".to_string(),
        },
        _ => match length {
            Some(l) => format!("{upper}({l})"),
            None => upper,
        },
    }
}

/// The rewrites applied to every command regardless of shape: schema-prefix
/// strip, type mapping, function mapping, identifier quoting.
fn rewrite_common(command: &str) -> String {
    let step = SCHEMA_PREFIX.replace_all(command, "");
    let step = NVARCHAR_MAX.replace_all(&step, "TEXT");
    let step = NVARCHAR.replace_all(&step, "VARCHAR");
    let step = NTEXT.replace_all(&step, "TEXT");
    let step = BIT.replace_all(&step, "BOOLEAN");
    let step = DATETIME2.replace_all(&step, "DATETIME");
    let step = UNIQUEIDENTIFIER.replace_all(&step, "VARCHAR(36)");
    let step = IDENTITY.replace_all(&step, "$1 AUTO_INCREMENT");
    let step = GETDATE.replace_all(&step, "NOW()");
    let step = NEWID.replace_all(&step, "UUID()");
    let step = BRACKET_IDENT.replace_all(&step, "`$1`");
    step.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_column_with_length_and_null() {
        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] Add [Note] [NVARCHAR](50) NULL",
        )
        .unwrap();
        assert_eq!(
            out,
            "ALTER TABLE `Sales` ADD COLUMN `Note` VARCHAR(50) \
             CHARACTER SET utf8mb4 COLLATE utf8mb4_0900_ai_ci NULL"
        );
    }

    #[test]
    fn test_add_column_nvarchar_max() {
        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] ADD [Comments] NVARCHAR(MAX)",
        )
        .unwrap();
        assert_eq!(
            out,
            "ALTER TABLE `Sales` ADD COLUMN `Comments` TEXT \
             CHARACTER SET utf8mb4 COLLATE utf8mb4_0900_ai_ci"
        );
    }

    #[test]
    fn test_add_column_not_null_without_length() {
        let out = translate(
            DdlOperation::AlterTable,
            "StockItems",
            "ALTER TABLE [dbo].[StockItems] ADD [Active] BIT NOT NULL",
        )
        .unwrap();
        assert_eq!(
            out,
            "ALTER TABLE `StockItems` ADD COLUMN `Active` BOOLEAN NOT NULL"
        );
    }

    #[test]
    fn test_add_column_bare() {
        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] ADD [CreatedAt] DATETIME2",
        )
        .unwrap();
        assert_eq!(out, "ALTER TABLE `Sales` ADD COLUMN `CreatedAt` DATETIME");
    }

    #[test]
    fn test_drop_column_both_forms() {
        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] DROP [Note]",
        )
        .unwrap();
        assert_eq!(out, "ALTER TABLE `Sales` DROP COLUMN `Note`");

        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] DROP COLUMN Note",
        )
        .unwrap();
        assert_eq!(out, "ALTER TABLE `Sales` DROP COLUMN `Note`");
    }

    #[test]
    fn test_alter_column_becomes_modify() {
        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] ALTER COLUMN [Note] NVARCHAR(100) NULL",
        )
        .unwrap();
        assert_eq!(
            out,
            "ALTER TABLE `Sales` MODIFY COLUMN `Note` VARCHAR(100) NULL"
        );
    }

    #[test]
    fn test_lock_escalation_is_skipped() {
        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] SET (LOCK_ESCALATION = TABLE)",
        );
        assert!(out.is_none());
    }

    #[test]
    fn test_drop_table_identifier_rewrite() {
        let out = translate(
            DdlOperation::DropTable,
            "Sales",
            "DROP TABLE [dbo].[Sales]",
        )
        .unwrap();
        assert_eq!(out, "DROP TABLE `Sales`");
    }

    #[test]
    fn test_unknown_shape_passes_through_rewritten() {
        let out = translate(
            DdlOperation::AlterTable,
            "Sales",
            "ALTER TABLE [dbo].[Sales] ADD CONSTRAINT [DF_Sales_Date] DEFAULT GETDATE() FOR [SaleDate]",
        )
        .unwrap();
        assert_eq!(
            out,
            "ALTER TABLE `Sales` ADD CONSTRAINT `DF_Sales_Date` DEFAULT NOW() FOR `SaleDate`"
        );
    }

    #[test]
    fn test_identity_rewrite() {
        // IDENTITY columns fall outside the four ADD patterns and take the
        // common-rewrite path.
        let out = translate(
            DdlOperation::AlterTable,
            "Counters",
            "ALTER TABLE [dbo].[Counters] ADD [Id] INT IDENTITY(1,1) NOT NULL",
        )
        .unwrap();
        assert_eq!(
            out,
            "ALTER TABLE `Counters` ADD `Id` INT AUTO_INCREMENT NOT NULL"
        );
    }

    #[test]
    fn test_translator_is_pure() {
        let input = "ALTER TABLE [dbo].[Sales] Add [Note] [NVARCHAR](50) NULL";
        let a = translate(DdlOperation::AlterTable, "Sales", input);
        let b = translate(DdlOperation::AlterTable, "Sales", input);
        assert_eq!(a, b);
    }
}
