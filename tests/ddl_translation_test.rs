//! DDL translation tests covering the documented rewrite table.

use posbridge::domain::DdlOperation;
use posbridge::infra::ddl::translate;

#[test]
fn add_nvarchar_column_with_length_and_null() {
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
fn lock_escalation_is_silently_skipped() {
    assert!(translate(
        DdlOperation::AlterTable,
        "Sales",
        "ALTER TABLE [dbo].[Sales] SET (LOCK_ESCALATION = TABLE)",
    )
    .is_none());

    assert!(translate(
        DdlOperation::AlterTable,
        "Sales",
        "ALTER TABLE [dbo].[Sales] SET (LOCK_ESCALATION = AUTO)",
    )
    .is_none());
}

#[test]
fn add_column_pattern_precedence() {
    // Length + nullability
    let out = translate(
        DdlOperation::AlterTable,
        "T",
        "ALTER TABLE [dbo].[T] ADD [A] NVARCHAR(10) NOT NULL",
    )
    .unwrap();
    assert!(out.contains("`A` VARCHAR(10)"));
    assert!(out.ends_with("NOT NULL"));

    // Length only
    let out = translate(
        DdlOperation::AlterTable,
        "T",
        "ALTER TABLE [dbo].[T] ADD [B] NVARCHAR(20)",
    )
    .unwrap();
    assert!(out.ends_with("CHARACTER SET utf8mb4 COLLATE utf8mb4_0900_ai_ci"));

    // Nullability only
    let out = translate(
        DdlOperation::AlterTable,
        "T",
        "ALTER TABLE [dbo].[T] ADD [C] DATETIME2 NULL",
    )
    .unwrap();
    assert_eq!(out, "ALTER TABLE `T` ADD COLUMN `C` DATETIME NULL");

    // Bare
    let out = translate(DdlOperation::AlterTable, "T", "ALTER TABLE [dbo].[T] ADD [D] BIT")
        .unwrap();
    assert_eq!(out, "ALTER TABLE `T` ADD COLUMN `D` BOOLEAN");
}

#[test]
fn drop_column_variants() {
    for command in [
        "ALTER TABLE [dbo].[Sales] DROP [Note]",
        "ALTER TABLE [dbo].[Sales] DROP COLUMN Note",
        "ALTER TABLE [dbo].[Sales] DROP COLUMN [Note];",
    ] {
        let out = translate(DdlOperation::AlterTable, "Sales", command).unwrap();
        assert_eq!(out, "ALTER TABLE `Sales` DROP COLUMN `Note`", "for {command}");
    }
}

#[test]
fn alter_column_becomes_modify_column() {
    let out = translate(
        DdlOperation::AlterTable,
        "Sales",
        "ALTER TABLE [dbo].[Sales] ALTER COLUMN [Flag] BIT NOT NULL",
    )
    .unwrap();
    assert_eq!(
        out,
        "ALTER TABLE `Sales` MODIFY COLUMN `Flag` BOOLEAN NOT NULL"
    );
}

#[test]
fn drop_table_rewrites_identifiers_only() {
    let out = translate(DdlOperation::DropTable, "Sales", "DROP TABLE [dbo].[Sales]").unwrap();
    assert_eq!(out, "DROP TABLE `Sales`");
}

#[test]
fn function_and_type_rewrites_in_passthrough() {
    let out = translate(
        DdlOperation::AlterTable,
        "Sales",
        "ALTER TABLE [dbo].[Sales] ADD CONSTRAINT [DF_Date] DEFAULT GETDATE() FOR [SaleDate]",
    )
    .unwrap();
    assert_eq!(
        out,
        "ALTER TABLE `Sales` ADD CONSTRAINT `DF_Date` DEFAULT NOW() FOR `SaleDate`"
    );

    let out = translate(
        DdlOperation::AlterTable,
        "Sales",
        "ALTER TABLE [dbo].[Sales] ADD CONSTRAINT [DF_Id] DEFAULT NEWID() FOR [RowGuid]",
    )
    .unwrap();
    assert!(out.contains("DEFAULT UUID()"));

    let out = translate(
        DdlOperation::AlterTable,
        "Docs",
        "ALTER TABLE [dbo].[Docs] ADD [Body] NVARCHAR(MAX) NULL",
    )
    .unwrap();
    assert!(out.contains("`Body` TEXT"));

    let out = translate(
        DdlOperation::AlterTable,
        "Docs",
        "ALTER TABLE [dbo].[Docs] ADD [Guid] UNIQUEIDENTIFIER NULL",
    )
    .unwrap();
    assert!(out.contains("`Guid` VARCHAR(36)"));
}

#[test]
fn translation_is_deterministic() {
    let commands = [
        "ALTER TABLE [dbo].[Sales] Add [Note] [NVARCHAR](50) NULL",
        "ALTER TABLE [dbo].[Sales] DROP COLUMN Note",
        "DROP TABLE [dbo].[Sales]",
        "something unrecognisable",
    ];
    for command in commands {
        for operation in [DdlOperation::AlterTable, DdlOperation::DropTable] {
            assert_eq!(
                translate(operation, "Sales", command),
                translate(operation, "Sales", command),
            );
        }
    }
}
