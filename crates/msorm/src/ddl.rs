//! DDL generation: table, key, index and constraint scripts plus the
//! drop-everything batch used by forced initialization.

use crate::ident::quote;
use crate::schema::{ForeignKeySchema, IndexSchema, TableSchema};
use crate::value::Value;

pub fn create_table(table: &TableSchema) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|col| {
            let mut sql = format!("{} {}", quote(&col.name), col.data_type.sql_type());
            if col.auto_increment {
                sql.push_str(" IDENTITY(1,1)");
            }
            sql.push_str(if col.nullable { " NULL" } else { " NOT NULL" });
            sql
        })
        .collect();
    format!("CREATE TABLE {} ({})", quote(&table.name), columns.join(", "))
}

pub fn create_primary_key(table: &TableSchema) -> Option<String> {
    if table.primary_key.is_empty() {
        return None;
    }
    let columns: Vec<String> = table
        .primary_key
        .iter()
        .map(|pk| format!("{} {}", quote(&pk.name), pk.order.as_sql()))
        .collect();
    Some(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
        quote(&table.name),
        quote(&format!("PK_{}", table.name)),
        columns.join(", ")
    ))
}

pub fn create_index(table: &TableSchema, index: &IndexSchema) -> String {
    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|(name, order)| format!("{} {}", quote(name), order.as_sql()))
        .collect();
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(&table.name),
        columns.join(", ")
    )
}

pub fn create_foreign_key(
    table: &TableSchema,
    fk: &ForeignKeySchema,
    target: &TableSchema,
) -> String {
    let columns: Vec<String> = fk.column_names.iter().map(|c| quote(c)).collect();
    let target_columns: Vec<String> = target
        .primary_key
        .iter()
        .map(|pk| quote(&pk.name))
        .collect();
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote(&table.name),
        quote(&format!("FK_{}_{}", table.name, fk.name)),
        columns.join(", "),
        quote(&target.name),
        target_columns.join(", ")
    )
}

pub fn create_schema(name: &str) -> String {
    format!(
        "IF NOT EXISTS (SELECT * FROM sys.schemas WHERE name = {}) EXEC('CREATE SCHEMA {}')",
        Value::from(name).to_sql(),
        quote(name)
    )
}

/// Drop every procedure, function, view, foreign-key constraint and table in
/// the current database, in dependency order.
pub fn clear_database() -> String {
    r"DECLARE @sql NVARCHAR(MAX) = N'';
SELECT @sql = @sql + N'DROP PROCEDURE ' + QUOTENAME(SCHEMA_NAME(schema_id)) + N'.' + QUOTENAME(o.name) + N';' + CHAR(13) + CHAR(10) FROM sys.sql_modules m INNER JOIN sys.objects o ON m.object_id = o.object_id AND o.type = 'P';
EXEC(@sql);
SET @sql = N'';
SELECT @sql = @sql + N'DROP FUNCTION ' + QUOTENAME(SCHEMA_NAME(schema_id)) + N'.' + QUOTENAME(o.name) + N';' + CHAR(13) + CHAR(10) FROM sys.sql_modules m INNER JOIN sys.objects o ON m.object_id = o.object_id AND o.type IN ('FN', 'IF', 'TF');
EXEC(@sql);
SET @sql = N'';
SELECT @sql = @sql + N'DROP VIEW ' + QUOTENAME(SCHEMA_NAME(schema_id)) + N'.' + QUOTENAME(v.name) + N';' + CHAR(13) + CHAR(10) FROM sys.views v;
EXEC(@sql);
SET @sql = N'';
SELECT @sql = @sql + N'ALTER TABLE ' + QUOTENAME(SCHEMA_NAME(tbl.schema_id)) + N'.' + QUOTENAME(tbl.name) + N' DROP CONSTRAINT ' + QUOTENAME(obj.name) + N';' + CHAR(13) + CHAR(10) FROM sys.tables tbl INNER JOIN sys.objects obj ON obj.parent_object_id = tbl.object_id AND obj.type = 'F';
EXEC(@sql);
SET @sql = N'';
SELECT @sql = @sql + N'DROP TABLE ' + QUOTENAME(SCHEMA_NAME(schema_id)) + N'.' + QUOTENAME(tbl.name) + N';' + CHAR(13) + CHAR(10) FROM sys.tables tbl;
EXEC(@sql);"
        .to_string()
}
