//! Schema catalog: table, column, key and relation metadata.
//!
//! The catalog is populated once by an explicit registration step and shared
//! immutably (behind an `Arc`) by every plan derived from it. Plans and the
//! compilers only ever read it.

use std::fmt;
use std::sync::Arc;

use crate::error::{OrmError, OrmResult};

/// Sort direction for key and order-by columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Logical column type, mapped bijectively onto a T-SQL type.
///
/// Length, precision and scale are part of the variant; they are never parsed
/// back out of type strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    BigInt,
    Int,
    Float,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    /// `NVARCHAR(n)`; `None` means the default length of 4000.
    String(Option<u16>),
    /// `NVARCHAR(MAX)`
    Text,
    DateTime,
    DateOnly,
    Time,
    Uuid,
    /// `VARBINARY(n)`; `None` means the default length of 4000.
    Binary(Option<u16>),
}

impl DataType {
    /// Render the T-SQL type name for DDL and CONVERT expressions.
    pub fn sql_type(&self) -> String {
        match self {
            DataType::BigInt => "BIGINT".to_string(),
            DataType::Int => "INT".to_string(),
            DataType::Float => "FLOAT".to_string(),
            DataType::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
            DataType::Boolean => "BIT".to_string(),
            DataType::String(len) => format!("NVARCHAR({})", len.unwrap_or(4000)),
            DataType::Text => "NVARCHAR(MAX)".to_string(),
            DataType::DateTime => "DATETIME2".to_string(),
            DataType::DateOnly => "DATE".to_string(),
            DataType::Time => "TIME".to_string(),
            DataType::Uuid => "UNIQUEIDENTIFIER".to_string(),
            DataType::Binary(len) => format!("VARBINARY({})", len.unwrap_or(4000)),
        }
    }
}

/// A single column declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub auto_increment: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            auto_increment: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// One primary-key member with its sort direction.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimaryKeyColumn {
    pub name: String,
    pub order: SortOrder,
}

/// A secondary index declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<(String, SortOrder)>,
    pub unique: bool,
}

/// A forward foreign key: this table's columns reference the target table's
/// primary key, column for column.
#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKeySchema {
    pub name: String,
    pub column_names: Vec<String>,
    pub target_table: String,
}

/// The inverse of a foreign key declared on another table: "rows of
/// `source_table` whose `source_foreign_key` points at me".
#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKeyTargetSchema {
    pub name: String,
    pub source_table: String,
    pub source_foreign_key: String,
}

/// A user-defined function replayed at initialization (full CREATE body).
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSchema {
    pub name: String,
    pub body: String,
}

/// A stored procedure replayed at initialization (full CREATE body).
#[derive(Clone, Debug, PartialEq)]
pub struct ProcedureSchema {
    pub name: String,
    pub body: String,
}

/// Full declaration of one table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub primary_key: Vec<PrimaryKeyColumn>,
    pub indexes: Vec<IndexSchema>,
    pub foreign_keys: Vec<ForeignKeySchema>,
    pub foreign_key_targets: Vec<ForeignKeyTargetSchema>,
}

impl TableSchema {
    pub fn builder(name: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder {
            table: TableSchema {
                name: name.into(),
                columns: Vec::new(),
                primary_key: Vec::new(),
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
                foreign_key_targets: Vec::new(),
            },
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_names(&self) -> Vec<&str> {
        self.primary_key.iter().map(|pk| pk.name.as_str()).collect()
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKeySchema> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    pub fn foreign_key_target(&self, name: &str) -> Option<&ForeignKeyTargetSchema> {
        self.foreign_key_targets.iter().find(|fkt| fkt.name == name)
    }

    /// Whether any primary-key column is declared auto-increment.
    pub fn has_identity(&self) -> bool {
        self.primary_key.iter().any(|pk| {
            self.column(&pk.name)
                .map(|c| c.auto_increment)
                .unwrap_or(false)
        })
    }
}

/// Fluent builder for [`TableSchema`].
pub struct TableSchemaBuilder {
    table: TableSchema,
}

impl TableSchemaBuilder {
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.table.columns.push(column);
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>, order: SortOrder) -> Self {
        self.table.primary_key.push(PrimaryKeyColumn {
            name: name.into(),
            order,
        });
        self
    }

    pub fn index(
        mut self,
        name: impl Into<String>,
        columns: Vec<(String, SortOrder)>,
        unique: bool,
    ) -> Self {
        self.table.indexes.push(IndexSchema {
            name: name.into(),
            columns,
            unique,
        });
        self
    }

    pub fn foreign_key(
        mut self,
        name: impl Into<String>,
        column_names: Vec<String>,
        target_table: impl Into<String>,
    ) -> Self {
        self.table.foreign_keys.push(ForeignKeySchema {
            name: name.into(),
            column_names,
            target_table: target_table.into(),
        });
        self
    }

    pub fn foreign_key_target(
        mut self,
        name: impl Into<String>,
        source_table: impl Into<String>,
        source_foreign_key: impl Into<String>,
    ) -> Self {
        self.table.foreign_key_targets.push(ForeignKeyTargetSchema {
            name: name.into(),
            source_table: source_table.into(),
            source_foreign_key: source_foreign_key.into(),
        });
        self
    }

    pub fn build(self) -> TableSchema {
        self.table
    }
}

/// Immutable, shareable catalog of every declared table, function and
/// procedure. Registration order is preserved and drives DDL replay order.
#[derive(Debug)]
pub struct SchemaCatalog {
    tables: Vec<TableSchema>,
    functions: Vec<FunctionSchema>,
    procedures: Vec<ProcedureSchema>,
}

impl SchemaCatalog {
    pub fn builder() -> SchemaCatalogBuilder {
        SchemaCatalogBuilder {
            tables: Vec::new(),
            functions: Vec::new(),
            procedures: Vec::new(),
        }
    }

    /// Look up a table declaration by name.
    pub fn table(&self, name: &str) -> OrmResult<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| OrmError::usage(format!("table '{name}' is not registered")))
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn functions(&self) -> &[FunctionSchema] {
        &self.functions
    }

    pub fn procedures(&self) -> &[ProcedureSchema] {
        &self.procedures
    }
}

/// Builder for [`SchemaCatalog`]; `build` validates cross-table invariants.
pub struct SchemaCatalogBuilder {
    tables: Vec<TableSchema>,
    functions: Vec<FunctionSchema>,
    procedures: Vec<ProcedureSchema>,
}

impl SchemaCatalogBuilder {
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    pub fn function(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.functions.push(FunctionSchema {
            name: name.into(),
            body: body.into(),
        });
        self
    }

    pub fn procedure(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.procedures.push(ProcedureSchema {
            name: name.into(),
            body: body.into(),
        });
        self
    }

    /// Validate relation metadata and freeze the catalog.
    ///
    /// Invariants checked:
    /// - every foreign key names a registered target table, and its column
    ///   count equals the target's primary-key column count;
    /// - every foreign-key target names a registered source table carrying
    ///   the referenced foreign key.
    pub fn build(self) -> OrmResult<Arc<SchemaCatalog>> {
        for table in &self.tables {
            for fk in &table.foreign_keys {
                let target = self
                    .tables
                    .iter()
                    .find(|t| t.name == fk.target_table)
                    .ok_or_else(|| {
                        OrmError::schema(format!(
                            "foreign key '{}' on '{}' references unregistered table '{}'",
                            fk.name, table.name, fk.target_table
                        ))
                    })?;
                if fk.column_names.len() != target.primary_key.len() {
                    return Err(OrmError::schema(format!(
                        "foreign key '{}' on '{}' has {} columns but '{}' has {} primary-key columns",
                        fk.name,
                        table.name,
                        fk.column_names.len(),
                        target.name,
                        target.primary_key.len()
                    )));
                }
            }
            for fkt in &table.foreign_key_targets {
                let source = self
                    .tables
                    .iter()
                    .find(|t| t.name == fkt.source_table)
                    .ok_or_else(|| {
                        OrmError::schema(format!(
                            "foreign-key target '{}' on '{}' references unregistered table '{}'",
                            fkt.name, table.name, fkt.source_table
                        ))
                    })?;
                if source.foreign_key(&fkt.source_foreign_key).is_none() {
                    return Err(OrmError::schema(format!(
                        "foreign-key target '{}' on '{}' references missing foreign key '{}' on '{}'",
                        fkt.name, table.name, fkt.source_foreign_key, source.name
                    )));
                }
            }
        }

        Ok(Arc::new(SchemaCatalog {
            tables: self.tables,
            functions: self.functions,
            procedures: self.procedures,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> TableSchema {
        TableSchema::builder("Region")
            .column(ColumnSchema::new("id", DataType::Int).auto_increment())
            .column(ColumnSchema::new("name", DataType::String(Some(100))))
            .primary_key("id", SortOrder::Asc)
            .build()
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = SchemaCatalog::builder().table(region()).build().unwrap();
        assert_eq!(catalog.table("Region").unwrap().name, "Region");
        assert!(catalog.table("Nope").unwrap_err().is_usage());
    }

    #[test]
    fn test_fk_arity_mismatch_rejected() {
        let customer = TableSchema::builder("Customer")
            .column(ColumnSchema::new("id", DataType::Int).auto_increment())
            .column(ColumnSchema::new("regionId", DataType::Int))
            .primary_key("id", SortOrder::Asc)
            .foreign_key(
                "region",
                vec!["regionId".to_string(), "extra".to_string()],
                "Region",
            )
            .build();

        let err = SchemaCatalog::builder()
            .table(region())
            .table(customer)
            .build()
            .unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn test_fkt_requires_source_fk() {
        let customer = TableSchema::builder("Customer")
            .column(ColumnSchema::new("id", DataType::Int))
            .primary_key("id", SortOrder::Asc)
            .build();
        let region = TableSchema::builder("Region")
            .column(ColumnSchema::new("id", DataType::Int))
            .primary_key("id", SortOrder::Asc)
            .foreign_key_target("customers", "Customer", "region")
            .build();

        let err = SchemaCatalog::builder()
            .table(customer)
            .table(region)
            .build()
            .unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(DataType::String(None).sql_type(), "NVARCHAR(4000)");
        assert_eq!(DataType::Text.sql_type(), "NVARCHAR(MAX)");
        assert_eq!(
            DataType::Decimal {
                precision: 18,
                scale: 4
            }
            .sql_type(),
            "DECIMAL(18, 4)"
        );
        assert_eq!(DataType::Uuid.sql_type(), "UNIQUEIDENTIFIER");
    }

    #[test]
    fn test_has_identity() {
        let catalog = SchemaCatalog::builder().table(region()).build().unwrap();
        assert!(catalog.table("Region").unwrap().has_identity());
    }
}
