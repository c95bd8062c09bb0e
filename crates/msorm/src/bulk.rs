//! Bulk-copy row construction.
//!
//! Converts [`Value`] records into TDS token rows, one cell per declared
//! column in schema order. Missing columns transfer as typed NULLs; date-only
//! and date-time values are narrowed to fit the declared column type.

use std::borrow::Cow;

use chrono::NaiveTime;
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, IntoSql, TokenRow};

use crate::error::OrmResult;
use crate::schema::{DataType, TableSchema};
use crate::value::Value;

/// Build one token row per record, following the table's column order.
pub(crate) fn token_rows(
    table: &TableSchema,
    records: &[Vec<(String, Value)>],
) -> OrmResult<Vec<TokenRow<'static>>> {
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let mut row = TokenRow::new();
        for column in &table.columns {
            let value = record
                .iter()
                .find(|(key, _)| *key == column.name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            row.push(to_column_data(value, &column.data_type));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn to_column_data(value: Value, ty: &DataType) -> ColumnData<'static> {
    match (value, ty) {
        (Value::Null, ty) => null_of(ty),
        (Value::Bool(b), _) => ColumnData::Bit(Some(b)),
        (Value::I32(v), DataType::BigInt) => ColumnData::I64(Some(i64::from(v))),
        (Value::I32(v), _) => ColumnData::I32(Some(v)),
        (Value::I64(v), _) => ColumnData::I64(Some(v)),
        (Value::F64(v), _) => ColumnData::F64(Some(v)),
        (Value::Decimal(d), _) => {
            ColumnData::Numeric(Some(Numeric::new_with_scale(d.mantissa(), d.scale() as u8)))
        }
        (Value::String(s), _) => ColumnData::String(Some(Cow::Owned(s))),
        (Value::Uuid(u), _) => ColumnData::Guid(Some(u)),
        // Date-only columns receive the date part; date-time columns receive
        // midnight when only a date is available.
        (Value::DateTime(dt), DataType::DateOnly) => dt.date().into_sql(),
        (Value::DateTime(dt), _) => dt.into_sql(),
        (Value::Date(d), DataType::DateTime) => d.and_time(NaiveTime::MIN).into_sql(),
        (Value::Date(d), _) => d.into_sql(),
        (Value::Time(t), _) => t.into_sql(),
        (Value::Bytes(b), _) => ColumnData::Binary(Some(Cow::Owned(b))),
    }
}

fn null_of(ty: &DataType) -> ColumnData<'static> {
    match ty {
        DataType::BigInt => ColumnData::I64(None),
        DataType::Int => ColumnData::I32(None),
        DataType::Float => ColumnData::F64(None),
        DataType::Decimal { .. } => ColumnData::Numeric(None),
        DataType::Boolean => ColumnData::Bit(None),
        DataType::String(_) | DataType::Text => ColumnData::String(None),
        DataType::DateTime => ColumnData::DateTime2(None),
        DataType::DateOnly => ColumnData::Date(None),
        DataType::Time => ColumnData::Time(None),
        DataType::Uuid => ColumnData::Guid(None),
        DataType::Binary(_) => ColumnData::Binary(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, SortOrder};
    use chrono::NaiveDate;

    fn table() -> TableSchema {
        TableSchema::builder("Holiday")
            .column(ColumnSchema::new("id", DataType::Int).auto_increment())
            .column(ColumnSchema::new("day", DataType::DateOnly))
            .column(ColumnSchema::new("note", DataType::String(Some(100))).nullable())
            .primary_key("id", SortOrder::Asc)
            .build()
    }

    #[test]
    fn test_rows_follow_column_order_and_fill_nulls() {
        let day = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let records = vec![vec![
            ("day".to_string(), Value::Date(day)),
            ("id".to_string(), Value::I32(1)),
        ]];
        let rows = token_rows(&table(), &records).unwrap();
        assert_eq!(rows.len(), 1);
        // columns are id, day, note; note is missing and transfers as NULL
    }

    #[test]
    fn test_datetime_narrows_to_date_only_column() {
        let dt = NaiveDate::from_ymd_opt(2024, 12, 25)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        let data = to_column_data(Value::DateTime(dt), &DataType::DateOnly);
        assert!(matches!(data, ColumnData::Date(Some(_))));
    }

    #[test]
    fn test_date_widens_to_midnight_for_datetime_column() {
        let d = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let data = to_column_data(Value::Date(d), &DataType::DateTime);
        assert!(matches!(data, ColumnData::DateTime2(Some(_))));
    }
}
