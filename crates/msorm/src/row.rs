//! Row conversion and mapped result types.
//!
//! Driver rows come back as positional [`tiberius::ColumnData`] cells; this
//! module flattens them into named [`Value`] pairs and defines the nested
//! [`Record`]/[`Cell`] tree the result mapper produces.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tiberius::{ColumnData, FromSql, Row};
use uuid::Uuid;

use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Convert one driver cell into a [`Value`].
pub fn value_from_column(name: &str, data: &ColumnData<'static>) -> OrmResult<Value> {
    let decode = |e: tiberius::error::Error| OrmError::decode(name, e.to_string());
    let value = match data {
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::U8(v) => v.map(|x| Value::I32(i32::from(x))),
        ColumnData::I16(v) => v.map(|x| Value::I32(i32::from(x))),
        ColumnData::I32(v) => v.map(Value::I32),
        ColumnData::I64(v) => v.map(Value::I64),
        ColumnData::F32(v) => v.map(|x| Value::F64(f64::from(x))),
        ColumnData::F64(v) => v.map(Value::F64),
        ColumnData::Guid(v) => v.map(Value::Uuid),
        ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::Bytes(b.to_vec())),
        ColumnData::Numeric(_) => rust_decimal::Decimal::from_sql(data)
            .map_err(decode)?
            .map(Value::Decimal),
        ColumnData::Date(_) => NaiveDate::from_sql(data).map_err(decode)?.map(Value::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data).map_err(decode)?.map(Value::Time),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)
                .map_err(decode)?
                .map(Value::DateTime)
        }
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::Utc>::from_sql(data)
            .map_err(decode)?
            .map(|dt| Value::DateTime(dt.naive_utc())),
        ColumnData::Xml(v) => v.as_ref().map(|x| Value::String(x.to_string())),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Flatten a driver row into named `(column, value)` pairs, in column order.
pub fn flatten_row(row: Row) -> OrmResult<Vec<(String, Value)>> {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let mut out = Vec::with_capacity(names.len());
    for (name, data) in names.into_iter().zip(row.into_iter()) {
        let value = value_from_column(&name, &data)?;
        out.push((name, value));
    }
    Ok(out)
}

/// One mapped result cell: a scalar, one nested entity, or a list of them.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Scalar(Value),
    Row(Record),
    Rows(Vec<Record>),
}

impl Cell {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Cell::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&Record> {
        match self {
            Cell::Row(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[Record]> {
        match self {
            Cell::Rows(r) => Some(r),
            _ => None,
        }
    }
}

/// A mapped result row: column (or relation) name to cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(pub BTreeMap<String, Cell>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, cell: Cell) {
        self.0.insert(key.into(), cell);
    }

    pub fn get(&self, key: &str) -> Option<&Cell> {
        self.0.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.get(key).and_then(Cell::as_value)
    }

    pub fn row(&self, key: &str) -> Option<&Record> {
        self.get(key).and_then(Cell::as_row)
    }

    pub fn rows(&self, key: &str) -> Option<&[Record]> {
        self.get(key).and_then(Cell::as_rows)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.value(key) {
            Some(Value::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.value(key) {
            Some(Value::I64(v)) => Some(*v),
            Some(Value::I32(v)) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.value(key) {
            Some(Value::F64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.value(key) {
            Some(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.value(key) {
            Some(Value::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_uuid(&self, key: &str) -> Option<Uuid> {
        match self.value(key) {
            Some(Value::Uuid(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<NaiveDate> {
        match self.value(key) {
            Some(Value::Date(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_datetime(&self, key: &str) -> Option<NaiveDateTime> {
        match self.value(key) {
            Some(Value::DateTime(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Cell)> {
        self.0.iter()
    }

    /// Convert into an untyped JSON tree.
    pub fn into_json(self) -> OrmResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| OrmError::Serialization(e.to_string()))
    }
}

impl FromIterator<(String, Cell)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Cell)>>(iter: I) -> Self {
        Record(iter.into_iter().collect())
    }
}
