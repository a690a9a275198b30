//! In-memory tabular data and query results.

use crate::error::{QuerentError, Result};
use crate::schema::{ColumnSchema, ColumnType, SourceSchema, TableSchema};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value; booleans count as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Storage type this single value would infer.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Null => ColumnType::Unknown,
            Self::Bool(_) => ColumnType::Boolean,
            Self::Int(_) => ColumnType::Integer,
            Self::Float(_) => ColumnType::Real,
            Self::Text(_) => ColumnType::Text,
        }
    }

    /// Total order used for sorting and comparisons.
    ///
    /// Null sorts first, then booleans, then numbers (Int and Float compared
    /// numerically), then text.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(value: &Value) -> u8 {
            match value {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Text(_) => 3,
            }
        }

        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                a.total_cmp(&b)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Equality with numeric coercion (`Int(3) == Float(3.0)`).
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }

    /// Converts a JSON scalar. Arrays and objects are rendered as JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "{value:.1}")
                } else {
                    let rounded = (value * 10_000.0).round() / 10_000.0;
                    write!(f, "{rounded}")
                }
            }
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

/// Infers a column type from all of its values.
///
/// All-null columns are `Unknown`; integers mixed with reals widen to `Real`;
/// any other mix is `Text`.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;
    for value in values {
        let current = value.column_type();
        if current == ColumnType::Unknown {
            continue;
        }
        inferred = Some(match inferred {
            None => current,
            Some(previous) if previous == current => previous,
            Some(previous) if previous.is_numeric() && current.is_numeric() => ColumnType::Real,
            Some(_) => ColumnType::Text,
        });
    }
    inferred.unwrap_or(ColumnType::Unknown)
}

/// An immutable in-memory table bound to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    columns: Vec<ColumnSchema>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Builds a table from column names and rows, inferring column types.
    ///
    /// # Errors
    ///
    /// Returns `QuerentError::DataAccess` if a row's width differs from the
    /// header or a column name is duplicated.
    pub fn from_rows(
        name: impl Into<String>,
        column_names: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self> {
        for (index, column) in column_names.iter().enumerate() {
            if column_names[..index]
                .iter()
                .any(|other| other.eq_ignore_ascii_case(column))
            {
                return Err(QuerentError::data_access(format!(
                    "duplicate column name '{column}'"
                )));
            }
        }

        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != column_names.len())
        {
            return Err(QuerentError::data_access(format!(
                "row {index} has {} values but the table has {} columns",
                row.len(),
                column_names.len()
            )));
        }

        let columns = column_names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let column_type = infer_column_type(rows.iter().map(|row| &row[index]));
                ColumnSchema::new(name, column_type)
            })
            .collect();

        Ok(Self {
            name: name.into(),
            columns,
            rows,
        })
    }

    /// Builds a table from an array of JSON objects.
    ///
    /// Column order follows first appearance across records; missing keys
    /// become nulls.
    pub fn from_json_records(name: impl Into<String>, records: &[serde_json::Value]) -> Result<Self> {
        let mut column_names: Vec<String> = Vec::new();
        for record in records {
            let object = record.as_object().ok_or_else(|| {
                QuerentError::data_access("every record must be a JSON object")
            })?;
            for key in object.keys() {
                if !column_names.iter().any(|existing| existing == key) {
                    column_names.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(|record| record.as_object())
            .map(|object| {
                column_names
                    .iter()
                    .map(|column| object.get(column).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self::from_rows(name, column_names, rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Case-insensitive column position.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(self.name.clone(), self.columns.clone())
    }

    pub fn schema(&self) -> SourceSchema {
        SourceSchema::new(vec![self.table_schema()])
    }

    /// First `limit` rows as a result set.
    pub fn preview(&self, limit: usize) -> ResultSet {
        ResultSet {
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
            rows: self.rows.iter().take(limit).cloned().collect(),
            truncated: self.rows.len() > limit,
        }
    }
}

/// Rows produced by executing an accepted fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Set when rows beyond the configured cap were dropped.
    pub truncated: bool,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    /// A one-cell result.
    pub fn scalar(column: impl Into<String>, value: Value) -> Self {
        Self::new(vec![column.into()], vec![vec![value]])
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Truncates to at most `cap` rows, deterministically keeping the first ones.
    pub fn cap_rows(mut self, cap: usize) -> Self {
        if self.rows.len() > cap {
            self.rows.truncate(cap);
            self.truncated = true;
        }
        self
    }
}
