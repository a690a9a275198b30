//! Schema value objects.
//!
//! A [`SourceSchema`] is computed once when a source is bound and shared by
//! every query against that binding. The validator, the prompt renderer and
//! the local agent all read from it; nothing re-derives column lists ad hoc.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Blob,
    Unknown,
}

impl ColumnType {
    /// Maps a SQLite declared type to a column type using SQLite's affinity rules.
    ///
    /// ```
    /// use querent_core::schema::ColumnType;
    ///
    /// assert_eq!(ColumnType::from_declared("VARCHAR(20)"), ColumnType::Text);
    /// assert_eq!(ColumnType::from_declared("BIGINT"), ColumnType::Integer);
    /// assert_eq!(ColumnType::from_declared("DOUBLE PRECISION"), ColumnType::Real);
    /// ```
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.is_empty() {
            Self::Unknown
        } else if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.contains("BLOB") {
            Self::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else if upper.contains("BOOL") {
            Self::Boolean
        } else {
            // NUMERIC affinity
            Self::Real
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

/// Tables (and their columns) visible through one bound source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub tables: Vec<TableSchema>,
}

impl SourceSchema {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// True if any table has a column with this name.
    pub fn has_column_anywhere(&self, name: &str) -> bool {
        self.tables.iter().any(|table| table.has_column(name))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|table| table.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compact rendering used in model prompts, one table per line:
    /// `users(id integer, name text)`.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SourceSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, table) in self.tables.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            let columns = table
                .columns
                .iter()
                .map(|column| format!("{} {}", column.name, column.column_type))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "{}({})", table.name, columns)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> SourceSchema {
        SourceSchema::new(vec![TableSchema::new(
            "users",
            vec![
                ColumnSchema::new("id", ColumnType::Integer),
                ColumnSchema::new("Name", ColumnType::Text),
            ],
        )])
    }

    #[test]
    fn test_lookups_ignore_case() {
        let schema = users();
        assert!(schema.has_table("USERS"));
        assert!(schema.table("users").unwrap().has_column("name"));
        assert!(schema.has_column_anywhere("ID"));
        assert!(!schema.has_column_anywhere("password"));
    }

    #[test]
    fn test_describe_renders_one_line_per_table() {
        assert_eq!(users().describe(), "users(id integer, Name text)");
    }

    #[test]
    fn test_declared_type_affinity() {
        assert_eq!(ColumnType::from_declared(""), ColumnType::Unknown);
        assert_eq!(ColumnType::from_declared("nvarchar(10)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("blob"), ColumnType::Blob);
        assert_eq!(ColumnType::from_declared("DECIMAL(10,2)"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("BOOLEAN"), ColumnType::Boolean);
    }
}
