//! Source selection shared by every subcommand that binds data.

use anyhow::{Context, Result, bail};
use clap::Args;
use querent_application::{DataSource, QueryApp};
use querent_core::table::Table;
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// SQLite database file, opened read-only
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// JSON file holding an array of records
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,
}

impl SourceArgs {
    /// Human-readable name of the selected source.
    pub fn label(&self) -> String {
        self.db
            .as_ref()
            .or(self.json.as_ref())
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    }

    pub fn into_data_source(self) -> Result<DataSource> {
        match (self.db, self.json) {
            (Some(db), None) => Ok(DataSource::DatabaseFile(db)),
            (None, Some(json)) => Ok(DataSource::Table(load_json_table(&json)?)),
            _ => bail!("exactly one of --db or --json is required"),
        }
    }

    /// Binds the source to a fresh session and returns its id.
    pub async fn bind(self, app: &QueryApp) -> Result<String> {
        let label = self.label();
        let source = self.into_data_source()?;
        app.sessions
            .create_session(source)
            .await
            .with_context(|| format!("failed to bind {label}"))
    }
}

/// Loads a JSON array of flat records as a table named after the file.
pub fn load_json_table(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let Some(records) = parsed.as_array() else {
        bail!("{} must contain an array of records", path.display());
    };

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    Table::from_json_records(name, records)
        .with_context(|| format!("failed to load records from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_json_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pets.json");
        std::fs::write(
            &path,
            r#"[{"name": "rex", "age": 3}, {"name": "tom", "age": 5}]"#,
        )
        .unwrap();

        let table = load_json_table(&path).unwrap();
        assert_eq!(table.name(), "pets");
        assert_eq!(table.row_count(), 2);
        assert!(table.column_index("age").is_some());
    }

    #[test]
    fn test_load_json_rejects_non_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pets.json");
        std::fs::write(&path, r#"{"name": "rex"}"#).unwrap();
        assert!(load_json_table(&path).is_err());
        assert!(load_json_table(&dir.path().join("missing.json")).is_err());
    }
}
