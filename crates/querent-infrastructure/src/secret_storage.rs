//! Provider credentials kept outside `config.toml`.
//!
//! ```json
//! { "openai": { "api_key": "sk-...", "model_name": "gpt-4o-mini" },
//!   "claude": { "api_key": "..." } }
//! ```

use querent_core::config::ModelProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSecret {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretConfig {
    #[serde(default)]
    pub openai: Option<ProviderSecret>,
    #[serde(default)]
    pub claude: Option<ProviderSecret>,
}

impl SecretConfig {
    /// Entry for `provider`, skipped when its key is blank.
    pub fn for_provider(&self, provider: ModelProvider) -> Option<&ProviderSecret> {
        let entry = match provider {
            ModelProvider::Local => None,
            ModelProvider::OpenAi => self.openai.as_ref(),
            ModelProvider::Claude => self.claude.as_ref(),
        };
        entry.filter(|secret| !secret.api_key.trim().is_empty())
    }
}

/// Failure reading `secret.json`. The file contents never appear in messages.
#[derive(Debug)]
pub enum SecretStorageError {
    Unreadable { path: PathBuf, source: std::io::Error },
    Malformed { path: PathBuf, line: usize, column: usize },
}

impl fmt::Display for SecretStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            Self::Malformed { path, line, column } => {
                write!(f, "{} is not valid JSON (line {line}, column {column})", path.display())
            }
        }
    }
}

impl std::error::Error for SecretStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreadable { source, .. } => Some(source),
            Self::Malformed { .. } => None,
        }
    }
}

/// Read-only view of one secret file. Keys are parsed, never checked.
#[derive(Debug, Clone)]
pub struct SecretStorage {
    path: PathBuf,
}

impl SecretStorage {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the file. A missing file yields an empty config.
    pub fn load(&self) -> Result<SecretConfig, SecretStorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!("[SecretStorage] No secret file at {}", self.path.display());
                return Ok(SecretConfig::default());
            }
            Err(source) => {
                return Err(SecretStorageError::Unreadable {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|err| SecretStorageError::Malformed {
            path: self.path.clone(),
            line: err.line(),
            column: err.column(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = SecretStorage::at(dir.path().join("secret.json"));
        assert_eq!(storage.load().unwrap(), SecretConfig::default());
    }

    #[test]
    fn test_blank_keys_count_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(
            &path,
            r#"{"openai": {"api_key": "sk-abc", "model_name": "gpt-4o"}, "claude": {"api_key": "  "}}"#,
        )
        .unwrap();

        let secrets = SecretStorage::at(&path).load().unwrap();
        let openai = secrets.for_provider(ModelProvider::OpenAi).unwrap();
        assert_eq!(openai.api_key, "sk-abc");
        assert_eq!(openai.model_name.as_deref(), Some("gpt-4o"));
        assert!(secrets.for_provider(ModelProvider::Claude).is_none());
        assert!(secrets.for_provider(ModelProvider::Local).is_none());
    }

    #[test]
    fn test_malformed_file_reports_position_not_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(&path, "{\n  \"openai\": sk-leaked\n}").unwrap();

        let err = SecretStorage::at(&path).load().unwrap_err();
        assert!(matches!(err, SecretStorageError::Malformed { line: 2, .. }));
        assert!(!err.to_string().contains("sk-leaked"));
    }
}
