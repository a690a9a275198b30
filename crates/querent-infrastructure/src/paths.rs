//! Where querent keeps its files.
//!
//! ```text
//! <platform config dir>/querent/
//! ├── config.toml
//! └── secret.json    (mode 600, never written by querent)
//! ```

use std::path::PathBuf;

const APP_DIR: &str = "querent";
const CONFIG_FILE: &str = "config.toml";
const SECRET_FILE: &str = "secret.json";

pub struct QuerentPaths;

impl QuerentPaths {
    /// `None` when the platform exposes no config directory (e.g. no `$HOME`).
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|base| base.join(APP_DIR))
    }

    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn secret_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join(SECRET_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_live_under_app_dir() {
        let Some(dir) = QuerentPaths::config_dir() else {
            return;
        };
        assert_eq!(dir.file_name().and_then(|n| n.to_str()), Some("querent"));
        assert_eq!(QuerentPaths::config_file(), Some(dir.join("config.toml")));
        assert_eq!(QuerentPaths::secret_file(), Some(dir.join("secret.json")));
    }
}
