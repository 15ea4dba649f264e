//! Runtime settings for the tempvoice binary.
//!
//! Read from `config.json` in the platform config directory. Every field is
//! optional and environment variables win over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Overrides the database location.
pub const DB_PATH_ENV: &str = "TEMPVOICE_DB_PATH";
/// Overrides the log filter. `RUST_LOG` still takes precedence.
pub const LOG_ENV: &str = "TEMPVOICE_LOG";

pub const DEFAULT_LOG_FILTER: &str = "tempvoice=info";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl Settings {
    /// Settings from the default config file plus the process environment.
    ///
    /// A config file that cannot be used is skipped, and the error is handed
    /// back so it can be logged once tracing is up.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        let (mut settings, skipped) = match config_path().map(|path| Self::from_file(&path)) {
            Some(Ok(settings)) => (settings, None),
            Some(Err(e)) => (Self::default(), Some(e)),
            None => (Self::default(), None),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        (settings, skipped)
    }

    /// Parse a config file. A missing file gives defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(DB_PATH_ENV).filter(|v| !v.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(filter) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
            self.log_filter = Some(filter);
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::db::default_path(),
        }
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

/// `config.json` in the platform config directory.
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tempvoice")
        .map(|dirs| dirs.config_dir().join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_file(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.log_filter(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"log_filter": "tempvoice=debug"}"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.log_filter(), "tempvoice=debug");
        assert!(settings.database_path.is_none());
    }

    #[test]
    fn invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid config"));
    }

    #[test]
    fn environment_overrides_file() {
        let mut settings = Settings {
            database_path: Some(PathBuf::from("/from/file.db")),
            log_filter: Some("tempvoice=warn".into()),
        };
        settings.apply_env(|key| match key {
            DB_PATH_ENV => Some("/from/env.db".into()),
            LOG_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(settings.database_path().unwrap(), PathBuf::from("/from/env.db"));
        assert_eq!(settings.log_filter(), "tempvoice=warn");
    }
}
