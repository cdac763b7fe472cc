use log::{LevelFilter, debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::export::OutputFormat;
use crate::query_ast::QueryAstError;

/// Points at an alternative JSON settings file.
pub const CONFIG_ENV: &str = "SQLPIPE_CONFIG";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Runtime settings for the evaluating end of a pipeline.
///
/// Built from defaults, then an optional JSON file, then `SQLPIPE_*` environment variables
/// (a `.env` file in the working directory counts as environment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `sqlite:` URL, file path, or `:memory:`.
    pub database: String,
    pub batch_size: usize,
    pub default_format: OutputFormat,
    pub log_level: String,
    /// Statements run on the engine connection before evaluating.
    pub init_sql: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: ":memory:".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            default_format: OutputFormat::Csv,
            log_level: "warn".to_string(),
            init_sql: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, QueryAstError> {
        dotenv::dotenv().ok();
        let mut settings = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, QueryAstError> {
        let content = fs::read_to_string(path)
            .map_err(|e| QueryAstError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| QueryAstError::Config(format!("invalid settings in {}: {}", path.display(), e)))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Overrides fields from `SQLPIPE_*` variables as resolved by `get`.
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), QueryAstError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = get("SQLPIPE_DATABASE") {
            self.database = database;
        }
        if let Some(raw) = get("SQLPIPE_BATCH_SIZE") {
            self.batch_size = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(QueryAstError::Config(format!(
                        "SQLPIPE_BATCH_SIZE must be a positive integer, got '{}'",
                        raw
                    )));
                }
            };
        }
        if let Some(raw) = get("SQLPIPE_FORMAT") {
            self.default_format = raw
                .parse()
                .map_err(|e| QueryAstError::Config(format!("SQLPIPE_FORMAT: {}", e)))?;
        }
        if let Some(level) = get("SQLPIPE_LOG") {
            self.log_level = level;
        }
        if let Some(sql) = get("SQLPIPE_INIT_SQL") {
            self.init_sql = if sql.trim().is_empty() { None } else { Some(sql) };
        }
        debug!("settings: {:?}", self);
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, QueryAstError> {
        self.log_level
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| QueryAstError::Config(format!("unknown log level '{}'", self.log_level)))
    }
}

pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(custom) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(custom));
    }
    dirs::config_dir().map(|mut dir| {
        dir.push("sqlpipe");
        dir.push(CONFIG_FILE);
        dir
    })
}

/// Logs go to stderr; stdout carries the plan or the results.
pub fn init_logging(level: LevelFilter) {
    let _ = env_logger::Builder::from_default_env()
        .filter_module("sqlpipe", level)
        .target(env_logger::Target::Stderr)
        .is_test(false)
        .try_init();
}
