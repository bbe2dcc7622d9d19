//! Configuration loading and validation.
//!
//! A configuration file (JSON, TOML or YAML, picked by extension) is merged
//! with `TABLE_VALIDATOR__*` environment overrides, `${VAR}` placeholders are
//! expanded, and the result is validated into a [`ValidatedConfig`] before
//! any table is touched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::mapping::TableMapping;
use crate::domain::window::RunWindow;
use crate::engine::coordinator::EngineSettings;
use crate::engine::retry::RetryPolicy;
use crate::infrastructure::sqlite_comparator::check_link_name;

/// Prefix of environment overrides, e.g. `TABLE_VALIDATOR__MAX_CONCURRENT_VALIDATIONS=2`.
pub const ENV_PREFIX: &str = "TABLE_VALIDATOR";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern"));

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$#]*(\.[A-Za-z_][A-Za-z0-9_$#]*)?$")
        .expect("identifier pattern")
});

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Invalid configuration: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

pub mod defaults {
    /// Tables validated at the same time
    pub const MAX_CONCURRENT_VALIDATIONS: usize = 5;

    /// Mismatch samples retained per run
    pub const MAX_MISMATCH_DETAILS: usize = 1000;

    /// Rows per chunk when a mapping sets none
    pub const CHUNK_SIZE: u32 = 10_000;

    pub const DB_LINK_NAME: &str = "source_link";

    pub const PROGRESS_DATABASE: &str = "data/validation_progress.db";

    // Logging
    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = false;
    pub const LOG_FILE_NAME: &str = "table-validator.log";
    pub const LOG_MAX_FILES: u32 = 10;
    pub const LOG_AUTO_CLEANUP: bool = true;
    pub const LOG_KEEP_ONLY_LATEST: bool = false;

    pub(super) fn max_concurrent_validations() -> usize {
        MAX_CONCURRENT_VALIDATIONS
    }

    pub(super) fn max_mismatch_details() -> usize {
        MAX_MISMATCH_DETAILS
    }

    pub(super) fn chunk_size() -> u32 {
        CHUNK_SIZE
    }

    pub(super) fn db_link_name() -> String {
        DB_LINK_NAME.to_string()
    }

    pub(super) fn progress_database() -> std::path::PathBuf {
        PROGRESS_DATABASE.into()
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Directory for log files; defaults to `logs/` next to the executable
    pub directory: Option<PathBuf>,

    pub file_name: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Keep only the most recent log file (delete all others)
    pub keep_only_latest: bool,

    /// Module-specific level overrides, e.g. `"sqlx": "warn"`
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            directory: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            keep_only_latest: defaults::LOG_KEEP_ONLY_LATEST,
            module_filters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Where the JSON report of every run is written, if anywhere.
    #[serde(default)]
    pub json_path: Option<PathBuf>,
}

/// One `table_mappings[]` entry as written in the file.
///
/// `incremental_mode` and `incremental_column` fall back to the global
/// values when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMappingConfig {
    pub source_table: String,
    pub target_table: String,
    pub natural_keys: Vec<String>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: u32,
    #[serde(default)]
    pub incremental_mode: Option<bool>,
    #[serde(default)]
    pub incremental_column: Option<String>,
    #[serde(default)]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub run_window: Option<RunWindow>,
}

/// Raw application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database attached under `db_link_name` and read as the source side
    pub source_database: PathBuf,
    pub target_database: PathBuf,
    #[serde(default = "defaults::db_link_name")]
    pub db_link_name: String,
    #[serde(default = "defaults::progress_database")]
    pub progress_database: PathBuf,
    pub table_mappings: Vec<TableMappingConfig>,
    #[serde(default = "defaults::max_concurrent_validations")]
    pub max_concurrent_validations: usize,
    #[serde(default = "defaults::max_mismatch_details")]
    pub max_mismatch_details: usize,
    #[serde(default)]
    pub run_window: Option<RunWindow>,
    #[serde(default)]
    pub incremental_mode: bool,
    #[serde(default)]
    pub incremental_column: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration that passed every check; safe to hand to the engine.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub source_database: PathBuf,
    pub target_database: PathBuf,
    pub db_link_name: String,
    pub progress_database: PathBuf,
    pub mappings: Vec<TableMapping>,
    pub settings: EngineSettings,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path` plus environment overrides, expanding `${VAR}`
    /// placeholders from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut raw: serde_json::Value = settings.try_deserialize()?;
        expand_placeholders(&mut raw, &|name| std::env::var(name).ok());

        let config: Self = serde_json::from_value(raw)
            .map_err(|e| ConfigError::validation(format!("{}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            tables = config.table_mappings.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load and validate in one step.
    pub fn load_validated(path: &Path) -> Result<ValidatedConfig, ConfigError> {
        Self::load(path)?.validate()
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.max_concurrent_validations == 0 {
            return Err(ConfigError::validation("max_concurrent_validations must be at least 1"));
        }
        if self.table_mappings.is_empty() {
            return Err(ConfigError::validation("table_mappings must list at least one table"));
        }
        check_link_name(&self.db_link_name).map_err(|e| ConfigError::validation(e.to_string()))?;
        self.retry.validate().map_err(ConfigError::validation)?;
        if let Some(column) = &self.incremental_column {
            check_identifier("incremental_column", column)?;
        }

        let mut seen = HashSet::new();
        let mut mappings = Vec::with_capacity(self.table_mappings.len());
        for entry in &self.table_mappings {
            let mapping = self.resolve_mapping(entry);
            check_mapping_identifiers(&mapping)?;
            mapping.validate().map_err(|e| ConfigError::validation(e.to_string()))?;

            let table_id = mapping.table_id();
            if !seen.insert(table_id.to_ascii_lowercase()) {
                return Err(ConfigError::validation(format!("table {table_id} is configured twice")));
            }
            debug!(table = %table_id, chunk_size = mapping.chunk_size, "Mapping validated");
            mappings.push(mapping);
        }

        Ok(ValidatedConfig {
            source_database: self.source_database,
            target_database: self.target_database,
            db_link_name: self.db_link_name,
            progress_database: self.progress_database,
            mappings,
            settings: EngineSettings {
                max_concurrent_validations: self.max_concurrent_validations,
                max_mismatch_details: self.max_mismatch_details,
                run_window: self.run_window,
                retry: self.retry,
            },
            report: self.report,
            logging: self.logging,
        })
    }

    fn resolve_mapping(&self, entry: &TableMappingConfig) -> TableMapping {
        TableMapping {
            source_table: entry.source_table.clone(),
            target_table: entry.target_table.clone(),
            natural_keys: entry.natural_keys.clone(),
            exclude_columns: entry.exclude_columns.clone(),
            chunk_size: entry.chunk_size,
            incremental_mode: entry.incremental_mode.unwrap_or(self.incremental_mode),
            incremental_column: entry
                .incremental_column
                .clone()
                .or_else(|| self.incremental_column.clone()),
            where_clause: entry.where_clause.clone(),
            run_window: entry.run_window.clone(),
        }
    }
}

fn check_identifier(what: &str, name: &str) -> Result<(), ConfigError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::validation(format!("{what} {name:?} is not a valid identifier")))
    }
}

fn check_mapping_identifiers(mapping: &TableMapping) -> Result<(), ConfigError> {
    check_identifier("source_table", &mapping.source_table)?;
    check_identifier("target_table", &mapping.target_table)?;
    for column in mapping.natural_keys.iter().chain(&mapping.exclude_columns) {
        if column.contains('.') {
            return Err(ConfigError::validation(format!(
                "column {column:?} of {} must not be qualified",
                mapping.table_id()
            )));
        }
        check_identifier("column", column)?;
    }
    if let Some(column) = mapping.incremental_column() {
        check_identifier("incremental_column", column)?;
    }
    Ok(())
}

/// Replace `${VAR}` in every string of `value`. Unknown variables stay as
/// written.
pub fn expand_placeholders(value: &mut serde_json::Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${") {
                let expanded = PLACEHOLDER.replace_all(s, |caps: &regex::Captures<'_>| {
                    lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
                });
                *s = expanded.into_owned();
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                expand_placeholders(item, lookup);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                expand_placeholders(item, lookup);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_config(body: &str, ext: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("validator.{ext}"));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    fn base() -> serde_json::Value {
        json!({
            "source_database": "/data/source.db",
            "target_database": "/data/target.db",
            "table_mappings": [
                { "source_table": "ORDERS", "target_table": "ORDERS", "natural_keys": ["ORDER_ID"] }
            ]
        })
    }

    fn parse(value: serde_json::Value) -> AppConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn placeholders_expand_and_unknown_ones_stay() {
        let mut value = json!({
            "user": "${DB_USER}",
            "dsn": "file:${DB_DIR}/t.db",
            "to": ["${MAIL}", "admin@example.com"],
            "missing": "${NOT_SET_ANYWHERE}",
            "port": 1521
        });
        let env = |name: &str| match name {
            "DB_USER" => Some("scott".to_string()),
            "DB_DIR" => Some("/var/db".to_string()),
            "MAIL" => Some("ops@example.com".to_string()),
            _ => None,
        };
        expand_placeholders(&mut value, &env);

        assert_eq!(value["user"], "scott");
        assert_eq!(value["dsn"], "file:/var/db/t.db");
        assert_eq!(value["to"], json!(["ops@example.com", "admin@example.com"]));
        assert_eq!(value["missing"], "${NOT_SET_ANYWHERE}");
        assert_eq!(value["port"], 1521);
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let validated = parse(base()).validate().unwrap();
        assert_eq!(validated.settings.max_concurrent_validations, 5);
        assert_eq!(validated.settings.max_mismatch_details, 1000);
        assert_eq!(validated.db_link_name, "source_link");
        assert_eq!(validated.mappings[0].chunk_size, 10_000);
        assert!(validated.settings.run_window.is_none());
        assert!(validated.report.json_path.is_none());
    }

    #[test]
    fn global_incremental_settings_apply_to_mappings() {
        let mut value = base();
        value["incremental_mode"] = json!(true);
        value["incremental_column"] = json!("LAST_MODIFIED");
        value["table_mappings"].as_array_mut().unwrap().push(json!({
            "source_table": "ITEMS",
            "target_table": "ITEMS",
            "natural_keys": ["ITEM_ID"],
            "incremental_mode": false
        }));

        let validated = parse(value).validate().unwrap();
        assert_eq!(validated.mappings[0].incremental_column(), Some("LAST_MODIFIED"));
        assert_eq!(validated.mappings[1].incremental_column(), None);
    }

    #[test]
    fn rejects_bad_identifiers_and_duplicates() {
        let mut value = base();
        value["table_mappings"][0]["source_table"] = json!("ORDERS; DROP TABLE X");
        assert!(matches!(parse(value).validate(), Err(ConfigError::Validation { .. })));

        let mut value = base();
        let entry = value["table_mappings"][0].clone();
        value["table_mappings"].as_array_mut().unwrap().push(entry);
        let err = parse(value).validate().unwrap_err();
        assert!(err.to_string().contains("configured twice"));

        let mut value = base();
        value["db_link_name"] = json!("main");
        assert!(parse(value).validate().is_err());

        let mut value = base();
        value["table_mappings"][0]["source_table"] = json!("APP.ORDERS");
        assert!(parse(value).validate().is_ok());
    }

    #[test]
    fn rejects_invalid_mappings_and_limits() {
        let mut value = base();
        value["table_mappings"][0]["chunk_size"] = json!(0);
        assert!(parse(value).validate().is_err());

        let mut value = base();
        value["table_mappings"][0]["exclude_columns"] = json!(["order_id"]);
        assert!(parse(value).validate().is_err());

        let mut value = base();
        value["table_mappings"][0]["incremental_mode"] = json!(true);
        assert!(parse(value).validate().is_err());

        let mut value = base();
        value["max_concurrent_validations"] = json!(0);
        assert!(parse(value).validate().is_err());
    }

    #[test]
    fn malformed_run_window_fails_to_parse() {
        let mut value = base();
        value["run_window"] = json!({ "start_time": "09:00:00", "end_time": "09:00:00" });
        assert!(serde_json::from_value::<AppConfig>(value).is_err());

        let mut value = base();
        value["run_window"] =
            json!({ "start_time": "22:00:00", "end_time": "06:00:00", "days_of_week": [0, 7] });
        assert!(serde_json::from_value::<AppConfig>(value).is_err());
    }

    #[test]
    fn loads_toml_file_with_window_and_placeholders() {
        // cargo exports CARGO_MANIFEST_DIR to test processes
        let (_dir, path) = write_config(
            r#"
source_database = "${CARGO_MANIFEST_DIR}/source.db"
target_database = "/mnt/target.db"
max_concurrent_validations = 2

[run_window]
start_time = "22:00:00"
end_time = "06:00:00"
days_of_week = [0, 1, 2, 3, 4]

[[table_mappings]]
source_table = "ORDERS"
target_table = "ORDERS_COPY"
natural_keys = ["ORDER_ID", "LINE_NO"]
exclude_columns = ["LOAD_TS"]
chunk_size = 500
"#,
            "toml",
        );

        let validated = AppConfig::load_validated(&path).unwrap();
        assert_eq!(
            validated.source_database,
            PathBuf::from(format!("{}/source.db", env!("CARGO_MANIFEST_DIR")))
        );
        assert_eq!(validated.settings.max_concurrent_validations, 2);
        let window = validated.settings.run_window.unwrap();
        assert!(window.spans_midnight());
        assert_eq!(validated.mappings[0].table_id(), "ORDERS=>ORDERS_COPY");
        assert_eq!(validated.mappings[0].chunk_size, 500);
    }
}
