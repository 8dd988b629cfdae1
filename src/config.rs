use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat as SourceFormat};
use serde::Deserialize;
use tracing::warn;

use crate::bulkload::{
    ColumnDescriptor, LoadMode, LoadOptions, MergeSpec, PipelineOptions, SchemaDescriptor,
    TableIdentifier,
};
use crate::databricks::statement::warehouse_id_from_http_path;
use crate::databricks::{Credentials, UserAgent};
use crate::error::LoadError;
use crate::sql::FileFormat;
use crate::staging::StageCleanup;

const ENV_PREFIX: &str = "STAGELOAD";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub databricks: DatabricksConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    pub load: LoadConfig,
}

/// Workspace connection. Secrets are masked in `Debug` output.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabricksConfig {
    pub server_hostname: String,
    pub http_path: String,
    pub catalog_name: String,
    pub schema_name: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub user_agent: Option<UserAgent>,
}

impl DatabricksConfig {
    pub fn warehouse_id(&self) -> Option<&str> {
        warehouse_id_from_http_path(&self.http_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub volume_name_prefix: String,
    pub delete_stage: bool,
    pub delete_stage_on_error: bool,
    /// Where batch files are written before upload; the OS temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub max_concurrent_uploads: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            volume_name_prefix: "stageload_".to_string(),
            delete_stage: false,
            delete_stage_on_error: false,
            temp_dir: None,
            max_concurrent_uploads: 8,
            shutdown_grace_secs: 60,
        }
    }
}

impl StagingConfig {
    pub fn cleanup(&self) -> StageCleanup {
        StageCleanup {
            delete_stage: self.delete_stage,
            delete_stage_on_error: self.delete_stage_on_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadConfig {
    pub table: String,
    #[serde(default)]
    pub mode: LoadMode,
    #[serde(default = "default_batch_rows")]
    pub batch_rows: u64,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_null_string")]
    pub null_string: String,
    /// Always declare quoted line breaks to COPY, not only for files that contain one.
    #[serde(default)]
    pub multi_line: bool,
    #[serde(default)]
    pub merge_keys: Vec<String>,
    #[serde(default)]
    pub merge_rule: Vec<String>,
    #[serde(default)]
    pub before_load: Option<String>,
    #[serde(default)]
    pub after_load: Option<String>,
    /// Declared input columns, used to create the table when it does not exist.
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

fn default_batch_rows() -> u64 {
    100_000
}

fn default_delimiter() -> String {
    "\t".to_string()
}

fn default_null_string() -> String {
    "\\N".to_string()
}

impl LoadConfig {
    fn delimiter_char(&self) -> Option<char> {
        let mut chars = self.delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }

    pub fn file_format(&self) -> FileFormat {
        FileFormat {
            delimiter: self.delimiter_char().unwrap_or('\t'),
            null_string: self.null_string.clone(),
            multi_line: self.multi_line,
        }
    }

    pub fn merge_spec(&self) -> Result<Option<MergeSpec>, LoadError> {
        if self.merge_keys.is_empty() {
            return Ok(None);
        }
        MergeSpec::new(self.merge_keys.clone(), Some(self.merge_rule.clone())).map(Some)
    }

    /// Declared columns as an input schema; `None` when no columns are configured.
    pub fn input_schema(&self) -> Option<SchemaDescriptor> {
        if self.columns.is_empty() {
            return None;
        }
        Some(SchemaDescriptor::new(
            self.columns
                .iter()
                .map(|c| ColumnDescriptor::declared(&c.name, &c.type_name))
                .collect(),
        ))
    }
}

impl AppConfig {
    /// Read a TOML file, then apply `STAGELOAD__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(Path::new(path)))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Parse a TOML document without consulting the environment.
    pub fn load_from_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, SourceFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Message(msg));

        if self.databricks.server_hostname.trim().is_empty() {
            return invalid("databricks.server_hostname is empty".to_string());
        }
        if self.databricks.warehouse_id().is_none() {
            return invalid(format!(
                "databricks.http_path '{}' does not name a warehouse",
                self.databricks.http_path
            ));
        }
        if self.load.table.trim().is_empty() {
            return invalid("load.table is empty".to_string());
        }
        if self.load.batch_rows == 0 {
            return invalid("load.batch_rows must be positive".to_string());
        }
        match self.load.delimiter_char() {
            None => {
                return invalid(format!(
                    "load.delimiter must be a single character, got {:?}",
                    self.load.delimiter
                ))
            }
            Some('"' | '\\' | '\r' | '\n') => {
                return invalid(format!(
                    "load.delimiter {:?} is reserved",
                    self.load.delimiter
                ))
            }
            Some(_) => {}
        }
        if self.load.mode == LoadMode::Merge && self.load.merge_keys.is_empty() {
            return invalid("merge mode requires load.merge_keys".to_string());
        }
        if self.staging.max_concurrent_uploads == 0 {
            return invalid("staging.max_concurrent_uploads must be positive".to_string());
        }
        if self.staging.delete_stage_on_error && !self.staging.delete_stage {
            warn!("staging.delete_stage_on_error has no effect without staging.delete_stage");
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            format: self.load.file_format(),
            cleanup: self.staging.cleanup(),
            max_concurrent_uploads: self.staging.max_concurrent_uploads,
            shutdown_grace: Duration::from_secs(self.staging.shutdown_grace_secs),
        }
    }

    pub fn load_options(&self) -> Result<LoadOptions, LoadError> {
        let mut options = LoadOptions::new(TableIdentifier::unqualified(&self.load.table), self.load.mode);
        options.merge = self.load.merge_spec()?;
        options.before_load = self.load.before_load.clone();
        options.after_load = self.load.after_load.clone();
        options.batch_rows = self.load.batch_rows;
        if let Some(dir) = &self.staging.temp_dir {
            options.temp_dir = dir.clone();
        }
        options.pipeline = self.pipeline_options();
        Ok(options)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
