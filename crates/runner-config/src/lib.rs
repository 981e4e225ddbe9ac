use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

use job_runner::JobError;

pub mod job;
pub mod settings;

pub use job::JobFile;
pub use settings::RunnerSettings;

pub const CONFIG_DIR_ENV: &str = "RUNNER_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = ".runner/config";
const SETTINGS_FILE: &str = "runner.json";

const RUNNER_SCHEMA: &str = include_str!("../schemas/runner-config.v1.json");
const JOB_SCHEMA: &str = include_str!("../schemas/job-config.v1.json");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Schema compilation failed for {schema}: {message}")]
    SchemaCompilationFailed {
        schema: &'static str,
        message: String,
    },

    #[error("{document} failed validation: {}", join_errors(.errors))]
    ValidationFailed {
        document: String,
        errors: Vec<ValidationError>,
    },

    #[error("JSON parsing failed for {document}: {message}")]
    JsonParsingFailed { document: String, message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Invalid duration '{value}' for {field}: {message}")]
    InvalidDuration {
        field: String,
        value: String,
        message: String,
    },

    #[error("Invalid value '{value}' for {variable}")]
    InvalidOverride { variable: String, value: String },

    #[error("No payload given: set `payload` in the job file or pass --payload")]
    MissingPayload,

    #[error(transparent)]
    Job(#[from] JobError),
}

/// One schema violation, addressed by JSON pointer into the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pointer = if self.json_pointer.is_empty() {
            "/"
        } else {
            &self.json_pointer
        };
        write!(f, "{}: {}", pointer, self.message)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The embedded schemas a document can be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Runner,
    Job,
}

impl Schema {
    fn name(self) -> &'static str {
        match self {
            Schema::Runner => "runner-config.v1",
            Schema::Job => "job-config.v1",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Schema::Runner => RUNNER_SCHEMA,
            Schema::Job => JOB_SCHEMA,
        }
    }

    fn value(self) -> Result<Value, ConfigError> {
        serde_json::from_str(self.source()).map_err(|e| ConfigError::SchemaCompilationFailed {
            schema: self.name(),
            message: e.to_string(),
        })
    }

    fn compile(self) -> Result<JSONSchema, ConfigError> {
        let value = self.value()?;
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&value)
            .map_err(|e| ConfigError::SchemaCompilationFailed {
                schema: self.name(),
                message: e.to_string(),
            })
    }

    /// Top-level `default` values declared by the schema.
    fn defaults(self) -> Result<Map<String, Value>, ConfigError> {
        let value = self.value()?;
        let mut defaults = Map::new();
        if let Some(properties) = value.get("properties").and_then(|p| p.as_object()) {
            for (key, property) in properties {
                if let Some(default_value) = property.get("default") {
                    defaults.insert(key.clone(), default_value.clone());
                }
            }
        }
        Ok(defaults)
    }
}

/// Loads host settings and job files, validating each against its schema
/// before it is deserialized.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Config directory from `RUNNER_CONFIG_DIR`, otherwise `.runner/config`.
    pub fn new() -> Self {
        let config_dir = match env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(DEFAULT_CONFIG_DIR),
        };
        Self { config_dir }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Settings from `<config_dir>/runner.json` with `RUNNER_*` environment
    /// overrides applied on top.
    #[instrument(skip(self))]
    pub fn load_settings(&self) -> Result<RunnerSettings, ConfigError> {
        self.load_settings_with(|key| env::var(key).ok())
    }

    /// Same as [`load_settings`](Self::load_settings) with an explicit
    /// variable lookup in place of the process environment.
    pub fn load_settings_with<F>(&self, lookup: F) -> Result<RunnerSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = self.config_dir.join(SETTINGS_FILE);
        let mut document = if path.exists() {
            debug!("Loading runner settings from: {:?}", path);
            read_json(&path)?
        } else {
            debug!("Settings file not found, loading defaults from schema");
            Value::Object(Map::new())
        };

        // Missing keys fall back to the schema defaults, so a partial file is
        // as valid as an absent one.
        if let Value::Object(fields) = &mut document {
            for (key, default_value) in Schema::Runner.defaults()? {
                fields.entry(key).or_insert(default_value);
            }
        }

        let mut settings: RunnerSettings =
            validate_and_parse(Schema::Runner, &path.display().to_string(), document)?;
        settings.apply_overrides(lookup)?;
        Ok(settings)
    }

    /// Reads a job file. Relative `payload` and `workspace` paths are taken
    /// relative to the file's own directory.
    #[instrument]
    pub fn load_job(path: &Path) -> Result<JobFile, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigFileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let document = read_json(path)?;
        let mut job: JobFile =
            validate_and_parse(Schema::Job, &path.display().to_string(), document)?;

        if let Some(base) = path.parent() {
            job.rebase(base);
        }
        Ok(job)
    }

    /// Checks a document against one of the embedded schemas without
    /// deserializing it.
    pub fn validate_value(schema: Schema, value: &Value) -> Result<(), ConfigError> {
        validate(schema, schema.name(), value)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;

    serde_json::from_str(&content).map_err(|e| ConfigError::JsonParsingFailed {
        document: path.display().to_string(),
        message: e.to_string(),
    })
}

fn validate(schema: Schema, document: &str, value: &Value) -> Result<(), ConfigError> {
    let compiled = schema.compile()?;
    let validation_result = compiled.validate(value);

    if let Err(errors) = validation_result {
        let validation_errors: Vec<ValidationError> = errors
            .map(|error| ValidationError {
                json_pointer: error.instance_path.to_string(),
                message: error.to_string(),
                schema_path: error.schema_path.to_string(),
            })
            .collect();

        return Err(ConfigError::ValidationFailed {
            document: document.to_string(),
            errors: validation_errors,
        });
    }

    Ok(())
}

fn validate_and_parse<T: DeserializeOwned>(
    schema: Schema,
    document: &str,
    value: Value,
) -> Result<T, ConfigError> {
    validate(schema, document, &value)?;
    serde_json::from_value(value).map_err(|e| ConfigError::JsonParsingFailed {
        document: document.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_schemas_compile() {
        assert!(Schema::Runner.compile().is_ok());
        assert!(Schema::Job.compile().is_ok());
    }

    #[test]
    fn schema_defaults_validate_against_their_own_schema() {
        let defaults = Value::Object(Schema::Runner.defaults().unwrap());
        ConfigManager::validate_value(Schema::Runner, &defaults).unwrap();
    }

    #[test]
    fn validation_errors_carry_json_pointers() {
        let err = ConfigManager::validate_value(
            Schema::Runner,
            &json!({ "exitPolicy": "sometimes", "mountTarget": "relative" }),
        )
        .unwrap_err();

        match err {
            ConfigError::ValidationFailed { errors, .. } => {
                let pointers: Vec<&str> = errors.iter().map(|e| e.json_pointer.as_str()).collect();
                assert!(pointers.contains(&"/exitPolicy"), "{pointers:?}");
                assert!(pointers.contains(&"/mountTarget"), "{pointers:?}");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn root_level_errors_display_slash_pointer() {
        let error = ValidationError {
            json_pointer: String::new(),
            message: "\"payload\" is a required property".into(),
            schema_path: "/required".into(),
        };
        assert_eq!(error.to_string(), "/: \"payload\" is a required property");
    }
}
