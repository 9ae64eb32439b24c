use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Navigation expansion limits and output options
#[derive(Clone, Debug, Validate, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Longest navigation chain a single member access may traverse
    #[validate(range(
        min = 1,
        max = 64,
        message = "Max navigation depth must be between 1 and 64"
    ))]
    pub max_navigation_depth: usize,

    /// Deepest nesting of subqueries inside lambdas
    #[validate(range(
        min = 1,
        max = 64,
        message = "Max subquery depth must be between 1 and 64"
    ))]
    pub max_subquery_depth: usize,

    /// Reject reduced trees that still contain expansion-only nodes
    pub validate_output: bool,

    /// Emit include-assignment markers for eager-loaded navigations.
    /// When off, included navigations are still joined.
    pub emit_include_assignments: bool,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_navigation_depth: 16,
            max_subquery_depth: 16,
            validate_output: true,
            emit_include_assignments: true,
        }
    }
}

impl ExpansionConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            max_navigation_depth: parse_env_var("NAVEXPAND_MAX_NAVIGATION_DEPTH", "16")?,
            max_subquery_depth: parse_env_var("NAVEXPAND_MAX_SUBQUERY_DEPTH", "16")?,
            validate_output: parse_env_var("NAVEXPAND_VALIDATE_OUTPUT", "true")?,
            emit_include_assignments: parse_env_var("NAVEXPAND_EMIT_INCLUDE_ASSIGNMENTS", "true")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from CLI arguments with validation
    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        let config = Self {
            max_navigation_depth: cli.max_navigation_depth,
            max_subquery_depth: cli.max_subquery_depth,
            validate_output: cli.validate_output,
            emit_include_assignments: cli.emit_include_assignments,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides on top of a loaded configuration
    pub fn merge(&mut self, overrides: CliOverrides) {
        if let Some(depth) = overrides.max_navigation_depth {
            self.max_navigation_depth = depth;
        }
        if let Some(depth) = overrides.max_subquery_depth {
            self.max_subquery_depth = depth;
        }
    }
}

/// CLI configuration (parsed from command line arguments)
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub max_navigation_depth: usize,
    pub max_subquery_depth: usize,
    pub validate_output: bool,
    pub emit_include_assignments: bool,
}

/// Limits given explicitly on the command line
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub max_navigation_depth: Option<usize>,
    pub max_subquery_depth: Option<usize>,
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
