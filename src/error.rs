//! Error types for Playengine.
//!
//! Load-time and configuration failures surface as [`Error`]. They abort a
//! run before any host is touched. Per-host run-time failures live in
//! [`crate::executor::ExecutorError`] and never escape a single host's state
//! unless the play's failure policy escalates them.

use std::path::PathBuf;
use thiserror::Error;

use crate::executor::{ExecutorError, RunCode};

/// Result type alias for Playengine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Playengine.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// Error parsing a playbook file.
    #[error("Failed to parse playbook '{path}': {message}")]
    PlaybookParse {
        /// Path to the playbook file
        path: PathBuf,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error validating playbook structure.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    /// A key in an entity definition matches neither a field nor an action.
    #[error("'{field}' is not a valid attribute for a {entity}")]
    UnknownField {
        /// Entity kind (play, block, task)
        entity: &'static str,
        /// Offending key
        field: String,
    },

    /// A field value could not be coerced to the declared type.
    #[error("Field '{field}' expects {expected}, found {found}")]
    InvalidFieldValue {
        /// Field name
        field: String,
        /// Expected type
        expected: &'static str,
        /// Description of the value found
        found: String,
    },

    /// An `action:` statement names a module the catalog does not know.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// Error loading inventory.
    #[error("Failed to load inventory from '{path}': {message}")]
    InventoryLoad {
        /// Path to inventory
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A host pattern could not be compiled.
    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),

    /// A host name that the inventory does not list.
    #[error("Host '{0}' not found in inventory")]
    HostNotFound(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A run-time failure that escaped per-host containment.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Creates a new playbook parse error.
    pub fn playbook_parse(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a new unknown field error.
    pub fn unknown_field(entity: &'static str, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity,
            field: field.into(),
        }
    }

    /// Creates a new invalid field value error.
    pub fn invalid_field(
        field: impl Into<String>,
        expected: &'static str,
        found: impl Into<String>,
    ) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            expected,
            found: found.into(),
        }
    }

    /// Returns true for errors raised while loading playbooks or inventory.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Error::PlaybookParse { .. }
                | Error::PlaybookValidation(_)
                | Error::UnknownField { .. }
                | Error::InvalidFieldValue { .. }
                | Error::ModuleNotFound(_)
                | Error::InventoryLoad { .. }
                | Error::YamlParse(_)
        )
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        RunCode::Error.exit_code()
    }
}
