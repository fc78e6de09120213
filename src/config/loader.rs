//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`FuzzConfig`], and run
//! validation before returning. This is the entry point for loading an
//! experiment description at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)
//! - Applying command-line overrides (that belongs to the binary)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::FuzzConfig;

/// Load a [`FuzzConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_rl_fuzzer::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("fuzz.toml"))?;
/// println!("Fuzzing {}", config.target.api_name);
/// ```
pub fn load_from_file(path: &Path) -> Result<FuzzConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`FuzzConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<FuzzConfig, ConfigError> {
    let config: FuzzConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate an already-built config, joining every violation into one error.
///
/// Used after command-line overrides are applied.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] listing every violated rule.
///
/// # Panics
///
/// This function never panics.
pub fn validate_config(config: &FuzzConfig) -> Result<(), ConfigError> {
    validation::validate(config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })
}
