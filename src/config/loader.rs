//! Settings file loading.

use std::path::Path;

use crate::config::schema::Settings;
use crate::error::ConfigError;

/// Largest settings file accepted, in bytes.
pub const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Reads, parses and validates a settings file.
///
/// An empty file yields the defaults. Size is bounded by
/// `RSARMAGEDDON_MAX_CONFIG_SIZE` (default [`MAX_CONFIG_SIZE`]).
///
/// # Errors
///
/// Returns `ConfigError::MissingFile` if the file cannot be read,
/// `ConfigError::TooLarge` above the size limit, `ConfigError::ParseError`
/// for malformed YAML and `ConfigError::ValidationError` listing every
/// invalid value.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let limit = env_or("RSARMAGEDDON_MAX_CONFIG_SIZE", MAX_CONFIG_SIZE);
    let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    if metadata.len() > limit {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit,
        });
    }

    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let settings: Settings = if raw.trim().is_empty() {
        Settings::default()
    } else {
        serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?
    };

    let issues = settings.validate();
    if !issues.is_empty() {
        return Err(ConfigError::ValidationError {
            path: path.display().to_string(),
            errors: issues,
        });
    }
    tracing::debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Parses an environment variable with a default value.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
