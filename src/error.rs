//! Error types for `RSArmageddon`
//!
//! Each concern (engine discovery, process execution, the result protocol,
//! key algebra, output, configuration) has its own error enum. They are
//! aggregated into [`RsarmageddonError`], which maps to process exit codes.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `RSArmageddon` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution (including runs where no attack succeeded)
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure), `EX_CONFIG`
    pub const CONFIG_ERROR: i32 = 78;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Engine not found or unusable
    pub const ENGINE_ERROR: i32 = 4;

    /// Key material could not be completed
    pub const KEY_ERROR: i32 = 5;

    /// An attack reported the public key as structurally invalid
    pub const BAD_KEY: i32 = 6;

    /// Usage error (invalid arguments, missing required options), `EX_USAGE`
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `RSArmageddon` operations.
///
/// Only run-aborting conditions travel through this type. Per-attack
/// failures are values of [`crate::attack::AttackOutcome`] instead.
#[derive(Debug, Error)]
pub enum RsarmageddonError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine discovery error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Key completion error
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Output or encoding error
    #[error(transparent)]
    Output(#[from] OutputError),

    /// Attack setup error
    #[error(transparent)]
    Attack(#[from] AttackError),

    /// An attack declared the public key structurally invalid
    #[error("attack '{attack}' reported the public key as invalid")]
    BadKey {
        /// Attack that rejected the key
        attack: String,
    },

    /// The run was cancelled by a signal
    #[error("interrupted")]
    Interrupted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RsarmageddonError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => ExitCode::CONFIG_ERROR,
            Self::Engine(_) => ExitCode::ENGINE_ERROR,
            Self::Key(_) => ExitCode::KEY_ERROR,
            Self::Output(_) | Self::Attack(_) | Self::Json(_) => ExitCode::ERROR,
            Self::BadKey { .. } => ExitCode::BAD_KEY,
            Self::Interrupted => ExitCode::INTERRUPTED,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", format_issues(.errors))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Configuration file exceeds the size limit
    #[error("{path} is {size} bytes (limit: {limit})")]
    TooLarge {
        /// Path to the configuration file
        path: PathBuf,
        /// Actual size in bytes
        size: u64,
        /// Configured limit in bytes
        limit: u64,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g. `"attack.timeout"`)
    pub path: String,
    /// Description of the validation issue
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.path)
    }
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Engine discovery and version negotiation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No usable engine installation was found
    #[error("SageMath was not found.\n{guidance}")]
    BackendNotFound {
        /// Platform-specific installation instructions
        guidance: &'static str,
    },

    /// The engine did not answer the version query or answered nonsense
    #[error("engine at {executable} is unusable: {reason}")]
    EngineUnusable {
        /// Executable that was queried
        executable: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A path could not be translated into the shim's namespace
    #[error("cannot translate {path} through the compatibility shim: {reason}")]
    PathTranslation {
        /// Host path that failed to translate
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
}

// ============================================================================
// Runner Errors
// ============================================================================

/// Errors from a single engine invocation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The process could not be started
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        /// Program that was launched
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The process tree exceeded its time budget and was terminated
    #[error("timed out after {}", format_timeout(.timeout))]
    TimedOut {
        /// Budget that was exceeded
        timeout: Duration,
    },

    /// Path translation for the invocation failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// I/O error while waiting on the process
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

// ============================================================================
// Protocol Errors
// ============================================================================

/// Result protocol violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A line could not be interpreted
    #[error("malformed protocol output at line {line} ({kind}): {reason}")]
    MalformedProtocolOutput {
        /// 1-based line number in the attack's stdout
        line: usize,
        /// Record kind as written by the attack
        kind: String,
        /// What was wrong with the line
        reason: String,
    },
}

// ============================================================================
// Key Errors
// ============================================================================

/// Key completion failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The supplied parameters do not determine the rest
    #[error("insufficient key material: cannot derive {missing}")]
    InsufficientKeyMaterial {
        /// Parameter that could not be derived
        missing: &'static str,
    },

    /// An inverse required by the derivation does not exist
    #[error("{value} has no inverse modulo {modulus}")]
    NoModularInverse {
        /// Parameter being inverted
        value: &'static str,
        /// Modulus used
        modulus: &'static str,
    },

    /// The supplied parameters contradict each other
    #[error("inconsistent key material: {0}")]
    InconsistentKeyMaterial(String),
}

// ============================================================================
// Output Errors
// ============================================================================

/// Errors while decrypting or persisting recovered material.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Key encoding failed
    #[error("key encoding failed: {0}")]
    Encode(String),

    /// Decryption under the recovered key failed
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Writing an artifact failed
    #[error("cannot write {path}: {source}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing to a stream failed
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Attack Errors
// ============================================================================

/// Errors while preparing attacks for a run.
#[derive(Debug, Error)]
pub enum AttackError {
    /// No script matches the requested attack name
    #[error("unknown attack '{name}'{}", format_suggestion(.suggestion.as_deref()))]
    UnknownAttack {
        /// Name as requested
        name: String,
        /// Closest known attack, if any is close enough
        suggestion: Option<String>,
    },

    /// The attack catalog directory cannot be listed
    #[error("cannot read attack directory {path}: {source}")]
    Catalog {
        /// Directory that was listed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The helper library could not be staged
    #[error("cannot stage attack helper library: {0}")]
    Staging(#[source] std::io::Error),
}

fn format_suggestion(suggestion: Option<&str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 78);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::ENGINE_ERROR, 4);
        assert_eq!(ExitCode::KEY_ERROR, 5);
        assert_eq!(ExitCode::BAD_KEY, 6);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_engine_error_exit_code() {
        let err: RsarmageddonError = EngineError::BackendNotFound { guidance: "install" }.into();
        assert_eq!(err.exit_code(), ExitCode::ENGINE_ERROR);
        assert!(err.to_string().contains("install"));
    }

    #[test]
    fn test_key_error_exit_code() {
        let err: RsarmageddonError = KeyError::InsufficientKeyMaterial { missing: "d" }.into();
        assert_eq!(err.exit_code(), ExitCode::KEY_ERROR);
    }

    #[test]
    fn test_bad_key_exit_code() {
        let err = RsarmageddonError::BadKey {
            attack: "factordb".into(),
        };
        assert_eq!(err.exit_code(), ExitCode::BAD_KEY);
        assert!(err.to_string().contains("factordb"));
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: RsarmageddonError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: RsarmageddonError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_unknown_attack_display() {
        let err = AttackError::UnknownAttack {
            name: "wiener_atack".into(),
            suggestion: Some("wiener".into()),
        };
        assert_eq!(
            err.to_string(),
            "unknown attack 'wiener_atack' (did you mean 'wiener'?)"
        );
        let err = AttackError::UnknownAttack {
            name: "zzz".into(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown attack 'zzz'");
    }

    #[test]
    fn test_timed_out_display() {
        let err = RunnerError::TimedOut {
            timeout: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "timed out after 1m 30s");
    }

    #[test]
    fn test_validation_error_lists_issues() {
        let err = ConfigError::ValidationError {
            path: "settings.yaml".to_string(),
            errors: vec![
                ValidationIssue {
                    path: "attack.timeout".to_string(),
                    message: "must be greater than zero".to_string(),
                },
                ValidationIssue {
                    path: "attack.default_exponent".to_string(),
                    message: "must be odd".to_string(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("must be greater than zero at attack.timeout"));
        assert!(text.contains("must be odd at attack.default_exponent"));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MalformedProtocolOutput {
            line: 3,
            kind: "plaintext".to_string(),
            reason: "unknown record kind".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed protocol output at line 3 (plaintext): unknown record kind"
        );
    }
}
