//! Settings file schema.
//!
//! ```yaml
//! engine:
//!   executable: /usr/bin/sage      # skip discovery
//!   version: "9.5"                 # trust this instead of asking sage
//!   version_timeout: 1m
//!   supported_major: 9
//! attack:
//!   timeout: 2m
//!   kill_grace: 5s
//!   attacks_dir: ./attacks
//!   extensions: [sage, py]
//!   default_exponent: 65537
//!   padding: raw
//!   key_format: pem
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{KeyFormat, Padding};
use crate::engine::{DEFAULT_VERSION_TIMEOUT, EngineVersion, SUPPORTED_MAJOR};
use crate::error::ValidationIssue;
use crate::key::DEFAULT_PUBLIC_EXPONENT;
use crate::runner::DEFAULT_KILL_GRACE;

/// Per-attack budget when nothing else is configured.
pub const DEFAULT_ATTACK_TIMEOUT: Duration = Duration::from_secs(120);

/// All settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineSettings,
    pub attack: AttackSettings,
}

/// Engine discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub executable: Option<PathBuf>,
    /// Pinned `major.minor`, only meaningful with `executable`.
    pub version: Option<String>,
    #[serde(with = "duration_str")]
    pub version_timeout: Duration,
    pub supported_major: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            executable: None,
            version: None,
            version_timeout: DEFAULT_VERSION_TIMEOUT,
            supported_major: SUPPORTED_MAJOR,
        }
    }
}

/// Attack loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttackSettings {
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    #[serde(with = "duration_str")]
    pub kill_grace: Duration,
    pub attacks_dir: PathBuf,
    pub extensions: Vec<String>,
    pub default_exponent: u64,
    pub padding: Padding,
    pub key_format: KeyFormat,
}

impl Default for AttackSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ATTACK_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            attacks_dir: PathBuf::from("attacks"),
            extensions: vec!["sage".to_string(), "py".to_string()],
            default_exponent: u64::from(DEFAULT_PUBLIC_EXPONENT),
            padding: Padding::default(),
            key_format: KeyFormat::default(),
        }
    }
}

impl Settings {
    /// Collects every problem with these settings.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut issue = |path: &str, message: &str| {
            issues.push(ValidationIssue {
                path: path.to_string(),
                message: message.to_string(),
            });
        };

        if self.engine.version_timeout.is_zero() {
            issue("engine.version_timeout", "must be greater than zero");
        }
        if let Some(version) = &self.engine.version {
            if version.parse::<EngineVersion>().is_err() {
                issue("engine.version", "must look like MAJOR.MINOR");
            }
            if self.engine.executable.is_none() {
                issue("engine.version", "requires engine.executable");
            }
        }
        if self.attack.timeout.is_zero() {
            issue("attack.timeout", "must be greater than zero");
        }
        if self.attack.extensions.is_empty() {
            issue("attack.extensions", "must list at least one extension");
        }
        if self
            .attack
            .extensions
            .iter()
            .any(|ext| ext.is_empty() || ext.contains(['/', '\\', '.']))
        {
            issue("attack.extensions", "must be bare extensions such as 'sage'");
        }
        if self.attack.default_exponent < 3 {
            issue("attack.default_exponent", "must be at least 3");
        } else if self.attack.default_exponent % 2 == 0 {
            issue("attack.default_exponent", "must be odd");
        }
        issues
    }

    /// The pinned engine version, if one is configured and valid.
    #[must_use]
    pub fn pinned_version(&self) -> Option<EngineVersion> {
        self.engine.version.as_deref().and_then(|v| v.parse().ok())
    }
}

/// Human-readable durations (`90s`, `2m`, `1h 30m`).
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
