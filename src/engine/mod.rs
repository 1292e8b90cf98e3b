//! External computational engine discovery and version negotiation.
//!
//! The engine (SageMath) is located once per run by an [`EngineLocator`]
//! and handed around as an immutable [`EngineHandle`]. Discovery is
//! platform-specific (see [`locator::Platform`]); version selection is not.

pub mod locator;
pub mod shim;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::error::EngineError;

pub use locator::{Candidate, Platform};
pub use shim::Shim;

/// The only engine major version attacks are written against.
pub const SUPPORTED_MAJOR: u32 = 9;

/// Default budget for answering `--version`. Sage start-up is slow.
pub const DEFAULT_VERSION_TIMEOUT: Duration = Duration::from_secs(60);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)").expect("valid regex"));

// ============================================================================
// Versions
// ============================================================================

/// An engine `(major, minor)` version, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EngineVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
}

impl EngineVersion {
    /// Creates a version.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EngineVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("expected MAJOR.MINOR, got '{s}'"))?;
        let major = major.parse().map_err(|_| format!("invalid major version in '{s}'"))?;
        let minor = minor.parse().map_err(|_| format!("invalid minor version in '{s}'"))?;
        Ok(Self::new(major, minor))
    }
}

/// Finds the first `MAJOR.MINOR` pair in free-form text.
#[must_use]
pub fn parse_version(text: &str) -> Option<EngineVersion> {
    let caps = VERSION_RE.captures(text)?;
    Some(EngineVersion::new(caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Picks the version to use among those discovered.
///
/// The highest version with `supported_major` wins; without one, the
/// highest version overall is used. Returns `None` for an empty input.
#[must_use]
pub fn best_version(
    versions: impl IntoIterator<Item = EngineVersion>,
    supported_major: u32,
) -> Option<EngineVersion> {
    let versions: Vec<_> = versions.into_iter().collect();
    versions
        .iter()
        .copied()
        .filter(|v| v.major == supported_major)
        .max()
        .or_else(|| versions.iter().copied().max())
}

/// Asks an engine for its version by running `<engine> --version`.
///
/// # Errors
///
/// Returns `EngineError::EngineUnusable` if the engine cannot be started,
/// does not answer within `timeout`, or prints no recognisable version.
pub async fn query_version(
    executable: &Path,
    shim: Option<&Shim>,
    timeout: Duration,
) -> Result<EngineVersion, EngineError> {
    let unusable = |reason: String| EngineError::EngineUnusable {
        executable: executable.to_path_buf(),
        reason,
    };

    let mut command = shim::engine_command(executable, shim);
    command
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| unusable("version query timed out".to_string()))?
        .map_err(|e| unusable(e.to_string()))?;

    let text = String::from_utf8_lossy(&output.stdout);
    parse_version(&text).ok_or_else(|| {
        unusable(format!(
            "version could not be identified (not a sage executable?): '{}'",
            text.trim()
        ))
    })
}

// ============================================================================
// Handle
// ============================================================================

/// A resolved engine: what to run, which version it is, and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHandle {
    executable: PathBuf,
    version: EngineVersion,
    shim: Option<Shim>,
}

impl EngineHandle {
    /// Creates a handle for an engine known to be usable.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, version: EngineVersion, shim: Option<Shim>) -> Self {
        Self {
            executable: executable.into(),
            version,
            shim,
        }
    }

    /// Engine executable, in the shim's namespace when a shim is present.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Negotiated engine version.
    #[must_use]
    pub const fn version(&self) -> EngineVersion {
        self.version
    }

    /// Compatibility shim, if the engine needs one.
    #[must_use]
    pub const fn shim(&self) -> Option<&Shim> {
        self.shim.as_ref()
    }

    /// A command that starts the engine; the caller appends arguments.
    #[must_use]
    pub fn command(&self) -> Command {
        shim::engine_command(&self.executable, self.shim.as_ref())
    }
}

// ============================================================================
// Locator
// ============================================================================

/// Discovery options for [`EngineLocator`].
#[derive(Debug, Clone)]
pub struct LocatorOptions {
    /// Discovery strategy.
    pub platform: Platform,
    /// Preferred major version.
    pub supported_major: u32,
    /// Budget for each `--version` query.
    pub version_timeout: Duration,
    /// Explicit engine executable; skips discovery.
    pub executable: Option<PathBuf>,
    /// Version to assume for an explicit executable instead of querying it.
    pub pinned_version: Option<EngineVersion>,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            supported_major: SUPPORTED_MAJOR,
            version_timeout: DEFAULT_VERSION_TIMEOUT,
            executable: None,
            pinned_version: None,
        }
    }
}

/// Resolves the engine once and hands out the cached handle afterwards.
#[derive(Debug)]
pub struct EngineLocator {
    options: LocatorOptions,
    resolved: OnceCell<EngineHandle>,
}

impl EngineLocator {
    /// Creates a locator that discovers the engine on first use.
    #[must_use]
    pub fn new(options: LocatorOptions) -> Self {
        Self {
            options,
            resolved: OnceCell::new(),
        }
    }

    /// Creates a locator that always yields `handle`.
    #[must_use]
    pub fn with_handle(handle: EngineHandle) -> Self {
        Self {
            options: LocatorOptions::default(),
            resolved: OnceCell::new_with(Some(handle)),
        }
    }

    /// Resolves the engine. Later calls return the first successful result.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BackendNotFound` when no installation responds
    /// and `EngineError::EngineUnusable` when the only candidate is broken.
    pub async fn resolve(&self) -> Result<&EngineHandle, EngineError> {
        self.resolved.get_or_try_init(|| self.discover()).await
    }

    async fn discover(&self) -> Result<EngineHandle, EngineError> {
        let opts = &self.options;

        let handle = if let Some(executable) = &opts.executable {
            let version = match opts.pinned_version {
                Some(version) => version,
                None => query_version(executable, None, opts.version_timeout).await?,
            };
            EngineHandle::new(executable.clone(), version, None)
        } else {
            let candidates = opts.platform.locate_candidates().await;
            tracing::debug!(count = candidates.len(), "engine candidates found");
            self.select(candidates).await?
        };

        if handle.version.major != opts.supported_major {
            tracing::warn!(
                version = %handle.version,
                "using unsupported SageMath version {}; attacks are written for {}.x, \
                 try installing the latest of those before reporting a bug",
                handle.version,
                opts.supported_major
            );
        }
        tracing::info!(
            executable = %handle.executable.display(),
            version = %handle.version,
            shim = ?handle.shim.as_ref().map(|s| s.root().display().to_string()),
            "engine resolved"
        );
        Ok(handle)
    }

    async fn select(&self, candidates: Vec<Candidate>) -> Result<EngineHandle, EngineError> {
        let opts = &self.options;
        let not_found = || EngineError::BackendNotFound {
            guidance: opts.platform.install_guidance(),
        };
        if candidates.is_empty() {
            return Err(not_found());
        }

        let mut by_version = BTreeMap::new();
        for candidate in candidates {
            match query_version(
                &candidate.executable,
                candidate.shim.as_ref(),
                opts.version_timeout,
            )
            .await
            {
                Ok(version) => {
                    if candidate.advertised.is_some_and(|a| a != version) {
                        tracing::debug!(
                            executable = %candidate.executable.display(),
                            %version,
                            "installation name disagrees with reported version"
                        );
                    }
                    by_version.insert(version, candidate);
                }
                Err(e) if opts.platform.unresponsive_is_fatal() => return Err(e),
                Err(e) => tracing::debug!(error = %e, "discarding engine candidate"),
            }
        }

        let best = best_version(by_version.keys().copied(), opts.supported_major)
            .ok_or_else(not_found)?;
        let candidate = by_version.remove(&best).ok_or_else(not_found)?;
        Ok(EngineHandle::new(candidate.executable, best, candidate.shim))
    }
}
