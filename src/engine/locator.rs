//! Platform strategies for finding engine installations.
//!
//! POSIX hosts look the engine up on `PATH`. Windows hosts enumerate
//! SageMath installers from the per-user uninstall registry and the
//! application-data directory; each of those ships its own Cygwin runtime
//! that acts as the compatibility shim.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use super::EngineVersion;
use super::shim::Shim;

/// Installation instructions shown when no engine is found on POSIX hosts.
pub const INSTALL_SAGE_POSIX: &str = "Install SageMath 9.x with your package manager \
(e.g. `apt install sagemath`, `pacman -S sagemath`, `brew install --cask sage`) or from \
https://www.sagemath.org/download.html, and make sure `sage` is on your PATH.";

/// Installation instructions shown when no engine is found on Windows hosts.
pub const INSTALL_SAGE_WINDOWS: &str = "Install SageMath 9.x for Windows from \
https://github.com/sagemath/sage-windows/releases and keep the default \
installation location.";

/// Uninstall registry key holding per-user installer entries.
const UNINSTALL_KEY: &str = r"HKCU\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";

static INSTALLER_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SageMath-(\d+)\.(\d+)").expect("valid regex"));

/// An engine installation that has not been queried yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Engine executable, in the shim's namespace when a shim is present.
    pub executable: PathBuf,
    /// Compatibility shim needed to run it.
    pub shim: Option<Shim>,
    /// Version suggested by the installation's name, if any.
    pub advertised: Option<EngineVersion>,
}

/// Host platform families with distinct discovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Engine on `PATH`, run directly.
    Posix,
    /// Engine inside a per-installation Cygwin runtime.
    Windows,
}

impl Platform {
    /// The platform this binary was built for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    /// Installation instructions for this platform.
    #[must_use]
    pub const fn install_guidance(self) -> &'static str {
        match self {
            Self::Posix => INSTALL_SAGE_POSIX,
            Self::Windows => INSTALL_SAGE_WINDOWS,
        }
    }

    /// Whether an unresponsive candidate makes discovery fail outright.
    ///
    /// POSIX discovery yields a single candidate, so there is nothing to
    /// fall back on.
    #[must_use]
    pub const fn unresponsive_is_fatal(self) -> bool {
        matches!(self, Self::Posix)
    }

    /// Enumerates installed engines, in discovery order.
    pub async fn locate_candidates(self) -> Vec<Candidate> {
        match self {
            Self::Posix => {
                let path = std::env::var_os("PATH").unwrap_or_default();
                find_in_path("sage", &path)
                    .map(|executable| Candidate {
                        executable,
                        shim: None,
                        advertised: None,
                    })
                    .into_iter()
                    .collect()
            }
            Self::Windows => {
                let mut installs = registry_installations().await;
                match appdata_dir() {
                    Some(dir) => installs.extend(appdata_installations(&dir)),
                    None => tracing::warn!(
                        "neither LOCALAPPDATA nor APPDATA is set, skipping application-data scan"
                    ),
                }
                installs
                    .into_iter()
                    .map(|(location, version)| windows_candidate(&location, version))
                    .collect()
            }
        }
    }
}

// ============================================================================
// POSIX
// ============================================================================

/// Searches a `PATH`-style variable for an executable file called `name`.
#[must_use]
pub fn find_in_path(name: &str, path_var: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

// ============================================================================
// Windows
// ============================================================================

/// Builds the candidate for an installation found at `location`.
#[must_use]
pub fn windows_candidate(location: &Path, version: EngineVersion) -> Candidate {
    Candidate {
        executable: PathBuf::from(format!(
            "/opt/sagemath-{}.{}/local/bin/sage",
            version.major, version.minor
        )),
        shim: Some(Shim::new(location.join("runtime"))),
        advertised: Some(version),
    }
}

async fn reg_query(args: &[&str]) -> Option<String> {
    let output = Command::new("reg")
        .arg("query")
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| tracing::debug!(error = %e, "reg query failed to start"))
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn registry_installations() -> Vec<(PathBuf, EngineVersion)> {
    let Some(listing) = reg_query(&[UNINSTALL_KEY]).await else {
        tracing::debug!("uninstall registry listing unavailable");
        return Vec::new();
    };

    let mut installs = Vec::new();
    for (subkey, version) in parse_uninstall_listing(&listing) {
        let Some(values) = reg_query(&[subkey.as_str(), "/v", "InstallLocation"]).await else {
            tracing::debug!(%subkey, "installer entry has no InstallLocation");
            continue;
        };
        if let Some(location) = parse_install_location(&values) {
            installs.push((location, version));
        }
    }
    installs
}

/// Extracts SageMath installer subkeys from `reg query` output.
#[must_use]
pub fn parse_uninstall_listing(listing: &str) -> Vec<(String, EngineVersion)> {
    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let name = line.rsplit('\\').next()?;
            let caps = INSTALLER_KEY_RE.captures(name)?;
            let version = EngineVersion::new(caps[1].parse().ok()?, caps[2].parse().ok()?);
            Some((line.to_string(), version))
        })
        .collect()
}

/// Extracts the `InstallLocation` value from `reg query /v` output.
#[must_use]
pub fn parse_install_location(values: &str) -> Option<PathBuf> {
    values.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("InstallLocation")?;
        let rest = rest.trim_start();
        let value = rest
            .strip_prefix("REG_EXPAND_SZ")
            .or_else(|| rest.strip_prefix("REG_SZ"))?
            .trim();
        (!value.is_empty()).then(|| PathBuf::from(value))
    })
}

fn appdata_dir() -> Option<PathBuf> {
    std::env::var_os("LOCALAPPDATA")
        .or_else(|| std::env::var_os("APPDATA"))
        .map(PathBuf::from)
}

/// Scans an application-data directory for `sagemath*` installations.
#[must_use]
pub fn appdata_installations(appdata: &Path) -> Vec<(PathBuf, EngineVersion)> {
    let Some(dir) = appdata.to_str() else {
        tracing::warn!(dir = %appdata.display(), "application-data path is not UTF-8");
        return Vec::new();
    };
    let pattern = format!(
        "{}{}sagemath*",
        glob::Pattern::escape(dir),
        std::path::MAIN_SEPARATOR
    );
    let options = glob::MatchOptions {
        case_sensitive: false,
        ..glob::MatchOptions::new()
    };
    let Ok(entries) = glob::glob_with(&pattern, options) else {
        return Vec::new();
    };

    let mut installs: Vec<_> = entries
        .filter_map(Result::ok)
        .filter_map(|dir| {
            let name = dir.file_name()?.to_str()?;
            let version = super::parse_version(name)?;
            Some((dir, version))
        })
        .collect();
    installs.sort();
    installs
}
