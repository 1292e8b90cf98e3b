//! POSIX-emulation shim used to reach engines installed inside a Cygwin
//! runtime.
//!
//! The shim owns two helpers under its root: a login shell used to launch
//! the engine and `cygpath` used to translate host paths into the shim's
//! own namespace.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::EngineError;

/// A compatibility shim rooted at an installation's runtime directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shim {
    root: PathBuf,
}

impl Shim {
    /// Creates a shim rooted at `root` (the directory holding `bin/`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the shim.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Login shell used to run the engine.
    #[must_use]
    pub fn shell(&self) -> PathBuf {
        self.root.join("bin").join("bash.exe")
    }

    /// Path translation helper.
    #[must_use]
    pub fn cygpath(&self) -> PathBuf {
        self.root.join("bin").join("cygpath.exe")
    }

    /// Translates a host path into the shim's namespace.
    ///
    /// The translation is not cached; callers re-apply it for every
    /// invocation.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathTranslation` if the helper cannot be run or
    /// prints nothing.
    pub async fn translate(&self, path: &Path) -> Result<OsString, EngineError> {
        let output = Command::new(self.cygpath())
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::PathTranslation {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let text = String::from_utf8_lossy(&output.stdout);
        clean_helper_output(&text)
            .map(OsString::from)
            .ok_or_else(|| EngineError::PathTranslation {
                path: path.to_path_buf(),
                reason: "empty response from cygpath".to_string(),
            })
    }
}

/// Strips the trailing line terminator from a helper's answer.
fn clean_helper_output(text: &str) -> Option<&str> {
    let line = text.trim_end_matches(['\r', '\n']);
    (!line.is_empty()).then_some(line)
}

/// Builds a command that runs `engine`, through `shim` when one is given.
///
/// Arguments appended by the caller follow the engine path.
#[must_use]
pub fn engine_command(engine: &Path, shim: Option<&Shim>) -> Command {
    match shim {
        Some(shim) => {
            let mut command = Command::new(shim.shell());
            command.args(["--norc", "--login"]).arg(engine);
            command
        }
        None => Command::new(engine),
    }
}

/// Translates `path` for the engine, or passes it through unchanged when no
/// shim is involved.
///
/// # Errors
///
/// Propagates translation failures from [`Shim::translate`].
pub async fn translate_path(path: &Path, shim: Option<&Shim>) -> Result<OsString, EngineError> {
    match shim {
        Some(shim) => shim.translate(path).await,
        None => Ok(path.as_os_str().to_os_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_paths_live_under_bin() {
        let shim = Shim::new("C:/SageMath 9.3/runtime");
        assert_eq!(shim.shell(), Path::new("C:/SageMath 9.3/runtime/bin/bash.exe"));
        assert_eq!(
            shim.cygpath(),
            Path::new("C:/SageMath 9.3/runtime/bin/cygpath.exe")
        );
    }

    #[test]
    fn clean_helper_output_strips_line_endings() {
        assert_eq!(clean_helper_output("/cygdrive/c/x\r\n"), Some("/cygdrive/c/x"));
        assert_eq!(clean_helper_output("/tmp/a b\n"), Some("/tmp/a b"));
        assert_eq!(clean_helper_output("\n"), None);
    }

    #[test]
    fn engine_command_without_shim_runs_engine_directly() {
        let command = engine_command(Path::new("/usr/bin/sage"), None);
        let std = command.as_std();
        assert_eq!(std.get_program(), "/usr/bin/sage");
        assert_eq!(std.get_args().count(), 0);
    }

    #[test]
    fn engine_command_with_shim_goes_through_login_shell() {
        let shim = Shim::new("/rt");
        let command = engine_command(Path::new("/opt/sagemath-9.3/local/bin/sage"), Some(&shim));
        let std = command.as_std();
        assert_eq!(std.get_program(), Path::new("/rt/bin/bash.exe").as_os_str());
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(args, ["--norc", "--login", "/opt/sagemath-9.3/local/bin/sage"]);
    }

    #[tokio::test]
    async fn translate_without_shim_is_identity() {
        let translated = translate_path(Path::new("/tmp/attack.sage"), None)
            .await
            .unwrap();
        assert_eq!(translated, OsString::from("/tmp/attack.sage"));
    }

    #[tokio::test]
    async fn translate_with_missing_helper_fails() {
        let shim = Shim::new("/nonexistent/rsarmageddon/runtime");
        let err = shim.translate(Path::new("/tmp/x")).await.unwrap_err();
        assert!(matches!(err, EngineError::PathTranslation { .. }));
    }
}
