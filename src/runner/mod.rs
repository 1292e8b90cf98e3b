//! Attack invocation with a time budget.
//!
//! [`ProcessRunner`] starts `<engine> <script> <args...>`, collects stdout,
//! and on timeout tears down the whole process tree before reporting
//! [`RunnerError::TimedOut`]. The exit status is handed back uninterpreted.

pub mod tree;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::engine::EngineHandle;
use crate::engine::shim::translate_path;
use crate::error::RunnerError;

use tree::{ProcessTree, TreeGuard, new_marker};

/// How long killed processes get to disappear before we stop waiting.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Exit status and captured stdout of one invocation.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Raw exit status.
    pub status: ExitStatus,
    /// Standard output, decoded as UTF-8 (lossily).
    pub stdout: String,
}

impl RunOutput {
    /// Exit code, or `None` when the process was killed by a signal.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Runs scripts on a resolved engine.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    engine: EngineHandle,
    path_env: Vec<(String, PathBuf)>,
    kill_grace: Duration,
}

impl ProcessRunner {
    /// Creates a runner for `engine`.
    #[must_use]
    pub const fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            path_env: Vec::new(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Sets an environment variable whose value is a path on the host.
    ///
    /// The path is translated into the engine's namespace on every
    /// invocation.
    #[must_use]
    pub fn with_path_env(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.path_env.push((key.into(), path.into()));
        self
    }

    /// Overrides how long to wait for killed processes to exit.
    #[must_use]
    pub const fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Runs `script` with positional `args`, bounded by `timeout`.
    ///
    /// Standard input is closed and standard error is inherited.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::SpawnFailed` if the engine cannot be started,
    /// `RunnerError::Engine` if a path cannot be translated, and
    /// `RunnerError::TimedOut` once the budget is exceeded and every process
    /// in the tree has been terminated.
    pub async fn run(
        &self,
        script: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<RunOutput, RunnerError> {
        let shim = self.engine.shim();
        let script_arg = translate_path(script, shim).await?;

        let mut command = self.engine.command();
        command
            .arg(script_arg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let (marker_key, marker) = new_marker();
        command.env(&marker_key, &marker);
        for (key, path) in &self.path_env {
            let entry = translate_path(path, shim).await?;
            command.env(
                key,
                prepend_search_path(entry, std::env::var_os(key), shim.is_none()),
            );
        }

        tracing::debug!(script = %script.display(), ?args, "starting attack process");
        let mut child = command.spawn().map_err(|source| RunnerError::SpawnFailed {
            program: self.engine.executable().display().to_string(),
            source,
        })?;
        let mut guard = TreeGuard::new(
            child
                .id()
                .map(|root| ProcessTree::new(root).with_marker(&marker_key, &marker)),
        );
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;

        // Output counts as finished only once every writer closed stdout,
        // so a lingering helper keeps the budget running.
        let collected = tokio::time::timeout(timeout, async {
            let mut buf = Vec::new();
            let (status, read) = tokio::join!(child.wait(), stdout.read_to_end(&mut buf));
            read?;
            Ok::<_, std::io::Error>((status?, buf))
        })
        .await;

        match collected {
            Ok(result) => {
                guard.disarm();
                let (status, buf) = result?;
                Ok(RunOutput {
                    status,
                    stdout: String::from_utf8_lossy(&buf).into_owned(),
                })
            }
            Err(_) => {
                tracing::warn!(
                    script = %script.display(),
                    timeout = %humantime::format_duration(timeout),
                    "attack exceeded its time budget, terminating process tree"
                );
                if let Some(mut tree) = guard.disarm() {
                    tree.terminate();
                    if let Err(e) = child.kill().await {
                        tracing::debug!(error = %e, "attack process already gone");
                    }
                    tree.wait_for_exit(self.kill_grace).await;
                } else if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "attack process already gone");
                }
                Err(RunnerError::TimedOut { timeout })
            }
        }
    }
}

/// Puts `entry` in front of an inherited search path. Inherited entries are
/// host paths, so they are dropped when the engine runs behind a shim.
fn prepend_search_path(entry: OsString, inherited: Option<OsString>, keep_inherited: bool) -> OsString {
    match inherited {
        Some(rest) if keep_inherited && !rest.is_empty() => std::env::join_paths(
            std::iter::once(PathBuf::from(&entry)).chain(std::env::split_paths(&rest)),
        )
        .unwrap_or(entry),
        _ => entry,
    }
}
