//! Shared integration-test harness: runs the `rsarmageddon` binary with
//! `/bin/sh` standing in for SageMath and shell scripts as attacks.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A scratch attack catalog.
pub struct AttackDir {
    dir: TempDir,
}

impl AttackDir {
    /// Creates an empty catalog.
    #[allow(clippy::missing_panics_doc)]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create attack dir"),
        }
    }

    /// Adds `<name>.sage` with the given shell body.
    #[allow(clippy::missing_panics_doc)]
    pub fn attack(&self, name: &str, body: &str) -> &Self {
        std::fs::write(self.dir.path().join(format!("{name}.sage")), body)
            .expect("failed to write attack");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a scratch file inside the catalog directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Runs `rsarmageddon attack` against this catalog with `/bin/sh` as
    /// the engine, followed by `args`.
    pub fn run_attack(&self, args: &[&str]) -> Output {
        let dir = self.path().to_str().expect("non-UTF-8 temp path");
        let mut full = vec![
            "attack",
            "--attacks-dir",
            dir,
            "--engine",
            "/bin/sh",
            "--engine-version",
            "9.0",
        ];
        full.extend_from_slice(args);
        run(&full)
    }
}

/// Runs the binary with `args` and collects its output.
#[allow(clippy::missing_panics_doc)]
pub fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rsarmageddon"))
        .args(args)
        .env_remove("RSARMAGEDDON_CONFIG")
        .env_remove("RSARMAGEDDON_ENGINE")
        .env_remove("RSARMAGEDDON_ATTACKS_DIR")
        .env_remove("RSARMAGEDDON_EVENTS_FILE")
        .env_remove("RSARMAGEDDON_LOG_LEVEL")
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run rsarmageddon")
}

/// Stderr as text, for assertion messages.
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
