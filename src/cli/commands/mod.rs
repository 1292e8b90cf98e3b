//! CLI command dispatch and handlers.
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod attack;
pub mod complete;
pub mod engine;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands, EngineOverride};
use crate::config::{Settings, load_settings};
use crate::engine::LocatorOptions;
use crate::error::RsarmageddonError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the settings file is invalid or the dispatched
/// command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), RsarmageddonError> {
    let settings = match &cli.config {
        Some(path) => {
            tracing::info!(config = %path.display(), "loading settings");
            load_settings(path)?
        }
        None => Settings::default(),
    };

    match cli.command {
        Commands::Attack(args) => attack::run(&args, &settings, cancel).await,
        Commands::Complete(args) => complete::run(&args, &settings),
        Commands::Engine(args) => engine::run(&args, &settings).await,
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}

/// Engine discovery options: command-line override first, then settings.
pub(crate) fn locator_options(engine: &EngineOverride, settings: &Settings) -> LocatorOptions {
    let (executable, pinned_version) = match &engine.executable {
        Some(executable) => (Some(executable.clone()), engine.version),
        None => (settings.engine.executable.clone(), settings.pinned_version()),
    };
    LocatorOptions {
        supported_major: settings.engine.supported_major,
        version_timeout: settings.engine.version_timeout,
        executable,
        pinned_version,
        ..LocatorOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::engine::EngineVersion;

    #[test]
    fn command_line_engine_wins() {
        let mut settings = Settings::default();
        settings.engine.executable = Some(PathBuf::from("/usr/bin/sage"));
        settings.engine.version = Some("9.1".into());

        let from_settings = locator_options(&EngineOverride::default(), &settings);
        assert_eq!(from_settings.executable, Some(PathBuf::from("/usr/bin/sage")));
        assert_eq!(from_settings.pinned_version, Some(EngineVersion::new(9, 1)));

        let overridden = locator_options(
            &EngineOverride {
                executable: Some(PathBuf::from("/opt/sage/sage")),
                version: None,
            },
            &settings,
        );
        assert_eq!(overridden.executable, Some(PathBuf::from("/opt/sage/sage")));
        assert_eq!(overridden.pinned_version, None);
    }
}
