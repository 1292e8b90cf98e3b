//! `engine`: report the SageMath installation that attacks would use.

use crate::cli::args::{EngineArgs, OutputFormat};
use crate::config::Settings;
use crate::engine::EngineLocator;
use crate::error::RsarmageddonError;

/// Resolve the engine and print where it is.
///
/// # Errors
///
/// Returns `RsarmageddonError::Engine` if no usable engine is found.
pub async fn run(args: &EngineArgs, settings: &Settings) -> Result<(), RsarmageddonError> {
    let locator = EngineLocator::new(super::locator_options(&args.engine, settings));
    let handle = locator.resolve().await?;
    let shim = handle.shim().map(|s| s.root().display().to_string());

    match args.format {
        OutputFormat::Human => {
            println!("executable: {}", handle.executable().display());
            println!("version:    {}", handle.version());
            println!("shim:       {}", shim.as_deref().unwrap_or("none"));
        }
        OutputFormat::Json => {
            let report = serde_json::json!({
                "executable": handle.executable().display().to_string(),
                "version": handle.version().to_string(),
                "shim": shim,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
