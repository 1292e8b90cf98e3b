//! `attack`: run attacks against the given keys and ciphertexts.

use std::path::Path;
use std::sync::Arc;

use num_bigint_dig::BigUint;
use tokio_util::sync::CancellationToken;

use crate::attack::{AttackDriver, Catalog, DriverOptions, Target};
use crate::cli::args::AttackArgs;
use crate::config::Settings;
use crate::engine::EngineLocator;
use crate::error::RsarmageddonError;
use crate::observability::{EventEmitter, StopReason};
use crate::output::{CleartextFormat, KeyTarget, OutputOptions, OutputSink};

/// Run the requested attacks.
///
/// Exits successfully when attacks ran to completion, whether or not one
/// recovered anything.
///
/// # Errors
///
/// Returns `RsarmageddonError::Engine` if no engine is usable,
/// `RsarmageddonError::BadKey` if an attack rejected the public key,
/// `RsarmageddonError::Key` if keys were recovered but none could be
/// completed, and `RsarmageddonError::Interrupted` on cancellation.
pub async fn run(
    args: &AttackArgs,
    settings: &Settings,
    cancel: CancellationToken,
) -> Result<(), RsarmageddonError> {
    let defaults = &settings.attack;

    let catalog = Catalog::new(
        args.attacks_dir
            .clone()
            .unwrap_or_else(|| defaults.attacks_dir.clone()),
        defaults.extensions.clone(),
    );
    let options = DriverOptions {
        timeout: args.timeout.unwrap_or(defaults.timeout),
        kill_grace: defaults.kill_grace,
        default_exponent: BigUint::from(defaults.default_exponent),
        padding: args.padding.unwrap_or(defaults.padding),
    };
    let events = match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    };
    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
    }
    let mut sink = OutputSink::stdout(OutputOptions {
        cleartext_format: if args.json {
            CleartextFormat::Json
        } else {
            CleartextFormat::Raw
        },
        key_target: key_target(args.output_private.as_deref()),
        output_dir: args.output_dir.clone(),
        key_format: args.key_format.unwrap_or(defaults.key_format),
    });
    let target = Target {
        ciphertexts: args.ciphertexts.clone(),
        public_keys: args.keys.clone(),
    };

    let driver = AttackDriver::new(
        EngineLocator::new(super::locator_options(&args.engine, settings)),
        catalog,
        options,
    )
    .with_events(Arc::new(events))
    .with_cancellation(cancel);

    let report = driver.run(&args.attacks, &target, &mut sink).await?;

    match report.stop {
        StopReason::BadKey => Err(RsarmageddonError::BadKey {
            attack: report.decided_by.unwrap_or_default(),
        }),
        StopReason::AllExhausted => {
            if report.cleartexts.is_empty() {
                tracing::warn!(attacks = report.summary.attacks_run, "no attack succeeded");
            }
            Ok(())
        }
        _ => match report.key_failure() {
            Some(e) => Err(e.clone().into()),
            None => Ok(()),
        },
    }
}

/// `--output-private` without a value (`-`) means stdout; absent means the
/// key is only used for decryption.
fn key_target(output_private: Option<&Path>) -> KeyTarget {
    match output_private {
        None => KeyTarget::Discard,
        Some(path) if path == Path::new("-") => KeyTarget::Stdout,
        Some(path) => KeyTarget::File(path.to_path_buf()),
    }
}
