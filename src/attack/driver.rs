//! The attack loop.
//!
//! ```text
//! Idle -> Resolving -> Running(attack_i) -> Continue | Stop(Success | BadKey | AllExhausted)
//! ```
//!
//! Attacks run one at a time in the order requested. A timeout, a non-zero
//! exit or garbage on stdout only fails that attack. Exit status
//! [`BAD_KEY_STATUS`] ends the run at once, and so does the first attack
//! that reports key material. Engine resolution failure aborts the run
//! before any attack starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use num_bigint_dig::BigUint;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::catalog::{AttackScript, Catalog, StagedHelper};
use super::{AttackOutcome, BAD_KEY_STATUS, FailureReason, RecoveredKey, RunReport, Target};
use crate::codec::{self, Padding};
use crate::engine::EngineLocator;
use crate::error::{AttackError, RsarmageddonError, RunnerError};
use crate::key::{self, CompleteKey, DEFAULT_PUBLIC_EXPONENT};
use crate::observability::{Event, EventEmitter, RunSummary, StopReason};
use crate::output::OutputSink;
use crate::protocol::{self, CleartextRecord, KeyRecord};
use crate::runner::{DEFAULT_KILL_GRACE, ProcessRunner};

/// Environment variable the engine searches for Python modules.
const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Budget for each attack.
    pub timeout: Duration,
    /// How long killed attack processes get to exit.
    pub kill_grace: Duration,
    /// Public exponent assumed when a recovered key lacks one.
    pub default_exponent: BigUint,
    /// Padding used when decrypting the supplied ciphertexts.
    pub padding: Padding,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            timeout: crate::config::schema::DEFAULT_ATTACK_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            default_exponent: BigUint::from(DEFAULT_PUBLIC_EXPONENT),
            padding: Padding::default(),
        }
    }
}

/// Runs a list of attacks against one target.
#[derive(Debug)]
pub struct AttackDriver {
    locator: EngineLocator,
    catalog: Catalog,
    options: DriverOptions,
    events: Arc<EventEmitter>,
    cancel: CancellationToken,
}

impl AttackDriver {
    /// Creates a driver. Events are discarded until
    /// [`with_events`](Self::with_events) is called.
    #[must_use]
    pub fn new(locator: EngineLocator, catalog: Catalog, options: DriverOptions) -> Self {
        Self {
            locator,
            catalog,
            options,
            events: Arc::new(EventEmitter::noop()),
            cancel: CancellationToken::new(),
        }
    }

    /// Sends run events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Aborts the run (killing the running attack) when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs `attacks` in order until one succeeds, one reports a bad key, or
    /// all are exhausted. Recovered material is written to `sink` as soon
    /// as it is found.
    ///
    /// # Errors
    ///
    /// Returns `RsarmageddonError::Engine` if no engine can be resolved,
    /// `RsarmageddonError::Attack` if the helper library cannot be staged
    /// and `RsarmageddonError::Interrupted` on cancellation. Failures of
    /// individual attacks are part of the report instead.
    pub async fn run(
        &self,
        attacks: &[String],
        target: &Target,
        sink: &mut OutputSink,
    ) -> Result<RunReport, RsarmageddonError> {
        let started = Instant::now();
        self.events.emit(Event::RunStarted {
            timestamp: Utc::now(),
            attacks: attacks.to_vec(),
            ciphertexts: target.ciphertexts.len(),
            public_keys: target.public_keys.len(),
        });
        let mut report = RunReport {
            stop: StopReason::AllExhausted,
            decided_by: None,
            cleartexts: Vec::new(),
            keys: Vec::new(),
            failures: Vec::new(),
            summary: RunSummary::default(),
        };

        let engine = match self.locator.resolve().await {
            Ok(handle) => handle.clone(),
            Err(e) => {
                report.stop = StopReason::EngineUnavailable;
                self.finish(&mut report, started);
                return Err(e.into());
            }
        };
        self.events.emit(Event::EngineResolved {
            timestamp: Utc::now(),
            executable: engine.executable().display().to_string(),
            version: engine.version().to_string(),
            shimmed: engine.shim().is_some(),
        });

        // Removed on every exit path when `helper` drops.
        let helper = StagedHelper::stage()?;
        let runner = ProcessRunner::new(engine)
            .with_path_env(MODULE_PATH_VAR, helper.path())
            .with_kill_grace(self.options.kill_grace);
        let args = target.wire_args();

        for (index, name) in attacks.iter().enumerate() {
            let script = match self.catalog.resolve(name) {
                Ok(script) => script,
                Err(e) => {
                    tracing::warn!(attack = %name, "{e}");
                    let suggestion = match e {
                        AttackError::UnknownAttack { suggestion, .. } => suggestion,
                        _ => None,
                    };
                    report
                        .failures
                        .push((name.clone(), FailureReason::UnknownAttack { suggestion }));
                    continue;
                }
            };

            self.events.emit(Event::AttackStarted {
                timestamp: Utc::now(),
                attack: name.clone(),
                index,
            });
            report.summary.attacks_run += 1;
            let attack_started = Instant::now();

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::warn!(attack = %name, "run interrupted, attack process tree killed");
                    report.stop = StopReason::Interrupted;
                    self.finish(&mut report, started);
                    return Err(RsarmageddonError::Interrupted);
                }
                outcome = self.attempt(&runner, &script, &args) => outcome,
            };

            self.events.emit(Event::AttackFinished {
                timestamp: Utc::now(),
                attack: name.clone(),
                outcome: outcome.tag().to_string(),
                reason: match &outcome {
                    AttackOutcome::Failure(reason) => Some(reason.to_string()),
                    _ => None,
                },
                duration_ms: elapsed_ms(attack_started),
            });

            match outcome {
                AttackOutcome::BadKey => {
                    tracing::warn!(attack = %name, "attack reported the public key as invalid, stopping");
                    report.stop = StopReason::BadKey;
                    report.decided_by = Some(name.clone());
                    break;
                }
                AttackOutcome::Failure(reason) => {
                    match &reason {
                        FailureReason::TimedOut => {
                            report.summary.timeouts += 1;
                            tracing::warn!(attack = %name, "timeout expired for attack");
                        }
                        FailureReason::ExitStatus(_) => {
                            tracing::info!(attack = %name, %reason, "attack found nothing");
                        }
                        _ => tracing::warn!(attack = %name, %reason, "attack failed"),
                    }
                    report.failures.push((name.clone(), reason));
                }
                AttackOutcome::Success { cleartexts, keys } => {
                    self.emit_cleartexts(name, cleartexts, sink, &mut report);
                    if keys.is_empty() {
                        continue;
                    }
                    self.materialize_keys(name, keys, target, sink, &mut report);
                    report.stop = StopReason::Success;
                    report.decided_by = Some(name.clone());
                    break;
                }
            }
        }

        drop(helper);
        self.finish(&mut report, started);
        Ok(report)
    }

    /// Runs one attack and classifies what happened.
    async fn attempt(
        &self,
        runner: &ProcessRunner,
        script: &AttackScript,
        args: &[String],
    ) -> AttackOutcome {
        tracing::info!(attack = %script.name, script = %script.path.display(), "running attack");
        let output = match runner.run(&script.path, args, self.options.timeout).await {
            Ok(output) => output,
            Err(RunnerError::TimedOut { .. }) => {
                return AttackOutcome::Failure(FailureReason::TimedOut);
            }
            Err(e) => return AttackOutcome::Failure(FailureReason::Launch(e.to_string())),
        };

        match output.code() {
            Some(BAD_KEY_STATUS) => AttackOutcome::BadKey,
            Some(0) => match protocol::parse(&output.stdout) {
                Ok(parsed) => AttackOutcome::Success {
                    cleartexts: parsed.cleartexts,
                    keys: parsed.keys,
                },
                Err(e) => AttackOutcome::Failure(FailureReason::Malformed(e)),
            },
            code => AttackOutcome::Failure(FailureReason::ExitStatus(code)),
        }
    }

    fn emit_cleartexts(
        &self,
        attack: &str,
        cleartexts: Vec<CleartextRecord>,
        sink: &mut OutputSink,
        report: &mut RunReport,
    ) {
        if !cleartexts.is_empty() {
            tracing::info!(attack, count = cleartexts.len(), "cleartexts recovered");
        }
        for record in cleartexts {
            match sink.cleartext(&record.value, record.destination.as_deref()) {
                Ok(Some(path)) => tracing::info!(path = %path.display(), "cleartext written"),
                Ok(None) => {}
                Err(e) => tracing::warn!(attack, error = %e, "cleartext could not be written"),
            }
            self.events.emit(Event::CleartextRecovered {
                timestamp: Utc::now(),
                attack: attack.to_string(),
                destination: record.destination.clone(),
            });
            report.summary.cleartexts += 1;
            report.cleartexts.push(record);
        }
    }

    /// Completes recovered keys and writes them out.
    ///
    /// A lone key goes to the key target and decrypts every ciphertext.
    /// With an output directory every key is also written there; without
    /// one, extra keys are only reported.
    fn materialize_keys(
        &self,
        attack: &str,
        keys: Vec<KeyRecord>,
        target: &Target,
        sink: &mut OutputSink,
        report: &mut RunReport,
    ) {
        let single = keys.len() == 1;
        if !single && !sink.has_output_dir() {
            tracing::warn!(
                attack,
                count = keys.len(),
                "several keys recovered but no output directory given; keys are not written"
            );
        }

        for (index, record) in keys.into_iter().enumerate() {
            let modulus = record.key.n.clone().or_else(|| match (&record.key.p, &record.key.q) {
                (Some(p), Some(q)) => Some(p * q),
                _ => None,
            });
            let preferred = modulus
                .as_ref()
                .and_then(|n| target.exponent_for(n))
                .unwrap_or(&self.options.default_exponent);
            let completed = key::complete(&record.key, preferred);
            let mut written = Vec::new();

            match &completed {
                Ok(key) => {
                    tracing::info!(attack, name = ?record.name, "private key recovered");
                    if single {
                        match sink.private_key(key) {
                            Ok(path) => written.extend(path),
                            Err(e) => tracing::warn!(error = %e, "private key could not be written"),
                        }
                        self.decrypt_all(key, target, sink);
                    }
                    match sink.key_file(key, record.name.as_deref(), index) {
                        Ok(path) => written.extend(path),
                        Err(e) => tracing::warn!(error = %e, "key file could not be written"),
                    }
                }
                Err(e) => {
                    tracing::warn!(attack, name = ?record.name, error = %e, "recovered key could not be completed");
                }
            }

            self.events.emit(Event::KeyRecovered {
                timestamp: Utc::now(),
                attack: attack.to_string(),
                name: record.name.clone(),
                complete: completed.is_ok(),
            });
            report.summary.keys += 1;
            report.keys.push(RecoveredKey {
                name: record.name,
                key: completed,
                written,
            });
        }
    }

    fn decrypt_all(&self, key: &CompleteKey, target: &Target, sink: &mut OutputSink) {
        for ciphertext in &target.ciphertexts {
            tracing::info!(ciphertext = %ciphertext.value, "decrypting");
            let plain = match codec::decrypt(&ciphertext.value, key, self.options.padding) {
                Ok(plain) => plain,
                Err(e) => {
                    tracing::warn!(ciphertext = %ciphertext.value, error = %e, "decryption failed");
                    continue;
                }
            };
            if let Err(e) = sink.decrypted(&plain, ciphertext.label.as_deref()) {
                tracing::warn!(error = %e, "plaintext could not be written");
            }
        }
    }

    fn finish(&self, report: &mut RunReport, started: Instant) {
        report.summary.duration_ms = elapsed_ms(started);
        tracing::info!(reason = %report.stop, summary = %report.summary, "run stopped");
        self.events.emit(Event::RunStopped {
            timestamp: Utc::now(),
            reason: report.stop,
            summary: report.summary.clone(),
        });
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
